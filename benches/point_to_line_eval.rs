//! Residual evaluation benchmarks
//!
//! - Single point-to-line residual with and without Jacobians
//! - Parallel evaluation of a full sliding window of residuals

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use lidar_gp_odometry::factors::{GpOperatingPoint, LineWeighting, PointToLineGp};
use lidar_gp_odometry::gp::GpInterpolator;
use lidar_gp_odometry::manifold::se3::{SE3Tangent, SE3};
use lidar_gp_odometry::manifold::{LieGroup, Tangent};
use lidar_gp_odometry::odometry::{
    FeatureTrack, JacobianStore, KnotPerturbation, LineProblem, Scan, ScanMap, ScanWindow,
    Trajectory, TrajectoryState,
};
use lidar_gp_odometry::OdometryConfig;
use nalgebra::{Matrix3, Matrix3xX, Vector3, Vector6};

const NUM_KNOTS: usize = 11;
const KNOT_SPACING: f64 = 0.1;
const NUM_LINES: usize = 40;
const POINTS_PER_LINE: usize = 25;

fn velocity() -> Vector6<f64> {
    Vector6::new(8.0, 0.4, 0.0, 0.01, 0.0, 0.25)
}

fn trajectory() -> Trajectory {
    let states = (0..NUM_KNOTS)
        .map(|k| {
            let t = KNOT_SPACING * k as f64;
            TrajectoryState::new(t, SE3Tangent::from(velocity() * t).exp(None), velocity())
        })
        .collect();
    Trajectory::new(states).expect("knot times are increasing")
}

/// Vertical poles on both sides of the road, each seen in every scan.
fn window_data(trajectory: &Trajectory) -> (ScanMap, Vec<FeatureTrack>, ScanWindow) {
    let window = ScanWindow::new(0, (NUM_KNOTS - 1) as u32);
    let poles: Vec<Vector3<f64>> = (0..NUM_LINES)
        .map(|i| {
            let side = if i % 2 == 0 { 6.0 } else { -6.0 };
            Vector3::new(2.0 * i as f64, side, 0.0)
        })
        .collect();
    let mut tracks: Vec<FeatureTrack> = poles
        .iter()
        .map(|base| FeatureTrack::new(Vector6::new(base.x, base.y, base.z, 0.0, 0.0, 1.0)))
        .collect();

    let mut scans = ScanMap::new();
    for k in 0..NUM_KNOTS - 1 {
        let (start, end) = (&trajectory.states()[k], &trajectory.states()[k + 1]);
        let mut points = Vec::new();
        let mut times = Vec::new();
        for (track, base) in tracks.iter_mut().zip(&poles) {
            for j in 0..POINTS_PER_LINE {
                let tau = (j as f64 + 0.5) / POINTS_PER_LINE as f64;
                let pose = GpInterpolator::new(KNOT_SPACING, tau)
                    .expect("valid fraction")
                    .interpolate(
                        [&start.pose, &end.pose],
                        [&start.velocity, &end.velocity],
                        None,
                    )
                    .pose;
                let map_point = base + Vector3::new(0.0, 0.0, 0.1 * j as f64);
                track
                    .append_observation(points.len(), k as u32, k as u32, &window)
                    .expect("scan inside window");
                points.push(pose.inverse(None).act(&map_point, None, None));
                times.push(start.time + tau * KNOT_SPACING);
            }
        }
        let scan = Scan::new(Matrix3xX::from_columns(&points), times).expect("matching lengths");
        scans.insert(k as u32, scan);
    }
    (scans, tracks, window)
}

fn single_residual_benchmark(c: &mut Criterion) {
    let start = SE3::from_translation_euler(1.0, 2.0, 0.0, 0.0, 0.0, 0.3);
    let end = SE3Tangent::from(velocity() * KNOT_SPACING)
        .exp(None)
        .compose(&start, None, None);
    let mut factor = PointToLineGp::new(
        Vector3::new(4.0, 1.5, -0.2),
        Vector3::new(0.0, 6.0, 0.0),
        Vector3::new(1.0, 6.0, 0.1),
        LineWeighting::Covariance(Matrix3::identity() * 0.0025),
        GpInterpolator::new(KNOT_SPACING, 0.37).expect("valid fraction"),
        GpOperatingPoint::new(start, end, velocity(), velocity()),
    )
    .expect("non-degenerate line");
    let perturbations = [Vector6::repeat(1e-3); 4];

    let mut group = c.benchmark_group("point_to_line_gp");
    group.bench_function("residual", |b| {
        b.iter(|| black_box(factor.evaluate(black_box(&perturbations), [false; 4])))
    });
    group.bench_function("residual_and_jacobians", |b| {
        b.iter(|| black_box(factor.evaluate(black_box(&perturbations), [true; 4])))
    });
    group.finish();
}

fn window_benchmark(c: &mut Criterion) {
    let trajectory = trajectory();
    let (scans, mut tracks, window) = window_data(&trajectory);
    let store = JacobianStore::shared();
    for track in &mut tracks {
        track.bind_jacobian_source(&store).expect("fresh track");
    }
    let mut problem = LineProblem::build(
        &tracks,
        &scans,
        &trajectory,
        &window,
        &OdometryConfig::default(),
    )
    .expect("problem builds");
    let perturbations = vec![KnotPerturbation::default(); NUM_KNOTS];

    let mut group = c.benchmark_group("line_problem");
    group.sample_size(20);
    group.bench_function("evaluate_window", |b| {
        b.iter(|| black_box(problem.evaluate(black_box(&perturbations), true)))
    });
    group.finish();
}

criterion_group!(benches, single_residual_benchmark, window_benchmark);
criterion_main!(benches);
