//! End-to-end tests of the sliding-window pipeline
//!
//! Synthetic scans of three known map lines are taken along a constant-velocity
//! trajectory. The tests then:
//! - Assemble the line problem and motion priors and take one Gauss-Newton step from a
//!   perturbed estimate
//! - Populate the shared Jacobian store and read it back through the feature tracks from
//!   several threads
//! - Slide the window and check that old observations are retired

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]


use gp_test_utils::*;
use lidar_gp_odometry::factors::GpPriorFactor;
use lidar_gp_odometry::gp::GpInterpolator;
use lidar_gp_odometry::manifold::se3::{SE3Tangent, SE3};
use lidar_gp_odometry::manifold::{LieGroup, Tangent};
use lidar_gp_odometry::odometry::{
    JacobianStore, KnotPerturbation, LineProblem, ScanWindow, Trajectory, STATE_DIMENSION,
};
use lidar_gp_odometry::OdometryConfig;
use nalgebra::{DMatrix, DVector, Vector3, Vector6};
use rand::rngs::StdRng;
use rand::SeedableRng;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const NUM_KNOTS: usize = 4;
const KNOT_SPACING: f64 = 0.1;

fn ground_truth() -> Result<Trajectory, Box<dyn std::error::Error>> {
    let start = SE3::from_translation_euler(0.5, -0.2, 0.1, 0.02, -0.01, 0.1);
    let velocity = Vector6::new(4.0, 0.3, 0.0, 0.0, 0.05, 0.3);
    constant_velocity_trajectory(NUM_KNOTS, KNOT_SPACING, &start, velocity)
}

/// Columns of the four perturbation blocks of interval `knot` in the stacked state.
fn block_columns(knot: usize) -> [usize; 4] {
    let start = STATE_DIMENSION * knot;
    let end = STATE_DIMENSION * (knot + 1);
    [start, end, start + 6, end + 6]
}

fn total_cost(
    problem: &mut LineProblem,
    priors: &[GpPriorFactor],
    perturbations: &[KnotPerturbation],
) -> Result<f64, Box<dyn std::error::Error>> {
    let mut cost = problem.cost(perturbations)?;
    for (k, prior) in priors.iter().enumerate() {
        let (start, end) = (perturbations[k], perturbations[k + 1]);
        let evaluation = prior.evaluate(
            &[start.pose, end.pose, start.velocity, end.velocity],
            [false; 4],
        );
        cost += 0.5 * evaluation.residual.norm_squared();
    }
    Ok(cost)
}

// ============================================================================
// Gauss-Newton step
// ============================================================================

#[test]
fn test_ground_truth_has_zero_cost() -> TestResult {
    let truth = ground_truth()?;
    let window = ScanWindow::new(0, (NUM_KNOTS - 1) as u32);
    let (scans, tracks) = synthetic_scans(&truth, &axis_lines(), 5, &window)?;
    let config = OdometryConfig::default();

    let mut problem = LineProblem::build(&tracks, &scans, &truth, &window, &config)?;
    assert_eq!(problem.len(), 3 * 5 * (NUM_KNOTS - 1));

    let priors = truth.prior_factors(&config.gp_prior)?;
    let zero = vec![KnotPerturbation::default(); NUM_KNOTS];
    assert!(total_cost(&mut problem, &priors, &zero)? < 1e-16);
    Ok(())
}

#[test]
fn test_gauss_newton_step_reduces_cost() -> TestResult {
    let truth = ground_truth()?;
    let window = ScanWindow::new(0, (NUM_KNOTS - 1) as u32);
    let (scans, mut tracks) = synthetic_scans(&truth, &axis_lines(), 5, &window)?;
    let config = OdometryConfig::default();
    let store = JacobianStore::shared();
    for track in &mut tracks {
        track.bind_jacobian_source(&store)?;
    }

    let mut rng = StdRng::seed_from_u64(3);
    let mut estimate = truth.clone();
    for k in 0..NUM_KNOTS {
        let state = truth.state(k).ok_or("knot")?;
        let pose = SE3Tangent::from(random_tangent(&mut rng, 0.01, 0.005))
            .exp(None)
            .compose(&state.pose, None, None);
        estimate.set_state(k, pose, state.velocity + random_tangent(&mut rng, 0.05, 0.01))?;
    }

    let mut problem = LineProblem::build(&tracks, &scans, &estimate, &window, &config)?;
    let mut priors = estimate.prior_factors(&config.gp_prior)?;
    let zero = vec![KnotPerturbation::default(); NUM_KNOTS];
    let cost_before = total_cost(&mut problem, &priors, &zero)?;
    assert!(cost_before > 1e-6);

    // Stack line and prior residuals into one linear system
    let line = problem.evaluate(&zero, true)?;
    let rows = line.residuals.len() + 12 * priors.len();
    let cols = STATE_DIMENSION * NUM_KNOTS;
    let mut jacobian = DMatrix::<f64>::zeros(rows, cols);
    let mut residual = DVector::<f64>::zeros(rows);

    residual.rows_mut(0, line.residuals.len()).copy_from(&line.residuals);
    for (i, (entry, blocks)) in problem.residuals().iter().zip(&line.jacobians).enumerate() {
        for (col, block) in block_columns(entry.knot()).iter().zip(blocks) {
            jacobian.view_mut((2 * i, *col), (2, 6)).copy_from(block);
        }
    }
    let mut row = line.residuals.len();
    for (k, prior) in priors.iter().enumerate() {
        let evaluation = prior.evaluate(&[Vector6::zeros(); 4], [true; 4]);
        residual.rows_mut(row, 12).copy_from(&evaluation.residual);
        for (col, block) in block_columns(k).iter().zip(&evaluation.jacobians) {
            let block = block.ok_or("block was requested")?;
            jacobian.view_mut((row, *col), (12, 6)).copy_from(&block);
        }
        row += 12;
    }

    let hessian = jacobian.transpose() * &jacobian + DMatrix::<f64>::identity(cols, cols) * 1e-9;
    let gradient = jacobian.transpose() * &residual;
    let step = hessian
        .cholesky()
        .ok_or("normal equations are not positive definite")?
        .solve(&(-gradient));
    let update: Vec<KnotPerturbation> = (0..NUM_KNOTS)
        .map(|k| KnotPerturbation {
            pose: step.fixed_rows::<6>(STATE_DIMENSION * k).into_owned(),
            velocity: step.fixed_rows::<6>(STATE_DIMENSION * k + 6).into_owned(),
        })
        .collect();

    let cost_after = total_cost(&mut problem, &priors, &update)?;
    assert!(
        cost_after < 0.05 * cost_before,
        "cost {cost_before:e} -> {cost_after:e}"
    );

    // Applying the step to the estimate and re-linearizing gives the same cost at zero
    for (k, delta) in update.iter().enumerate() {
        let state = estimate.state(k).ok_or("knot")?.clone();
        let pose = SE3Tangent::from(delta.pose)
            .exp(None)
            .compose(&state.pose, None, None);
        estimate.set_state(k, pose, state.velocity + delta.velocity)?;
    }
    problem.update_operating_points(&estimate)?;
    for (k, prior) in priors.iter_mut().enumerate() {
        prior.set_operating_point(estimate.operating_point(k).ok_or("interval")?);
    }
    let relinearized = total_cost(&mut problem, &priors, &zero)?;
    assert!((relinearized - cost_after).abs() < 1e-9 * cost_before.max(1.0));
    Ok(())
}

// ============================================================================
// Point Jacobian store
// ============================================================================

#[test]
fn test_tracks_read_populated_jacobians_across_threads() -> TestResult {
    let truth = ground_truth()?;
    let window = ScanWindow::new(0, (NUM_KNOTS - 1) as u32);
    let (scans, mut tracks) = synthetic_scans(&truth, &axis_lines(), 4, &window)?;

    let store = JacobianStore::shared();
    for track in &mut tracks {
        track.bind_jacobian_source(&store)?;
    }
    let written = LineProblem::populate_point_jacobians(&store, &scans, &truth, &window)?;
    assert_eq!(written, NUM_KNOTS - 1);

    std::thread::scope(|scope| {
        let handles: Vec<_> = tracks
            .iter()
            .map(|track| {
                scope.spawn(move || {
                    (0..track.mapping().len())
                        .map(|i| track.observation_jacobian(i))
                        .collect::<Result<Vec<_>, _>>()
                })
            })
            .collect();
        for handle in handles {
            let jacobians = handle.join().expect("reader thread panicked").expect("stored");
            assert_eq!(jacobians.len(), 4 * (NUM_KNOTS - 1));
            for jacobian in jacobians {
                assert_eq!(jacobian.shape(), (3, STATE_DIMENSION));
                assert!(jacobian.iter().all(|v| v.is_finite()));
                assert!(jacobian.norm() > 0.0);
            }
        }
    });
    Ok(())
}

#[test]
fn test_stored_jacobian_matches_finite_differences() -> TestResult {
    let truth = ground_truth()?;
    let window = ScanWindow::new(0, (NUM_KNOTS - 1) as u32);
    let (scans, mut tracks) = synthetic_scans(&truth, &axis_lines(), 3, &window)?;
    let store = JacobianStore::shared();
    tracks[1].bind_jacobian_source(&store)?;
    LineProblem::populate_point_jacobians(&store, &scans, &truth, &window)?;

    // Observation in scan 1, interpolated between knots 1 and 2
    let observation = tracks[1]
        .mapping()
        .iter()
        .position(|m| m.scan_index == 1)
        .ok_or("scan 1 observation")?;
    let mapping = tracks[1].mapping()[observation];
    let stored = tracks[1].observation_jacobian(observation)?;

    let scan = scans.get(&mapping.scan_index).ok_or("scan")?;
    let point = scan.point(mapping.point_index).ok_or("point")?;
    let time = scan.timestamp(mapping.point_index).ok_or("time")?;
    let knot = mapping.state_id as usize;
    let tau = truth.fraction_in(knot, time).ok_or("inside interval")?;
    let interpolator = GpInterpolator::new(truth.interval_dt(knot).ok_or("dt")?, tau)?;
    let start = truth.state(knot).ok_or("knot")?;
    let end = truth.state(knot + 1).ok_or("knot")?;

    let transformed = |delta: &Vector6<f64>, velocity_delta: &Vector6<f64>| -> Vector3<f64> {
        let pose = SE3Tangent::from(*delta)
            .exp(None)
            .compose(&start.pose, None, None);
        let velocity = start.velocity + velocity_delta;
        interpolator
            .interpolate([&pose, &end.pose], [&velocity, &end.velocity], None)
            .pose
            .act(&point, None, None)
    };

    let step = 1e-6;
    for j in 0..STATE_DIMENSION {
        let mut plus = [Vector6::zeros(); 2];
        let mut minus = [Vector6::zeros(); 2];
        plus[j / 6][j % 6] = step;
        minus[j / 6][j % 6] = -step;
        let numeric = (transformed(&plus[0], &plus[1]) - transformed(&minus[0], &minus[1])) / (2.0 * step);
        for row in 0..3 {
            assert!(
                (stored[(row, j)] - numeric[row]).abs() < 1e-6 * numeric.norm().max(1.0),
                "column {j}, row {row}: {} vs {}",
                stored[(row, j)],
                numeric[row]
            );
        }
    }
    Ok(())
}

// ============================================================================
// Window sliding
// ============================================================================

#[test]
fn test_sliding_window_retires_old_observations() -> TestResult {
    let truth = ground_truth()?;
    let mut window = ScanWindow::new(0, (NUM_KNOTS - 1) as u32);
    let (scans, mut tracks) = synthetic_scans(&truth, &axis_lines(), 2, &window)?;
    let store = JacobianStore::shared();
    LineProblem::populate_point_jacobians(&store, &scans, &truth, &window)?;

    window.slide(1);
    for track in &mut tracks {
        assert_eq!(track.retain_window(&window), 2);
        assert_eq!(track.length(), NUM_KNOTS - 2);
        assert_eq!(track.first_scan(), Some(1));
    }
    LineProblem::populate_point_jacobians(&store, &scans, &truth, &window)?;
    let guard = store.read().map_err(|_| "store lock poisoned")?;
    assert!(guard.scan(0).is_none());
    assert!(guard.scan(1).is_some());

    let problem = LineProblem::build(&tracks, &scans, &truth, &window, &OdometryConfig::default())?;
    assert_eq!(problem.len(), 3 * 2 * (NUM_KNOTS - 2));
    assert!(problem.residuals().iter().all(|r| r.mapping().scan_index >= 1));
    Ok(())
}
