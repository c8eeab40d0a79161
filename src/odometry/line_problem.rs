//! Assembly of point-to-line residuals from the active feature tracks.
//!
//! [`LineProblem::build`] walks every active line track and creates one
//! [`PointToLineGp`] per observation inside the scan window. The residuals are then
//! evaluated in parallel with rayon against per-knot perturbations of the current
//! trajectory estimate. After a solve, [`LineProblem::populate_point_jacobians`] fills the
//! shared [`JacobianStore`] the tracks read from.

use crate::config::OdometryConfig;
use crate::error::{OdometryError, OdometryResult};
use crate::factors::{FactorEvaluation, LineWeighting, PointToLineGp, NUM_PARAMETER_BLOCKS};
use crate::gp::{GpInterpolator, GpJacobians};
use crate::odometry::feature_track::{
    FeatureTrack, JacobianStore, Mapping, ScanJacobians, ScanWindow, StateJacobianTensor,
};
use crate::odometry::trajectory::{Scan, ScanMap, Trajectory};
use nalgebra::{DVector, Matrix2, Matrix2x6, Matrix3x6, Vector6};
use rayon::prelude::*;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

/// Columns of a per-state point Jacobian: pose perturbation then velocity perturbation.
pub const STATE_DIMENSION: usize = 12;

/// Perturbation of one knot state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KnotPerturbation {
    pub pose: Vector6<f64>,
    pub velocity: Vector6<f64>,
}

/// A residual together with the observation it came from.
#[derive(Debug, Clone)]
pub struct LineResidual {
    track_index: usize,
    mapping: Mapping,
    /// Knot at the start of the residual's interval
    knot: usize,
    /// Whether the source track had a live Jacobian source when the problem was built
    jacobian_source_bound: bool,
    factor: PointToLineGp,
}

impl LineResidual {
    pub fn track_index(&self) -> usize {
        self.track_index
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    /// Knot at the start of the residual's interval; the residual also depends on
    /// `knot + 1`.
    pub fn knot(&self) -> usize {
        self.knot
    }

    pub fn is_jacobian_source_bound(&self) -> bool {
        self.jacobian_source_bound
    }

    pub fn factor(&self) -> &PointToLineGp {
        &self.factor
    }

    pub fn factor_mut(&mut self) -> &mut PointToLineGp {
        &mut self.factor
    }

    fn evaluate(
        &mut self,
        perturbations: &[KnotPerturbation],
        compute_jacobians: bool,
    ) -> FactorEvaluation<2> {
        let start = perturbations[self.knot];
        let end = perturbations[self.knot + 1];
        self.factor.evaluate(
            &[start.pose, end.pose, start.velocity, end.velocity],
            [compute_jacobians; NUM_PARAMETER_BLOCKS],
        )
    }
}

/// Stacked residuals and per-residual Jacobian blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct LineEvaluation {
    /// `2 × n_residuals` entries, residual `i` at rows `2i..2i+2`
    pub residuals: DVector<f64>,
    /// Blocks ordered start pose, end pose, start velocity, end velocity; empty when
    /// Jacobians were not requested
    pub jacobians: Vec<[Matrix2x6<f64>; NUM_PARAMETER_BLOCKS]>,
}

impl LineEvaluation {
    /// `½‖r‖²`
    pub fn cost(&self) -> f64 {
        0.5 * self.residuals.norm_squared()
    }
}

/// Point-to-line residuals of one sliding window.
#[derive(Debug, Clone, Default)]
pub struct LineProblem {
    residuals: Vec<LineResidual>,
    num_knots: usize,
}

impl LineProblem {
    /// Build residuals for every active track with at least `config.min_track_length`
    /// scans. Track geometry is read as `(point, direction)`.
    ///
    /// Observations whose timestamp falls outside their knot interval are skipped with a
    /// warning.
    ///
    /// # Errors
    /// Configuration errors, missing scans or points (`InvalidArgument`), and residual
    /// construction errors such as `DegenerateLine`.
    pub fn build(
        tracks: &[FeatureTrack],
        scans: &ScanMap,
        trajectory: &Trajectory,
        window: &ScanWindow,
        config: &OdometryConfig,
    ) -> OdometryResult<Self> {
        config.validate()?;
        let weighting = if config.use_covariance_weighting {
            LineWeighting::Covariance(config.point_covariance())
        } else {
            LineWeighting::SqrtInformation(Matrix2::identity())
        };

        let mut residuals = Vec::new();
        let mut skipped = 0usize;
        for (track_index, track) in tracks.iter().enumerate() {
            if !track.is_active() || track.length() < config.min_track_length {
                continue;
            }
            let (line_point, direction) = track.line();
            let line_end = line_point + direction;
            let jacobian_source_bound = track.is_jacobian_source_bound();

            for mapping in track.mapping().iter().filter(|m| window.contains(m.scan_index)) {
                let scan = scans.get(&mapping.scan_index).ok_or_else(|| {
                    OdometryError::InvalidArgument(format!(
                        "track {track_index} references missing scan {}",
                        mapping.scan_index
                    ))
                })?;
                let (point, time) = scan_point(scan, mapping)?;

                let knot = mapping.state_id as usize;
                let (Some(tau), Some(dt), Some(operating_point)) = (
                    trajectory.fraction_in(knot, time),
                    trajectory.interval_dt(knot),
                    trajectory.operating_point(knot),
                ) else {
                    warn!(
                        track_index,
                        scan_index = mapping.scan_index,
                        point_index = mapping.point_index,
                        time,
                        knot,
                        "observation time outside its knot interval, skipping"
                    );
                    skipped += 1;
                    continue;
                };

                let factor = PointToLineGp::new(
                    point,
                    line_point,
                    line_end,
                    weighting.clone(),
                    GpInterpolator::new(dt, tau)?,
                    operating_point,
                )?;
                residuals.push(LineResidual {
                    track_index,
                    mapping: *mapping,
                    knot,
                    jacobian_source_bound,
                    factor,
                });
            }
        }

        debug!(
            residuals = residuals.len(),
            tracks = tracks.len(),
            skipped,
            "built point-to-line problem"
        );
        Ok(Self {
            residuals,
            num_knots: trajectory.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.residuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residuals.is_empty()
    }

    pub fn residuals(&self) -> &[LineResidual] {
        &self.residuals
    }

    pub fn residuals_mut(&mut self) -> &mut [LineResidual] {
        &mut self.residuals
    }

    /// Re-linearize every residual about the current trajectory estimate.
    pub fn update_operating_points(&mut self, trajectory: &Trajectory) -> OdometryResult<()> {
        for residual in &mut self.residuals {
            let operating_point = trajectory.operating_point(residual.knot).ok_or_else(|| {
                OdometryError::InvalidArgument(format!("interval {} does not exist", residual.knot))
            })?;
            residual.factor.set_operating_point(operating_point);
        }
        Ok(())
    }

    /// Evaluate all residuals in parallel.
    ///
    /// `perturbations` holds one entry per trajectory knot.
    ///
    /// # Errors
    /// `InvalidArgument` if there are fewer perturbations than knots. `NotBound` if
    /// Jacobians are requested and a residual's track had no live Jacobian source when
    /// the problem was built.
    pub fn evaluate(
        &mut self,
        perturbations: &[KnotPerturbation],
        compute_jacobians: bool,
    ) -> OdometryResult<LineEvaluation> {
        if perturbations.len() < self.num_knots {
            return Err(OdometryError::InvalidArgument(format!(
                "expected {} knot perturbations, got {}",
                self.num_knots,
                perturbations.len()
            )));
        }
        if compute_jacobians {
            if let Some(unbound) = self.residuals.iter().find(|r| !r.jacobian_source_bound) {
                return Err(OdometryError::NotBound(format!(
                    "track {} has no Jacobian source",
                    unbound.track_index
                )));
            }
        }

        let evaluations: Vec<FactorEvaluation<2>> = self
            .residuals
            .par_iter_mut()
            .map(|residual| residual.evaluate(perturbations, compute_jacobians))
            .collect();

        let mut residuals = DVector::zeros(2 * evaluations.len());
        let mut jacobians = Vec::with_capacity(if compute_jacobians { evaluations.len() } else { 0 });
        for (i, evaluation) in evaluations.iter().enumerate() {
            residuals
                .fixed_rows_mut::<2>(2 * i)
                .copy_from(&evaluation.residual);
            if compute_jacobians {
                jacobians.push(evaluation.jacobians.map(|block| block.unwrap_or_else(Matrix2x6::zeros)));
            }
        }

        Ok(LineEvaluation {
            residuals,
            jacobians,
        })
    }

    /// `½‖r‖²` at the given perturbations.
    pub fn cost(&mut self, perturbations: &[KnotPerturbation]) -> OdometryResult<f64> {
        Ok(self.evaluate(perturbations, false)?.cost())
    }

    /// Fill `store` with the 3 × 12 Jacobian of every transformed point with respect to
    /// the pose and velocity of each knot it depends on, for every scan in `window`.
    ///
    /// Points outside the trajectory keep zero blocks. Returns the number of scans written.
    pub fn populate_point_jacobians(
        store: &RwLock<JacobianStore>,
        scans: &ScanMap,
        trajectory: &Trajectory,
        window: &ScanWindow,
    ) -> OdometryResult<usize> {
        let in_window: Vec<(u32, &Scan)> = scans
            .range(window.iter())
            .map(|(index, scan)| (*index, scan))
            .collect();

        let computed = in_window
            .par_iter()
            .map(|(scan_index, scan)| {
                scan_point_jacobians(scan, trajectory).map(|jacobians| (*scan_index, jacobians))
            })
            .collect::<OdometryResult<Vec<_>>>()?;

        let mut guard = store.write().unwrap_or_else(PoisonError::into_inner);
        guard.retain_window(window);
        let mut written = 0;
        for (scan_index, jacobians) in computed {
            if let Some(jacobians) = jacobians {
                guard.insert_scan(scan_index, jacobians);
                written += 1;
            }
        }
        debug!(scans = written, "populated point Jacobians");
        Ok(written)
    }
}

fn scan_point(scan: &Scan, mapping: &Mapping) -> OdometryResult<(nalgebra::Vector3<f64>, f64)> {
    scan.point(mapping.point_index)
        .zip(scan.timestamp(mapping.point_index))
        .ok_or_else(|| {
            OdometryError::InvalidArgument(format!(
                "scan {} has no point {}",
                mapping.scan_index, mapping.point_index
            ))
        })
}

/// Per-state point Jacobians of one scan, or `None` if no point lies on the trajectory.
fn scan_point_jacobians(
    scan: &Scan,
    trajectory: &Trajectory,
) -> OdometryResult<Option<ScanJacobians>> {
    let located: Vec<Option<(usize, f64)>> = scan
        .timestamps()
        .iter()
        .map(|t| trajectory.locate(*t))
        .collect();
    let outside = located.iter().filter(|l| l.is_none()).count();
    if outside > 0 {
        warn!(outside, points = scan.len(), "scan points outside the trajectory");
    }

    let Some(first_knot) = located.iter().flatten().map(|(k, _)| *k).min() else {
        return Ok(None);
    };
    let last_knot = located.iter().flatten().map(|(k, _)| *k + 1).max().unwrap_or(first_knot + 1);

    let mut tensors =
        vec![StateJacobianTensor::zeros(STATE_DIMENSION, scan.len()); last_knot - first_knot + 1];
    let mut gp_jacobians = GpJacobians::default();
    for (point_index, location) in located.iter().enumerate() {
        let (Some((knot, tau)), Some(point)) = (location, scan.point(point_index)) else {
            continue;
        };
        let (Some(dt), Some(start), Some(end)) = (
            trajectory.interval_dt(*knot),
            trajectory.state(*knot),
            trajectory.state(*knot + 1),
        ) else {
            continue;
        };

        let interpolated = GpInterpolator::new(dt, *tau)?.interpolate(
            [&start.pose, &end.pose],
            [&start.velocity, &end.velocity],
            Some(&mut gp_jacobians),
        );
        let (_, point_jacobian) = interpolated.pose.transform_point(&point);

        let offset = *knot - first_knot;
        let per_state: [(Matrix3x6<f64>, Matrix3x6<f64>); 2] = [
            (
                point_jacobian * gp_jacobians.start_pose,
                point_jacobian * gp_jacobians.start_velocity,
            ),
            (
                point_jacobian * gp_jacobians.end_pose,
                point_jacobian * gp_jacobians.end_velocity,
            ),
        ];
        for (tensor, (pose, velocity)) in tensors[offset..offset + 2].iter_mut().zip(per_state) {
            if let Some(mut block) = tensor.point_block_mut(point_index) {
                block.columns_mut(0, 6).copy_from(&pose);
                block.columns_mut(6, 6).copy_from(&velocity);
            }
        }
    }

    Ok(Some(ScanJacobians {
        first_state: first_knot as u32,
        tensors,
    }))
}
