//! Knot states of the continuous-time trajectory and the scans measured along it.

use crate::config::GpPriorConfig;
use crate::error::{OdometryError, OdometryResult};
use crate::factors::{GpOperatingPoint, GpPriorFactor};
use crate::gp::WnoaPrior;
use crate::manifold::se3::SE3;
use nalgebra::{Matrix3xX, Vector3, Vector6};
use std::collections::BTreeMap;

/// Pose and spatial twist of the trajectory at one knot time.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryState {
    pub time: f64,
    pub pose: SE3,
    pub velocity: Vector6<f64>,
}

impl TrajectoryState {
    pub fn new(time: f64, pose: SE3, velocity: Vector6<f64>) -> Self {
        Self {
            time,
            pose,
            velocity,
        }
    }
}

/// Knot states ordered by strictly increasing time.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    states: Vec<TrajectoryState>,
}

impl Trajectory {
    /// # Errors
    /// `InvalidArgument` for fewer than two states or times that are not finite and
    /// strictly increasing.
    pub fn new(states: Vec<TrajectoryState>) -> OdometryResult<Self> {
        if states.len() < 2 {
            return Err(OdometryError::InvalidArgument(format!(
                "a trajectory needs at least two knots, got {}",
                states.len()
            )));
        }
        if states.iter().any(|s| !s.time.is_finite()) {
            return Err(OdometryError::InvalidArgument(
                "knot times must be finite".to_string(),
            ));
        }
        if let Some(k) = states.windows(2).position(|w| w[1].time <= w[0].time) {
            return Err(OdometryError::InvalidArgument(format!(
                "knot times must be strictly increasing (knot {} at {} follows {})",
                k + 1,
                states[k + 1].time,
                states[k].time
            )));
        }
        Ok(Self { states })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> &[TrajectoryState] {
        &self.states
    }

    pub fn state(&self, k: usize) -> Option<&TrajectoryState> {
        self.states.get(k)
    }

    /// Replace the state of knot `k`, e.g. after applying a solver update.
    pub fn set_state(&mut self, k: usize, pose: SE3, velocity: Vector6<f64>) -> OdometryResult<()> {
        let state = self.states.get_mut(k).ok_or_else(|| {
            OdometryError::InvalidArgument(format!("knot {k} does not exist"))
        })?;
        state.pose = pose;
        state.velocity = velocity;
        Ok(())
    }

    pub fn start_time(&self) -> f64 {
        self.states.first().map_or(f64::NAN, |s| s.time)
    }

    pub fn end_time(&self) -> f64 {
        self.states.last().map_or(f64::NAN, |s| s.time)
    }

    /// Knot `k` with `t_k ≤ t ≤ t_k+1` and the fraction `τ` of `t` in that interval.
    ///
    /// Returns `None` if `t` lies outside the trajectory.
    pub fn locate(&self, t: f64) -> Option<(usize, f64)> {
        if !(t >= self.start_time() && t <= self.end_time()) {
            return None;
        }
        let upper = self.states.partition_point(|s| s.time <= t);
        let k = upper.saturating_sub(1).min(self.states.len() - 2);
        Some((k, self.fraction_in(k, t)?))
    }

    /// Fraction of `t` within interval `k`, or `None` if `t` is outside it.
    pub fn fraction_in(&self, k: usize, t: f64) -> Option<f64> {
        let start = self.states.get(k)?.time;
        let dt = self.interval_dt(k)?;
        let tau = (t - start) / dt;
        (0.0..=1.0).contains(&tau).then_some(tau)
    }

    /// `t_k+1 − t_k`.
    pub fn interval_dt(&self, k: usize) -> Option<f64> {
        Some(self.states.get(k + 1)?.time - self.states.get(k)?.time)
    }

    /// Current estimate of knots `k` and `k + 1` as a linearization point.
    pub fn operating_point(&self, k: usize) -> Option<GpOperatingPoint> {
        let start = self.states.get(k)?;
        let end = self.states.get(k + 1)?;
        Some(GpOperatingPoint::new(
            start.pose.clone(),
            end.pose.clone(),
            start.velocity,
            end.velocity,
        ))
    }

    /// WNOA prior of interval `k`.
    pub fn prior(&self, k: usize, config: &GpPriorConfig) -> OdometryResult<WnoaPrior> {
        let dt = self.interval_dt(k).ok_or_else(|| {
            OdometryError::InvalidArgument(format!("interval {k} does not exist"))
        })?;
        WnoaPrior::from_config(dt, config)
    }

    /// One motion-prior factor per interval.
    pub fn prior_factors(&self, config: &GpPriorConfig) -> OdometryResult<Vec<GpPriorFactor>> {
        (0..self.states.len() - 1)
            .map(|k| {
                let prior = self.prior(k, config)?;
                let operating_point = self.operating_point(k).ok_or_else(|| {
                    OdometryError::InvalidArgument(format!("interval {k} does not exist"))
                })?;
                Ok(GpPriorFactor::new(prior, operating_point))
            })
            .collect()
    }
}

/// Raw points of one LiDAR sweep, each with its own timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    points: Matrix3xX<f64>,
    timestamps: Vec<f64>,
}

/// Scans keyed by scan index.
pub type ScanMap = BTreeMap<u32, Scan>;

impl Scan {
    /// # Errors
    /// `InvalidArgument` if the point and timestamp counts differ.
    pub fn new(points: Matrix3xX<f64>, timestamps: Vec<f64>) -> OdometryResult<Self> {
        if points.ncols() != timestamps.len() {
            return Err(OdometryError::InvalidArgument(format!(
                "scan has {} points but {} timestamps",
                points.ncols(),
                timestamps.len()
            )));
        }
        Ok(Self { points, timestamps })
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn points(&self) -> &Matrix3xX<f64> {
        &self.points
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn point(&self, index: usize) -> Option<Vector3<f64>> {
        (index < self.points.ncols()).then(|| self.points.column(index).into_owned())
    }

    pub fn timestamp(&self, index: usize) -> Option<f64> {
        self.timestamps.get(index).copied()
    }
}
