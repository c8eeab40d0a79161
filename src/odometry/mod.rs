//! Sliding-window bookkeeping around the residuals: feature tracks, knot trajectory,
//! scans, and assembly of the point-to-line problem.

pub mod feature_track;
pub mod line_problem;
pub mod trajectory;

pub use feature_track::{
    FeatureTrack, JacobianStore, Mapping, ScanJacobians, ScanWindow, StateJacobianTensor,
};
pub use line_problem::{KnotPerturbation, LineEvaluation, LineProblem, LineResidual, STATE_DIMENSION};
pub use trajectory::{Scan, ScanMap, Trajectory, TrajectoryState};
