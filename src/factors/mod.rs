//! Residual factors over two GP knots.
//!
//! Every factor in this module is parameterized by the same four 6-D perturbation
//! blocks, in this order:
//!
//! | block | meaning                     | applied as              |
//! |-------|-----------------------------|-------------------------|
//! | 0     | start pose perturbation δ₀  | `T_k = exp(δ₀^) T̄_k`    |
//! | 1     | end pose perturbation δ₁    | `T_k+1 = exp(δ₁^) T̄_k+1` |
//! | 2     | start velocity change       | `ϖ_k = ϖ̄_k + δ₂`        |
//! | 3     | end velocity change         | `ϖ_k+1 = ϖ̄_k+1 + δ₃`    |
//!
//! The operating point `(T̄, ϖ̄)` is fixed at construction ([`GpOperatingPoint`]). A
//! typed `evaluate` on each factor returns fixed-size residuals and Jacobian blocks; the
//! [`CostFunction`] trait exposes the same computation through caller-allocated flat
//! buffers for an external least-squares solver.

use crate::manifold::se3::{SE3Tangent, SE3};
use crate::manifold::{LieGroup, Tangent};
use nalgebra::{DMatrix, DVector, Matrix6, SMatrix, SVector, Vector6};

pub mod gp_prior;
pub mod point_to_line_gp;

pub use gp_prior::GpPriorFactor;
pub use point_to_line_gp::{LineWeighting, PointToLineGp};

/// Dimension of every perturbation block.
pub const PARAMETER_BLOCK_SIZE: usize = 6;

/// Number of perturbation blocks of a two-knot factor.
pub const NUM_PARAMETER_BLOCKS: usize = 4;

pub(crate) const GP_PARAMETER_BLOCK_SIZES: [usize; NUM_PARAMETER_BLOCKS] =
    [PARAMETER_BLOCK_SIZE; NUM_PARAMETER_BLOCKS];

/// Solver-facing calling convention.
///
/// Parameter blocks and Jacobian buffers are caller allocated. Each Jacobian buffer is
/// row-major `num_residuals × parameter_block_sizes()[i]`; a `None` entry means the block
/// is not requested. `evaluate` borrows the factor mutably so that its scratch space is
/// never shared between concurrent calls.
pub trait CostFunction: Send {
    /// Dimension of the residual vector
    fn num_residuals(&self) -> usize;

    /// Dimension of each parameter block
    fn parameter_block_sizes(&self) -> &[usize];

    /// Evaluate residuals and the requested Jacobian blocks.
    ///
    /// Returns `false` only when the buffer shapes do not match the factor.
    fn evaluate(
        &mut self,
        parameters: &[&[f64]],
        residuals: &mut [f64],
        jacobians: Option<&mut [Option<&mut [f64]>]>,
    ) -> bool;

    /// Evaluate with owned vectors and return the residual with the horizontally stacked
    /// Jacobian `[J₀ | J₁ | …]`.
    ///
    /// Returns `None` when the parameter shapes do not match.
    fn linearize(
        &mut self,
        parameters: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> Option<(DVector<f64>, Option<DMatrix<f64>>)> {
        let sizes = self.parameter_block_sizes().to_vec();
        let rows = self.num_residuals();
        let slices: Vec<&[f64]> = parameters.iter().map(|p| p.as_slice()).collect();
        let mut residuals = vec![0.0; rows];

        if !compute_jacobian {
            return self
                .evaluate(&slices, &mut residuals, None)
                .then(|| (DVector::from_vec(residuals), None));
        }

        let mut buffers: Vec<Vec<f64>> = sizes.iter().map(|size| vec![0.0; rows * size]).collect();
        let ok = {
            let mut views: Vec<Option<&mut [f64]>> = buffers
                .iter_mut()
                .map(|buffer| Some(buffer.as_mut_slice()))
                .collect();
            self.evaluate(&slices, &mut residuals, Some(views.as_mut_slice()))
        };
        if !ok {
            return None;
        }

        let mut jacobian = DMatrix::zeros(rows, sizes.iter().sum());
        let mut col = 0;
        for (buffer, size) in buffers.iter().zip(&sizes) {
            jacobian
                .view_mut((0, col), (rows, *size))
                .copy_from(&DMatrix::from_row_slice(rows, *size, buffer));
            col += size;
        }
        Some((DVector::from_vec(residuals), Some(jacobian)))
    }
}

/// Residual and requested Jacobian blocks of a two-knot factor.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorEvaluation<const R: usize> {
    pub residual: SVector<f64, R>,
    /// One entry per perturbation block; `None` when the block was not requested
    pub jacobians: [Option<SMatrix<f64, R, 6>>; NUM_PARAMETER_BLOCKS],
}

/// Linearization point of the two boundary knots.
#[derive(Debug, Clone, PartialEq)]
pub struct GpOperatingPoint {
    pub start_pose: SE3,
    pub end_pose: SE3,
    pub start_velocity: Vector6<f64>,
    pub end_velocity: Vector6<f64>,
}

/// Boundary states after applying a set of perturbations to an operating point.
#[derive(Debug, Clone)]
pub struct BoundaryStates {
    pub poses: [SE3; 2],
    pub velocities: [Vector6<f64>; 2],
    /// `J_l(δ)` of each pose perturbation
    pub pose_jacobians: [Matrix6<f64>; 2],
}

impl GpOperatingPoint {
    pub fn new(
        start_pose: SE3,
        end_pose: SE3,
        start_velocity: Vector6<f64>,
        end_velocity: Vector6<f64>,
    ) -> Self {
        Self {
            start_pose,
            end_pose,
            start_velocity,
            end_velocity,
        }
    }

    /// `T = exp(δ^) T̄` for the poses, `ϖ = ϖ̄ + δ` for the velocities.
    pub fn perturbed(&self, perturbations: &[Vector6<f64>; NUM_PARAMETER_BLOCKS]) -> BoundaryStates {
        let mut pose_jacobians = [Matrix6::zeros(); 2];
        let [start_jacobian, end_jacobian] = &mut pose_jacobians;
        let start = SE3Tangent::from(perturbations[0])
            .exp(Some(start_jacobian))
            .compose(&self.start_pose, None, None);
        let end = SE3Tangent::from(perturbations[1])
            .exp(Some(end_jacobian))
            .compose(&self.end_pose, None, None);

        BoundaryStates {
            poses: [start, end],
            velocities: [
                self.start_velocity + perturbations[2],
                self.end_velocity + perturbations[3],
            ],
            pose_jacobians,
        }
    }
}

/// Copy a fixed-size block into a row-major buffer.
fn write_row_major<const R: usize>(block: &SMatrix<f64, R, 6>, out: &mut [f64]) {
    for (r, row) in out.chunks_exact_mut(PARAMETER_BLOCK_SIZE).enumerate().take(R) {
        for (c, value) in row.iter_mut().enumerate() {
            *value = block[(r, c)];
        }
    }
}

/// Shared body of the [`CostFunction`] implementations: validate the buffer shapes,
/// unpack the four perturbation blocks, run the typed evaluation, and scatter the result.
pub(crate) fn evaluate_into_buffers<const R: usize, F>(
    parameters: &[&[f64]],
    residuals: &mut [f64],
    jacobians: Option<&mut [Option<&mut [f64]>]>,
    evaluate: F,
) -> bool
where
    F: FnOnce(&[Vector6<f64>; NUM_PARAMETER_BLOCKS], [bool; NUM_PARAMETER_BLOCKS]) -> FactorEvaluation<R>,
{
    if parameters.len() != NUM_PARAMETER_BLOCKS
        || parameters.iter().any(|p| p.len() != PARAMETER_BLOCK_SIZE)
        || residuals.len() != R
    {
        return false;
    }

    let mut requested = [false; NUM_PARAMETER_BLOCKS];
    if let Some(buffers) = jacobians.as_deref() {
        if buffers.len() != NUM_PARAMETER_BLOCKS {
            return false;
        }
        for (flag, buffer) in requested.iter_mut().zip(buffers) {
            if let Some(buffer) = buffer {
                if buffer.len() != R * PARAMETER_BLOCK_SIZE {
                    return false;
                }
                *flag = true;
            }
        }
    }

    let perturbations: [Vector6<f64>; NUM_PARAMETER_BLOCKS] =
        std::array::from_fn(|i| Vector6::from_column_slice(parameters[i]));
    let evaluation = evaluate(&perturbations, requested);

    residuals.copy_from_slice(evaluation.residual.as_slice());
    if let Some(buffers) = jacobians {
        for (buffer, block) in buffers.iter_mut().zip(&evaluation.jacobians) {
            if let (Some(out), Some(block)) = (buffer.as_deref_mut(), block) {
                write_row_major(block, out);
            }
        }
    }
    true
}
