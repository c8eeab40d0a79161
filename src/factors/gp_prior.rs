//! WNOA motion-prior factor between two consecutive knots.
//!
//! ```text
//! ξ = log(T_k+1 T_k⁻¹)
//! e = [ ξ − Δt ϖ_k                   ]
//!     [ (I − ½ ad(ξ)) ϖ_k+1 − ϖ_k    ]
//! r = L e,    LᵀL = Q(Δt)⁻¹
//! ```
//!
//! The residual vanishes on a constant-velocity trajectory `T_k+1 = exp(Δt ϖ^) T_k`,
//! `ϖ_k = ϖ_k+1 = ϖ`.

use crate::factors::{
    evaluate_into_buffers, CostFunction, FactorEvaluation, GpOperatingPoint,
    GP_PARAMETER_BLOCK_SIZES, NUM_PARAMETER_BLOCKS,
};
use crate::gp::interpolation::approx_left_jacobian_inv;
use crate::gp::WnoaPrior;
use crate::manifold::se3::SE3Tangent;
use crate::manifold::{LieGroup, Tangent};
use nalgebra::{Matrix6, SMatrix, SVector, Vector6};

type Matrix12x6 = SMatrix<f64, 12, 6>;

/// Stack two 6×6 blocks vertically.
fn stack(top: &Matrix6<f64>, bottom: &Matrix6<f64>) -> Matrix12x6 {
    let mut m = Matrix12x6::zeros();
    m.fixed_view_mut::<6, 6>(0, 0).copy_from(top);
    m.fixed_view_mut::<6, 6>(6, 0).copy_from(bottom);
    m
}

#[derive(Debug, Clone)]
pub struct GpPriorFactor {
    prior: WnoaPrior,
    operating_point: GpOperatingPoint,
}

impl GpPriorFactor {
    pub fn new(prior: WnoaPrior, operating_point: GpOperatingPoint) -> Self {
        Self {
            prior,
            operating_point,
        }
    }

    pub fn prior(&self) -> &WnoaPrior {
        &self.prior
    }

    pub fn set_operating_point(&mut self, operating_point: GpOperatingPoint) {
        self.operating_point = operating_point;
    }

    pub fn evaluate(
        &self,
        perturbations: &[Vector6<f64>; NUM_PARAMETER_BLOCKS],
        requested: [bool; NUM_PARAMETER_BLOCKS],
    ) -> FactorEvaluation<12> {
        let states = self.operating_point.perturbed(perturbations);
        let [start, end] = &states.poses;
        let [start_velocity, end_velocity] = &states.velocities;
        let dt = self.prior.dt();

        let xi = end.compose(&start.inverse(None), None, None).log(None);
        let jt_inv = approx_left_jacobian_inv(&xi);

        let mut error = SVector::<f64, 12>::zeros();
        error
            .fixed_rows_mut::<6>(0)
            .copy_from(&(xi.coeffs() - start_velocity * dt));
        error
            .fixed_rows_mut::<6>(6)
            .copy_from(&(jt_inv * end_velocity - start_velocity));

        let sqrt_information = self.prior.sqrt_information();
        let residual = sqrt_information * error;

        let mut jacobians = [None; NUM_PARAMETER_BLOCKS];
        if requested.iter().any(|r| *r) {
            let half_ad_end = 0.5 * SE3Tangent::from(*end_velocity).ad();
            let d_xi_start = -xi.right_jacobian_inv();
            let d_xi_end = xi.left_jacobian_inv();

            let blocks = [
                stack(&d_xi_start, &(half_ad_end * d_xi_start)) * states.pose_jacobians[0],
                stack(&d_xi_end, &(half_ad_end * d_xi_end)) * states.pose_jacobians[1],
                stack(&(-Matrix6::identity() * dt), &(-Matrix6::identity())),
                stack(&Matrix6::zeros(), &jt_inv),
            ];
            for ((jacobian, block), wanted) in jacobians.iter_mut().zip(&blocks).zip(requested) {
                if wanted {
                    *jacobian = Some(sqrt_information * block);
                }
            }
        }

        FactorEvaluation {
            residual,
            jacobians,
        }
    }
}

impl CostFunction for GpPriorFactor {
    fn num_residuals(&self) -> usize {
        12
    }

    fn parameter_block_sizes(&self) -> &[usize] {
        &GP_PARAMETER_BLOCK_SIZES
    }

    fn evaluate(
        &mut self,
        parameters: &[&[f64]],
        residuals: &mut [f64],
        jacobians: Option<&mut [Option<&mut [f64]>]>,
    ) -> bool {
        evaluate_into_buffers(parameters, residuals, jacobians, |perturbations, requested| {
            GpPriorFactor::evaluate(self, perturbations, requested)
        })
    }
}
