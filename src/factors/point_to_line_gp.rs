//! Point-to-line residual for a LiDAR point observed between two GP knots.
//!
//! # Mathematical Formulation
//!
//! ```text
//! T(τ)  = GP interpolation of (T_k, T_k+1, ϖ_k, ϖ_k+1) at the point's time fraction τ
//! p'    = T(τ) p                       raw sensor point mapped into the map frame
//! d     = p' − a                       offset from the line reference point
//! r     = W S R d                      2-D residual
//! ```
//!
//! `R` rotates the line direction `u = (b − a)/‖b − a‖` onto the x axis, `S = [0 1 0; 0 0 1]`
//! drops the along-line component and `W` is the square-root information of the 2-D
//! error (`WᵀW = (S R Σ Rᵀ Sᵀ)⁻¹` when derived from the point covariance `Σ`).
//!
//! # Jacobian Computation
//!
//! ```text
//! ∂r/∂δ_b = W S R [I  −[p']×] J_interp[b] J_param[b]
//! ```
//!
//! with `J_param = J_l(δ)` for the pose blocks and `I` for the velocity blocks.

use crate::error::{OdometryError, OdometryResult};
use crate::factors::{
    evaluate_into_buffers, CostFunction, FactorEvaluation, GpOperatingPoint,
    GP_PARAMETER_BLOCK_SIZES, NUM_PARAMETER_BLOCKS,
};
use crate::gp::{GpInterpolator, GpJacobians};
use crate::manifold::se3::SE3;
use crate::manifold::LieGroup;
use nalgebra::{Cholesky, Matrix2, Matrix2x3, Matrix3, Matrix3x6, Rotation3, Vector3, Vector6};

/// Line points closer than this are treated as coincident.
pub const DEGENERATE_LINE_TOLERANCE: f64 = 1e-12;

/// How the 2-D weight matrix of a residual is obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum LineWeighting {
    /// Derive `W` from the 3×3 covariance of the measured point
    Covariance(Matrix3<f64>),
    /// Use this square-root information matrix as is
    SqrtInformation(Matrix2<f64>),
}

/// Per-call intermediate values, overwritten at the start of every evaluation.
#[derive(Debug, Clone)]
struct GpScratch {
    twist: Vector6<f64>,
    transform: SE3,
    interpolation: GpJacobians,
    point_jacobian: Matrix3x6<f64>,
    composed_jacobian: Matrix3x6<f64>,
}

impl Default for GpScratch {
    fn default() -> Self {
        Self {
            twist: Vector6::zeros(),
            transform: SE3::identity(),
            interpolation: GpJacobians::default(),
            point_jacobian: Matrix3x6::zeros(),
            composed_jacobian: Matrix3x6::zeros(),
        }
    }
}

/// Rotation `R` with `R u = e_x` for the direction from `a` to `b`.
fn line_rotation(a: &Vector3<f64>, b: &Vector3<f64>) -> OdometryResult<Matrix3<f64>> {
    let diff = b - a;
    let length = diff.norm();
    if !(length >= DEGENERATE_LINE_TOLERANCE) {
        return Err(OdometryError::DegenerateLine(format!(
            "line points are {length:e} apart"
        )));
    }
    let direction = diff / length;
    let rotation = Rotation3::rotation_between(&direction, &Vector3::x())
        .unwrap_or_else(|| Rotation3::from_axis_angle(&Vector3::z_axis(), std::f64::consts::PI));
    Ok(rotation.into_inner())
}

/// Square-root information of the projected covariance, upper triangular.
fn weight_from_covariance(
    rotation: &Matrix3<f64>,
    covariance: &Matrix3<f64>,
) -> OdometryResult<Matrix2<f64>> {
    let projection: Matrix2x3<f64> = rotation.fixed_rows::<2>(1).into_owned();
    let projected = projection * covariance * projection.transpose();
    let information = Cholesky::new(projected)
        .map(|chol| chol.inverse())
        .ok_or_else(|| {
            OdometryError::InvalidArgument(
                "projected point covariance is not positive definite".to_string(),
            )
        })?;
    let weight = Cholesky::new(information)
        .map(|chol| chol.l().transpose())
        .ok_or_else(|| {
            OdometryError::InvalidArgument(
                "point information matrix is not positive definite".to_string(),
            )
        })?;
    if weight.iter().any(|v| !v.is_finite()) {
        return Err(OdometryError::InvalidArgument(
            "point information matrix is not finite".to_string(),
        ));
    }
    Ok(weight)
}

/// Residual of a raw LiDAR point against a map line, interpolated between two knots.
#[derive(Debug, Clone)]
pub struct PointToLineGp {
    point: Vector3<f64>,
    line_a: Vector3<f64>,
    line_b: Vector3<f64>,
    weighting: LineWeighting,
    weight_matrix: Matrix2<f64>,
    rotation: Matrix3<f64>,
    interpolator: GpInterpolator,
    operating_point: GpOperatingPoint,
    scratch: GpScratch,
}

impl PointToLineGp {
    /// Build a residual for `point` (sensor frame) against the line through `line_a` and
    /// `line_b` (map frame).
    ///
    /// # Errors
    /// `DegenerateLine` if the line points coincide; `InvalidArgument` if the covariance
    /// weighting does not yield a positive definite information matrix.
    pub fn new(
        point: Vector3<f64>,
        line_a: Vector3<f64>,
        line_b: Vector3<f64>,
        weighting: LineWeighting,
        interpolator: GpInterpolator,
        operating_point: GpOperatingPoint,
    ) -> OdometryResult<Self> {
        let rotation = line_rotation(&line_a, &line_b)?;
        let weight_matrix = match &weighting {
            LineWeighting::Covariance(covariance) => weight_from_covariance(&rotation, covariance)?,
            LineWeighting::SqrtInformation(weight) => *weight,
        };

        Ok(Self {
            point,
            line_a,
            line_b,
            weighting,
            weight_matrix,
            rotation,
            interpolator,
            operating_point,
            scratch: GpScratch::default(),
        })
    }

    /// Replace the line; the residual is left unchanged on error.
    pub fn set_line(&mut self, line_a: Vector3<f64>, line_b: Vector3<f64>) -> OdometryResult<()> {
        let rotation = line_rotation(&line_a, &line_b)?;
        if let LineWeighting::Covariance(covariance) = &self.weighting {
            self.weight_matrix = weight_from_covariance(&rotation, covariance)?;
        }
        self.rotation = rotation;
        self.line_a = line_a;
        self.line_b = line_b;
        Ok(())
    }

    /// Move the point's time fraction within the knot interval.
    pub fn set_time_fraction(&mut self, tau: f64) -> OdometryResult<()> {
        self.interpolator.set_fraction(tau)
    }

    pub fn set_operating_point(&mut self, operating_point: GpOperatingPoint) {
        self.operating_point = operating_point;
    }

    pub fn operating_point(&self) -> &GpOperatingPoint {
        &self.operating_point
    }

    pub fn point(&self) -> &Vector3<f64> {
        &self.point
    }

    pub fn line(&self) -> (&Vector3<f64>, &Vector3<f64>) {
        (&self.line_a, &self.line_b)
    }

    pub fn weight_matrix(&self) -> &Matrix2<f64> {
        &self.weight_matrix
    }

    /// `R` with `R u = e_x`.
    pub fn line_rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    pub fn interpolator(&self) -> &GpInterpolator {
        &self.interpolator
    }

    /// Interpolated transform of the most recent evaluation.
    pub fn last_transform(&self) -> &SE3 {
        &self.scratch.transform
    }

    /// Interpolated twist of the most recent evaluation.
    pub fn last_twist(&self) -> &Vector6<f64> {
        &self.scratch.twist
    }

    /// Evaluate the residual at the given perturbations of the operating point.
    ///
    /// Jacobian blocks are computed only where `requested` is set.
    pub fn evaluate(
        &mut self,
        perturbations: &[Vector6<f64>; NUM_PARAMETER_BLOCKS],
        requested: [bool; NUM_PARAMETER_BLOCKS],
    ) -> FactorEvaluation<2> {
        let states = self.operating_point.perturbed(perturbations);
        let need_jacobians = requested.iter().any(|r| *r);

        self.scratch.interpolation = GpJacobians::default();
        let interpolated = self.interpolator.interpolate(
            [&states.poses[0], &states.poses[1]],
            [&states.velocities[0], &states.velocities[1]],
            need_jacobians.then_some(&mut self.scratch.interpolation),
        );

        let (transformed, point_jacobian) = interpolated.pose.transform_point(&self.point);
        self.scratch.point_jacobian = point_jacobian;
        self.scratch.transform = interpolated.pose;
        self.scratch.twist = interpolated.twist;

        let weighted_projection: Matrix2x3<f64> =
            self.weight_matrix * self.rotation.fixed_rows::<2>(1);
        let residual = weighted_projection * (transformed - self.line_a);

        let mut jacobians = [None; NUM_PARAMETER_BLOCKS];
        for (block, jacobian) in jacobians.iter_mut().enumerate() {
            if !requested[block] {
                continue;
            }
            let mut state_jacobian = *self.scratch.interpolation.blocks()[block];
            if block < 2 {
                state_jacobian *= states.pose_jacobians[block];
            }
            self.scratch.composed_jacobian = self.scratch.point_jacobian * state_jacobian;
            *jacobian = Some(weighted_projection * self.scratch.composed_jacobian);
        }

        FactorEvaluation {
            residual,
            jacobians,
        }
    }
}

impl CostFunction for PointToLineGp {
    fn num_residuals(&self) -> usize {
        2
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
            PointToLineGp::evaluate(self, perturbations, requested)
        })
    }
}
