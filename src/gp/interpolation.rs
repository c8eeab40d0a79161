//! GP pose interpolation between two knots.
//!
//! With the local variable `ξ(t) = log(T(t) T_k⁻¹)` the WNOA posterior mean at a query
//! fraction `τ` is
//!
//! ```text
//! ξ(τ) = hat · [0; ϖ_k] + candle · [ξ_{k+1}; (I − ½ ad(ξ_{k+1})) ϖ_{k+1}]
//! T(τ) = exp(ξ(τ)) T_k
//! ```
//!
//! where `hat` and `candle` are the pose rows of `Λ(τ)` and `Ψ(τ)`. Under WNOA they reduce
//! to cubic Hermite polynomials in `τ`, which is what [`GpInterpolator`] stores.

use crate::error::{OdometryError, OdometryResult};
use crate::gp::prior::{process_covariance, transition, Matrix12, WnoaPrior};
use crate::manifold::se3::{SE3Tangent, SE3};
use crate::manifold::{LieGroup, Tangent};
use nalgebra::{Matrix6, SMatrix, Vector6};

/// Pose rows of an interpolation matrix: 6 × `[ξ; ξ̇]`.
pub type Matrix6x12 = SMatrix<f64, 6, 12>;

/// Partials of the interpolated pose with respect to the four boundary states.
///
/// Pose blocks are taken with respect to left perturbations of the knot poses,
/// velocity blocks with respect to additive changes of the knot twists.
#[derive(Debug, Clone, PartialEq)]
pub struct GpJacobians {
    pub start_pose: Matrix6<f64>,
    pub end_pose: Matrix6<f64>,
    pub start_velocity: Matrix6<f64>,
    pub end_velocity: Matrix6<f64>,
}

impl Default for GpJacobians {
    fn default() -> Self {
        Self {
            start_pose: Matrix6::zeros(),
            end_pose: Matrix6::zeros(),
            start_velocity: Matrix6::zeros(),
            end_velocity: Matrix6::zeros(),
        }
    }
}

impl GpJacobians {
    /// Blocks in parameter order: start pose, end pose, start velocity, end velocity.
    pub fn blocks(&self) -> [&Matrix6<f64>; 4] {
        [
            &self.start_pose,
            &self.end_pose,
            &self.start_velocity,
            &self.end_velocity,
        ]
    }
}

/// Interpolated state at the query time.
#[derive(Debug, Clone, PartialEq)]
pub struct GpInterpolation {
    pub pose: SE3,
    /// Spatial twist `ϖ(τ)` with `Ṫ = ϖ^ T`
    pub twist: Vector6<f64>,
}

/// Hat/candle coefficients for one query fraction in one knot interval.
#[derive(Debug, Clone, PartialEq)]
pub struct GpInterpolator {
    dt: f64,
    tau: f64,
    hat: Matrix6x12,
    candle: Matrix6x12,
    hat_dot: Matrix6x12,
    candle_dot: Matrix6x12,
}

fn check_fraction(tau: f64) -> OdometryResult<()> {
    if !(0.0..=1.0).contains(&tau) {
        return Err(OdometryError::DomainError(format!(
            "interpolation fraction must lie in [0, 1], got {tau}"
        )));
    }
    Ok(())
}

fn blocks(a: f64, b: f64) -> Matrix6x12 {
    let mut m = Matrix6x12::zeros();
    m.fixed_view_mut::<6, 6>(0, 0)
        .copy_from(&(Matrix6::identity() * a));
    m.fixed_view_mut::<6, 6>(0, 6)
        .copy_from(&(Matrix6::identity() * b));
    m
}

/// `(I − ½ ad(ξ))`, the first-order inverse left Jacobian.
///
/// Its determinant is `(1 + ‖θ‖²/4)²`, so it is invertible for every `ξ`.
pub(crate) fn approx_left_jacobian_inv(xi: &SE3Tangent) -> Matrix6<f64> {
    Matrix6::identity() - 0.5 * xi.ad()
}

/// General GP regression matrices `(Λ(τ), Ψ(τ))` for a prior.
///
/// ```text
/// Ψ(τ) = Q(τΔt) Φ(Δt, τΔt)ᵀ Q(Δt)⁻¹
/// Λ(τ) = Φ(τΔt, 0) − Ψ(τ) Φ(Δt, 0)
/// ```
///
/// The Hermite coefficients stored by [`GpInterpolator`] are the rows of these matrices;
/// this is the reference form they reduce from.
pub fn regression_matrices(prior: &WnoaPrior, tau: f64) -> OdometryResult<(Matrix12, Matrix12)> {
    check_fraction(tau)?;
    let dt = prior.dt();
    let psi = process_covariance(tau * dt, prior.qc())
        * transition((1.0 - tau) * dt).transpose()
        * prior.information();
    let lambda = transition(tau * dt) - psi * transition(dt);
    Ok((lambda, psi))
}

impl GpInterpolator {
    /// # Errors
    /// `DomainError` if `tau ∉ [0, 1]` or `dt` is not finite and positive.
    pub fn new(dt: f64, tau: f64) -> OdometryResult<Self> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(OdometryError::DomainError(format!(
                "knot separation must be finite and positive, got {dt}"
            )));
        }
        check_fraction(tau)?;
        let mut interpolator = Self {
            dt,
            tau,
            hat: Matrix6x12::zeros(),
            candle: Matrix6x12::zeros(),
            hat_dot: Matrix6x12::zeros(),
            candle_dot: Matrix6x12::zeros(),
        };
        interpolator.update_coefficients();
        Ok(interpolator)
    }

    pub fn from_prior(prior: &WnoaPrior, tau: f64) -> OdometryResult<Self> {
        Self::new(prior.dt(), tau)
    }

    /// Move the query time within the same interval; recomputes the coefficients.
    pub fn set_fraction(&mut self, tau: f64) -> OdometryResult<()> {
        check_fraction(tau)?;
        self.tau = tau;
        self.update_coefficients();
        Ok(())
    }

    fn update_coefficients(&mut self) {
        let t = self.tau;
        let t2 = t * t;
        let t3 = t2 * t;
        let dt = self.dt;
        self.hat = blocks(1.0 - 3.0 * t2 + 2.0 * t3, dt * (t - 2.0 * t2 + t3));
        self.candle = blocks(3.0 * t2 - 2.0 * t3, dt * (t3 - t2));
        self.hat_dot = blocks((6.0 * t2 - 6.0 * t) / dt, 1.0 - 4.0 * t + 3.0 * t2);
        self.candle_dot = blocks((6.0 * t - 6.0 * t2) / dt, 3.0 * t2 - 2.0 * t);
    }

    pub fn fraction(&self) -> f64 {
        self.tau
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn hat(&self) -> &Matrix6x12 {
        &self.hat
    }

    pub fn candle(&self) -> &Matrix6x12 {
        &self.candle
    }

    /// Interpolate the pose and twist at the stored fraction.
    ///
    /// `poses` and `velocities` are the start and end knot states. When `jacobians` is
    /// given, it is overwritten with the partials of the interpolated pose.
    pub fn interpolate(
        &self,
        poses: [&SE3; 2],
        velocities: [&Vector6<f64>; 2],
        jacobians: Option<&mut GpJacobians>,
    ) -> GpInterpolation {
        let [start, end] = poses;
        let [start_velocity, end_velocity] = velocities;

        let xi_end = end.compose(&start.inverse(None), None, None).log(None);
        let xi_end_coeffs = xi_end.coeffs();
        let end_local_velocity = approx_left_jacobian_inv(&xi_end) * end_velocity;

        let h2 = self.hat.fixed_view::<6, 6>(0, 6);
        let c1 = self.candle.fixed_view::<6, 6>(0, 0);
        let c2 = self.candle.fixed_view::<6, 6>(0, 6);

        let xi_tau =
            SE3Tangent::from(h2 * start_velocity + c1 * xi_end_coeffs + c2 * end_local_velocity);
        let delta = xi_tau.exp(None);
        let pose = delta.compose(start, None, None);

        let xi_dot = self.hat_dot.fixed_view::<6, 6>(0, 6) * start_velocity
            + self.candle_dot.fixed_view::<6, 6>(0, 0) * xi_end_coeffs
            + self.candle_dot.fixed_view::<6, 6>(0, 6) * end_local_velocity;
        let local_to_spatial = approx_left_jacobian_inv(&xi_tau);
        let twist = local_to_spatial.lu().solve(&xi_dot);
        debug_assert!(twist.is_some(), "I - ad(xi)/2 is never singular");
        let twist = twist.unwrap_or(xi_dot);

        if let Some(jac) = jacobians {
            let jl_tau = xi_tau.left_jacobian();
            let m = c1 + 0.5 * c2 * SE3Tangent::from(*end_velocity).ad();

            jac.start_pose =
                jl_tau * m * (-xi_end.right_jacobian_inv()) + delta.adjoint();
            jac.end_pose = jl_tau * m * xi_end.left_jacobian_inv();
            jac.start_velocity = jl_tau * h2;
            jac.end_velocity = jl_tau * c2 * approx_left_jacobian_inv(&xi_end);
        }

        GpInterpolation { pose, twist }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-10;
    const FD_EPSILON: f64 = 1e-6;

    fn knots() -> (SE3, SE3, Vector6<f64>, Vector6<f64>) {
        let start = SE3::from_translation_euler(0.5, -0.2, 0.1, 0.05, -0.1, 0.3);
        let end = SE3::from_translation_euler(1.4, 0.3, 0.05, 0.1, -0.05, 0.55);
        let start_velocity = Vector6::new(8.0, 4.5, -0.4, 0.3, 0.2, 2.4);
        let end_velocity = Vector6::new(9.5, 5.0, -0.6, 0.5, 0.6, 2.6);
        (start, end, start_velocity, end_velocity)
    }

    fn left_difference(a: &SE3, b: &SE3) -> Vector6<f64> {
        a.compose(&b.inverse(None), None, None).log(None).coeffs()
    }

    #[test]
    fn test_hermite_coefficients_match_regression() -> Result<(), Box<dyn std::error::Error>> {
        let qc = Matrix6::from_diagonal(&Vector6::new(0.3, 0.8, 1.2, 0.05, 0.1, 0.02));
        let prior = WnoaPrior::new(0.1, qc)?;
        for tau in [0.0, 0.13, 0.5, 0.77, 1.0] {
            let interpolator = GpInterpolator::from_prior(&prior, tau)?;
            let (lambda, psi) = regression_matrices(&prior, tau)?;
            let hat_error = (interpolator.hat() - lambda.fixed_rows::<6>(0)).norm();
            let candle_error = (interpolator.candle() - psi.fixed_rows::<6>(0)).norm();
            let hat_dot_error = (interpolator.hat_dot - lambda.fixed_rows::<6>(6)).norm();
            let candle_dot_error = (interpolator.candle_dot - psi.fixed_rows::<6>(6)).norm();
            assert!(hat_error < 1e-9, "hat mismatch at tau={tau}: {hat_error}");
            assert!(candle_error < 1e-9, "candle mismatch at tau={tau}: {candle_error}");
            assert!(hat_dot_error < 1e-7, "hat rate mismatch at tau={tau}");
            assert!(candle_dot_error < 1e-7, "candle rate mismatch at tau={tau}");
        }
        Ok(())
    }

    #[test]
    fn test_boundaries_reproduce_knots() -> Result<(), Box<dyn std::error::Error>> {
        let (start, end, v0, v1) = knots();

        let at_start = GpInterpolator::new(0.1, 0.0)?.interpolate([&start, &end], [&v0, &v1], None);
        assert!((at_start.pose.matrix() - start.matrix()).norm() < TOLERANCE);
        assert!((at_start.twist - v0).norm() < TOLERANCE);

        let at_end = GpInterpolator::new(0.1, 1.0)?.interpolate([&start, &end], [&v0, &v1], None);
        assert!((at_end.pose.matrix() - end.matrix()).norm() < TOLERANCE);
        assert!((at_end.twist - v1).norm() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_constant_velocity_reproduced() -> Result<(), Box<dyn std::error::Error>> {
        let start = SE3::from_translation_euler(1.0, 2.0, -0.5, 0.2, 0.1, -0.4);
        let velocity = Vector6::new(3.0, -1.0, 0.5, 0.4, -0.2, 1.1);
        let dt = 0.2;
        let end = SE3Tangent::from(velocity * dt).exp(None).compose(&start, None, None);

        for tau in [0.1, 0.35, 0.6, 0.9] {
            let result =
                GpInterpolator::new(dt, tau)?.interpolate([&start, &end], [&velocity, &velocity], None);
            let expected = SE3Tangent::from(velocity * (tau * dt))
                .exp(None)
                .compose(&start, None, None);
            assert!((result.pose.matrix() - expected.matrix()).norm() < TOLERANCE);
            assert!((result.twist - velocity).norm() < 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_interpolation_jacobians_numerical() -> Result<(), Box<dyn std::error::Error>> {
        let (start, end, v0, v1) = knots();
        let interpolator = GpInterpolator::new(0.1, 0.37)?;
        let mut analytic = GpJacobians::default();
        let base = interpolator.interpolate([&start, &end], [&v0, &v1], Some(&mut analytic));

        for block in 0..4 {
            let mut numerical = Matrix6::zeros();
            for i in 0..6 {
                let mut delta = Vector6::zeros();
                delta[i] = FD_EPSILON;
                let evaluate = |d: Vector6<f64>| {
                    let (mut s, mut e, mut w0, mut w1) = (start.clone(), end.clone(), v0, v1);
                    match block {
                        0 => s = SE3Tangent::from(d).exp(None).compose(&s, None, None),
                        1 => e = SE3Tangent::from(d).exp(None).compose(&e, None, None),
                        2 => w0 += d,
                        _ => w1 += d,
                    }
                    interpolator.interpolate([&s, &e], [&w0, &w1], None).pose
                };
                let plus = left_difference(&evaluate(delta), &base.pose);
                let minus = left_difference(&evaluate(-delta), &base.pose);
                numerical.set_column(i, &((plus - minus) / (2.0 * FD_EPSILON)));
            }
            let error = (numerical - analytic.blocks()[block]).norm();
            assert!(error < 1e-7, "block {block} mismatch: {error}");
        }
        Ok(())
    }

    #[test]
    fn test_local_to_spatial_map_is_invertible() -> Result<(), Box<dyn std::error::Error>> {
        for xi in [
            Vector6::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0),
            Vector6::new(3.0, -1.0, 2.0, 0.2, -0.1, 0.4),
            Vector6::new(-50.0, 10.0, 4.0, 2.5, 1.0, -1.5),
            Vector6::new(1.0, 1.0, 1.0, 0.0, 0.0, 3.1),
        ] {
            let tangent = SE3Tangent::from(xi);
            let theta_squared = tangent.theta().norm_squared();
            let expected = (1.0 + 0.25 * theta_squared).powi(2);
            let map = approx_left_jacobian_inv(&tangent);
            assert!((map.determinant() - expected).abs() < 1e-9 * expected);

            let rhs = Vector6::new(1.0, -2.0, 0.5, 0.1, 0.3, -0.2);
            let solved = map.lu().solve(&rhs).ok_or("singular map")?;
            assert!((map * solved - rhs).norm() < 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_set_fraction_validates_and_updates() -> Result<(), Box<dyn std::error::Error>> {
        let mut interpolator = GpInterpolator::new(0.1, 0.2)?;
        let before = interpolator.hat().clone();
        interpolator.set_fraction(0.8)?;
        assert_eq!(interpolator.fraction(), 0.8);
        assert!((interpolator.hat() - before).norm() > 0.0);

        assert!(matches!(
            interpolator.set_fraction(1.5),
            Err(OdometryError::DomainError(_))
        ));
        assert_eq!(interpolator.fraction(), 0.8);
        assert!(GpInterpolator::new(0.1, -0.01).is_err());
        assert!(GpInterpolator::new(0.1, f64::NAN).is_err());
        assert!(GpInterpolator::new(-0.1, 0.5).is_err());
        Ok(())
    }

    #[test]
    fn test_interpolation_is_deterministic() -> Result<(), Box<dyn std::error::Error>> {
        let (start, end, v0, v1) = knots();
        let interpolator = GpInterpolator::new(0.1, 0.42)?;
        let mut j1 = GpJacobians::default();
        let mut j2 = GpJacobians::default();
        let a = interpolator.interpolate([&start, &end], [&v0, &v1], Some(&mut j1));
        let b = interpolator.interpolate([&start, &end], [&v0, &v1], Some(&mut j2));
        assert_eq!(a, b);
        assert_eq!(j1, j2);
        Ok(())
    }
}
