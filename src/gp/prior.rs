//! White-noise-on-acceleration (WNOA) motion prior.
//!
//! The Markovian state of a knot is `x = [ξ; ξ̇]` (12-D). Between two knots separated by
//! `Δt` the prior is
//!
//! ```text
//! Φ(Δt) = [ I  Δt I ]      Q(Δt) = [ Δt³/3 Qc  Δt²/2 Qc ]
//!         [ 0    I  ]              [ Δt²/2 Qc  Δt Qc    ]
//! ```

use crate::config::GpPriorConfig;
use crate::error::{OdometryError, OdometryResult};
use nalgebra::{Cholesky, Matrix6, SMatrix};

/// 12×12 matrix over the Markovian state `[ξ; ξ̇]`.
pub type Matrix12 = SMatrix<f64, 12, 12>;

/// State transition `Φ(Δt)`.
pub fn transition(dt: f64) -> Matrix12 {
    let mut phi = Matrix12::identity();
    phi.fixed_view_mut::<6, 6>(0, 6)
        .copy_from(&(Matrix6::identity() * dt));
    phi
}

/// Process covariance `Q(Δt)` accumulated over an interval of length `dt`.
pub fn process_covariance(dt: f64, qc: &Matrix6<f64>) -> Matrix12 {
    let dt2 = dt * dt;
    let dt3 = dt2 * dt;
    let mut q = Matrix12::zeros();
    q.fixed_view_mut::<6, 6>(0, 0).copy_from(&(qc * (dt3 / 3.0)));
    q.fixed_view_mut::<6, 6>(0, 6).copy_from(&(qc * (dt2 / 2.0)));
    q.fixed_view_mut::<6, 6>(6, 0).copy_from(&(qc * (dt2 / 2.0)));
    q.fixed_view_mut::<6, 6>(6, 6).copy_from(&(qc * dt));
    q
}

/// WNOA prior over one knot interval.
#[derive(Debug, Clone, PartialEq)]
pub struct WnoaPrior {
    dt: f64,
    qc: Matrix6<f64>,
    qc_inv: Matrix6<f64>,
    sqrt_information: Matrix12,
}

impl WnoaPrior {
    /// Build a prior for knot separation `dt` and power spectral density `qc`.
    ///
    /// # Errors
    /// `DomainError` if `dt` is not finite and positive, or `qc` is not finite and
    /// positive definite.
    pub fn new(dt: f64, qc: Matrix6<f64>) -> OdometryResult<Self> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(OdometryError::DomainError(format!(
                "knot separation must be finite and positive, got {dt}"
            )));
        }
        if qc.iter().any(|v| !v.is_finite()) {
            return Err(OdometryError::DomainError(
                "Qc contains non-finite entries".to_string(),
            ));
        }
        let qc_inv = Cholesky::new(qc)
            .map(|chol| chol.inverse())
            .ok_or_else(|| {
                OdometryError::DomainError("Qc must be positive definite".to_string())
            })?;

        let information = Self::information_from(dt, &qc_inv);
        let sqrt_information = Cholesky::new(information)
            .map(|chol| chol.l().transpose())
            .ok_or_else(|| {
                OdometryError::DomainError(format!(
                    "prior information is not positive definite for dt = {dt}"
                ))
            })?;

        Ok(Self {
            dt,
            qc,
            qc_inv,
            sqrt_information,
        })
    }

    pub fn from_config(dt: f64, config: &GpPriorConfig) -> OdometryResult<Self> {
        config.validate()?;
        Self::new(dt, config.qc())
    }

    /// `Q(Δt)⁻¹ = [[12/Δt³, −6/Δt²], [−6/Δt², 4/Δt]] ⊗ Qc⁻¹`
    fn information_from(dt: f64, qc_inv: &Matrix6<f64>) -> Matrix12 {
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        let mut info = Matrix12::zeros();
        info.fixed_view_mut::<6, 6>(0, 0)
            .copy_from(&(qc_inv * (12.0 / dt3)));
        info.fixed_view_mut::<6, 6>(0, 6)
            .copy_from(&(qc_inv * (-6.0 / dt2)));
        info.fixed_view_mut::<6, 6>(6, 0)
            .copy_from(&(qc_inv * (-6.0 / dt2)));
        info.fixed_view_mut::<6, 6>(6, 6)
            .copy_from(&(qc_inv * (4.0 / dt)));
        info
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn qc(&self) -> &Matrix6<f64> {
        &self.qc
    }

    /// `Φ(Δt)` over the whole interval.
    pub fn transition(&self) -> Matrix12 {
        transition(self.dt)
    }

    /// `Q(Δt)` over the whole interval.
    pub fn covariance(&self) -> Matrix12 {
        process_covariance(self.dt, &self.qc)
    }

    /// `Q(Δt)⁻¹` in closed form.
    pub fn information(&self) -> Matrix12 {
        Self::information_from(self.dt, &self.qc_inv)
    }

    /// Upper-triangular `L` with `LᵀL = Q(Δt)⁻¹`.
    pub fn sqrt_information(&self) -> &Matrix12 {
        &self.sqrt_information
    }
}
