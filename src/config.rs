//! Configuration for problem assembly and the GP motion prior.
//!
//! Both structs follow the builder layout used across the crate: `new()` returns the
//! defaults, `with_*` methods consume and return `Self`, and `validate()` checks the
//! numeric domains before anything is built from them.
//!
//! ```
//! use lidar_gp_odometry::config::{GpPriorConfig, OdometryConfig};
//!
//! let config = OdometryConfig::new()
//!     .with_min_track_length(3)
//!     .with_point_noise_std(0.02)
//!     .with_gp_prior(GpPriorConfig::new().with_isotropic(1.0, 0.1));
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{OdometryError, OdometryResult};
use nalgebra::{Matrix3, Matrix6, Vector6};
use serde::{Deserialize, Serialize};

/// Power spectral density of the white-noise-on-acceleration prior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpPriorConfig {
    /// Diagonal of `Qc`, ordered `[ρ; θ]`
    pub qc_diagonal: [f64; 6],
}

impl Default for GpPriorConfig {
    fn default() -> Self {
        Self {
            qc_diagonal: [1.0, 1.0, 1.0, 0.1, 0.1, 0.1],
        }
    }
}

impl GpPriorConfig {
    /// Create a new prior configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the full diagonal of `Qc`.
    pub fn with_qc_diagonal(mut self, qc_diagonal: [f64; 6]) -> Self {
        self.qc_diagonal = qc_diagonal;
        self
    }

    /// Same power spectral density on every translational and every rotational axis.
    pub fn with_isotropic(mut self, translational: f64, rotational: f64) -> Self {
        self.qc_diagonal = [
            translational,
            translational,
            translational,
            rotational,
            rotational,
            rotational,
        ];
        self
    }

    /// `Qc` as a diagonal 6×6 matrix.
    pub fn qc(&self) -> Matrix6<f64> {
        Matrix6::from_diagonal(&Vector6::from_column_slice(&self.qc_diagonal))
    }

    pub fn validate(&self) -> OdometryResult<()> {
        if let Some(bad) = self
            .qc_diagonal
            .iter()
            .find(|v| !v.is_finite() || **v <= 0.0)
        {
            return Err(OdometryError::DomainError(format!(
                "Qc diagonal entries must be finite and positive, got {bad}"
            )));
        }
        Ok(())
    }
}

/// Settings for building point-to-line residuals from feature tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdometryConfig {
    /// Motion prior used for interpolation and prior factors
    pub gp_prior: GpPriorConfig,
    /// Tracks observed in fewer scans than this produce no residuals
    pub min_track_length: usize,
    /// Isotropic standard deviation of a measured point, in meters
    pub point_noise_std: f64,
    /// Derive each residual's weight from the point covariance; identity weight otherwise
    pub use_covariance_weighting: bool,
}

impl Default for OdometryConfig {
    fn default() -> Self {
        Self {
            gp_prior: GpPriorConfig::default(),
            min_track_length: 2,
            point_noise_std: 0.05,
            use_covariance_weighting: true,
        }
    }
}

impl OdometryConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gp_prior(mut self, gp_prior: GpPriorConfig) -> Self {
        self.gp_prior = gp_prior;
        self
    }

    pub fn with_min_track_length(mut self, min_track_length: usize) -> Self {
        self.min_track_length = min_track_length;
        self
    }

    pub fn with_point_noise_std(mut self, point_noise_std: f64) -> Self {
        self.point_noise_std = point_noise_std;
        self
    }

    pub fn with_covariance_weighting(mut self, enabled: bool) -> Self {
        self.use_covariance_weighting = enabled;
        self
    }

    /// Measurement covariance `σ² I` of a raw point.
    pub fn point_covariance(&self) -> Matrix3<f64> {
        Matrix3::identity() * (self.point_noise_std * self.point_noise_std)
    }

    /// Check every numeric field.
    ///
    /// # Errors
    /// `DomainError` for a non-positive noise or prior density, `InvalidArgument` for a
    /// zero minimum track length.
    pub fn validate(&self) -> OdometryResult<()> {
        self.gp_prior.validate()?;
        if !self.point_noise_std.is_finite() || self.point_noise_std <= 0.0 {
            return Err(OdometryError::DomainError(format!(
                "point noise standard deviation must be finite and positive, got {}",
                self.point_noise_std
            )));
        }
        if self.min_track_length == 0 {
            return Err(OdometryError::InvalidArgument(
                "min_track_length must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
