//! SO(3) - Special Orthogonal Group in 3D
//!
//! SO(3) elements are represented using nalgebra's `UnitQuaternion` internally.
//! SO(3) tangent elements are axis-angle vectors in R³, where the direction gives the
//! axis of rotation and the magnitude gives the angle.

use crate::manifold::{skew, LieGroup, Tangent};
use nalgebra::{Matrix3, Unit, UnitQuaternion, Vector3};
use rand::Rng;
use std::f64::consts::PI;
use std::fmt;

/// Below this angle the Jacobian coefficients switch to their Taylor expansions.
pub(crate) const SMALL_ANGLE: f64 = 1e-2;

/// SO(3) group element representing rotations in 3D.
#[derive(Clone, Debug, PartialEq)]
pub struct SO3 {
    /// Internal representation as a unit quaternion
    quaternion: UnitQuaternion<f64>,
}

impl fmt::Display for SO3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = self.quaternion.quaternion();
        write!(
            f,
            "SO3(quaternion: [w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4}])",
            q.w, q.i, q.j, q.k
        )
    }
}

/// SO(3) tangent space element (axis-angle vector).
#[derive(Clone, Debug, PartialEq)]
pub struct SO3Tangent {
    /// Internal data: axis-angle vector [θx, θy, θz]
    data: Vector3<f64>,
}

impl fmt::Display for SO3Tangent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "so3(axis-angle: [{:.4}, {:.4}, {:.4}])",
            self.data.x, self.data.y, self.data.z
        )
    }
}

impl SO3 {
    /// Create a new SO(3) element from a unit quaternion.
    pub fn new(quaternion: UnitQuaternion<f64>) -> Self {
        SO3 { quaternion }
    }

    /// Create SO(3) from Euler angles (roll, pitch, yaw).
    pub fn from_euler_angles(roll: f64, pitch: f64, yaw: f64) -> Self {
        SO3::new(UnitQuaternion::from_euler_angles(roll, pitch, yaw))
    }

    /// Create SO(3) from an axis and an angle. The axis does not need to be normalized.
    pub fn from_axis_angle(axis: &Vector3<f64>, angle: f64) -> Self {
        let unit_axis = Unit::new_normalize(*axis);
        SO3::new(UnitQuaternion::from_axis_angle(&unit_axis, angle))
    }

    /// Create SO(3) from a scaled axis (axis-angle vector).
    pub fn from_scaled_axis(axis_angle: Vector3<f64>) -> Self {
        SO3::new(UnitQuaternion::from_scaled_axis(axis_angle))
    }

    /// Get the quaternion representation.
    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        self.quaternion
    }

    /// Get the rotation matrix (3x3).
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.quaternion.to_rotation_matrix().into_inner()
    }
}

impl LieGroup for SO3 {
    type Element = SO3;
    type TangentVector = SO3Tangent;
    type JacobianMatrix = Matrix3<f64>;
    type ActionJacobian = Matrix3<f64>;

    fn identity() -> Self::Element {
        SO3 {
            quaternion: UnitQuaternion::identity(),
        }
    }

    /// R⁻¹ = Rᵀ. Under left perturbations J = -Ad(R⁻¹) = -Rᵀ.
    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::Element {
        if let Some(jac) = jacobian {
            *jac = -self.rotation_matrix().transpose();
        }

        SO3 {
            quaternion: self.quaternion.inverse(),
        }
    }

    fn compose(
        &self,
        other: &Self::Element,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self::Element {
        if let Some(jac_self) = jacobian_self {
            *jac_self = Matrix3::identity();
        }
        if let Some(jac_other) = jacobian_other {
            *jac_other = self.rotation_matrix();
        }

        SO3 {
            quaternion: self.quaternion * other.quaternion,
        }
    }

    /// θu = Log(q) = (2 / ‖v‖) v atan2(‖v‖, w), choosing the short way round.
    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector {
        let q = self.quaternion.quaternion();
        let sin_angle_squared = q.i * q.i + q.j * q.j + q.k * q.k;

        let log_coeff = if sin_angle_squared > f64::EPSILON {
            let sin_angle = sin_angle_squared.sqrt();
            let cos_angle = q.w;

            let two_angle = 2.0
                * if cos_angle < 0.0 {
                    f64::atan2(-sin_angle, -cos_angle)
                } else {
                    f64::atan2(sin_angle, cos_angle)
                };

            two_angle / sin_angle
        } else {
            // 2 / w to second order in the angle
            2.0 / q.w - 2.0 * sin_angle_squared / (3.0 * q.w * q.w * q.w)
        };

        let axis_angle = SO3Tangent::new(Vector3::new(
            q.i * log_coeff,
            q.j * log_coeff,
            q.k * log_coeff,
        ));

        if let Some(jac) = jacobian {
            *jac = axis_angle.left_jacobian_inv();
        }

        axis_angle
    }

    fn act(
        &self,
        vector: &Vector3<f64>,
        jacobian_self: Option<&mut Self::ActionJacobian>,
        jacobian_vector: Option<&mut Matrix3<f64>>,
    ) -> Vector3<f64> {
        let result = self.quaternion * vector;

        if let Some(jac_self) = jacobian_self {
            *jac_self = -skew(&result);
        }
        if let Some(jac_vector) = jacobian_vector {
            *jac_vector = self.rotation_matrix();
        }

        result
    }

    fn adjoint(&self) -> Self::JacobianMatrix {
        self.rotation_matrix()
    }

    fn random() -> Self::Element {
        let mut rng = rand::rng();
        let axis = Vector3::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
        );
        let angle = rng.random_range(-PI..PI);

        if axis.norm() < 1e-9 {
            return SO3::identity();
        }
        SO3::from_axis_angle(&axis, angle)
    }
}

impl SO3Tangent {
    /// Create a new SO3Tangent from an axis-angle vector.
    pub fn new(axis_angle: Vector3<f64>) -> Self {
        SO3Tangent { data: axis_angle }
    }

    /// Get the axis-angle vector.
    pub fn coeffs(&self) -> Vector3<f64> {
        self.data
    }

    /// Hat operator `[θ]×`.
    pub fn hat(&self) -> Matrix3<f64> {
        skew(&self.data)
    }

    /// Rotation angle (magnitude of the axis-angle vector).
    pub fn angle(&self) -> f64 {
        self.data.norm()
    }

    /// Coefficients (a, b) of `J_l = I + a [θ]× + b [θ]×²`.
    ///
    /// a = (1 - cos φ)/φ², b = (φ - sin φ)/φ³
    pub(crate) fn left_jacobian_coefficients(&self) -> (f64, f64) {
        let angle_squared = self.data.norm_squared();
        let angle = angle_squared.sqrt();

        if angle < SMALL_ANGLE {
            let a = 0.5 - angle_squared / 24.0 + angle_squared * angle_squared / 720.0;
            let b = 1.0 / 6.0 - angle_squared / 120.0 + angle_squared * angle_squared / 5040.0;
            (a, b)
        } else {
            let (sin_angle, cos_angle) = angle.sin_cos();
            (
                (1.0 - cos_angle) / angle_squared,
                (angle - sin_angle) / (angle_squared * angle),
            )
        }
    }

    /// Coefficient e of `J_l⁻¹ = I - ½ [θ]× + e [θ]×²`.
    ///
    /// e = 1/φ² - (1 + cos φ)/(2 φ sin φ)
    fn inverse_jacobian_coefficient(&self) -> f64 {
        let angle_squared = self.data.norm_squared();
        let angle = angle_squared.sqrt();

        if angle < SMALL_ANGLE {
            1.0 / 12.0 + angle_squared / 720.0 + angle_squared * angle_squared / 30240.0
        } else {
            let (sin_angle, cos_angle) = angle.sin_cos();
            1.0 / angle_squared - (1.0 + cos_angle) / (2.0 * angle * sin_angle)
        }
    }
}

impl Tangent<SO3> for SO3Tangent {
    fn exp(&self, jacobian: Option<&mut <SO3 as LieGroup>::JacobianMatrix>) -> SO3 {
        if let Some(jac) = jacobian {
            *jac = self.left_jacobian();
        }
        SO3::from_scaled_axis(self.data)
    }

    fn right_jacobian(&self) -> Matrix3<f64> {
        let (a, b) = self.left_jacobian_coefficients();
        let theta_hat = self.hat();
        Matrix3::identity() - a * theta_hat + b * theta_hat * theta_hat
    }

    fn left_jacobian(&self) -> Matrix3<f64> {
        let (a, b) = self.left_jacobian_coefficients();
        let theta_hat = self.hat();
        Matrix3::identity() + a * theta_hat + b * theta_hat * theta_hat
    }

    fn right_jacobian_inv(&self) -> Matrix3<f64> {
        let e = self.inverse_jacobian_coefficient();
        let theta_hat = self.hat();
        Matrix3::identity() + 0.5 * theta_hat + e * theta_hat * theta_hat
    }

    fn left_jacobian_inv(&self) -> Matrix3<f64> {
        let e = self.inverse_jacobian_coefficient();
        let theta_hat = self.hat();
        Matrix3::identity() - 0.5 * theta_hat + e * theta_hat * theta_hat
    }

    fn zero() -> SO3Tangent {
        SO3Tangent::new(Vector3::zeros())
    }

    fn random() -> SO3Tangent {
        let mut rng = rand::rng();
        SO3Tangent::new(Vector3::new(
            rng.random_range(-0.5..0.5),
            rng.random_range(-0.5..0.5),
            rng.random_range(-0.5..0.5),
        ))
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.norm() < tolerance
    }
}
