//! SE(3) - Special Euclidean Group in 3D
//!
//! SE(3) elements are represented as an SO(3) rotation plus a `Vector3` translation.
//! Tangent elements are `[ρ(3), θ(3)]`, translational part first.
//!
//! Besides the [`LieGroup`]/[`Tangent`] operations this module exposes the two extra
//! pieces the GP interpolation needs: the curly-wedge operator [`SE3Tangent::ad`] and the
//! point action with its 3×6 Jacobian, [`SE3::transform_point`].

use crate::manifold::so3::{SO3Tangent, SMALL_ANGLE, SO3};
use crate::manifold::{skew, LieGroup, Tangent};
use nalgebra::{
    Isometry3, Matrix3, Matrix3x6, Matrix4, Matrix6, Translation3, UnitQuaternion, Vector3,
    Vector6,
};
use rand::Rng;
use std::fmt;

/// The Q block coefficients are evaluated from their series below this angle.
const Q_BLOCK_SMALL_ANGLE: f64 = 10.0 * SMALL_ANGLE;

/// SE(3) group element representing rigid body transformations in 3D.
#[derive(Clone, Debug, PartialEq)]
pub struct SE3 {
    /// Rotation part as SO(3) element
    rotation: SO3,
    /// Translation part as Vector3
    translation: Vector3<f64>,
}

impl fmt::Display for SE3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.translation;
        let q = self.rotation.quaternion();
        write!(
            f,
            "SE3(translation: [{:.4}, {:.4}, {:.4}], rotation: [w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4}])",
            t.x, t.y, t.z, q.w, q.i, q.j, q.k
        )
    }
}

/// SE(3) tangent space element, `[rho_x, rho_y, rho_z, theta_x, theta_y, theta_z]`.
#[derive(Clone, Debug, PartialEq)]
pub struct SE3Tangent {
    data: Vector6<f64>,
}

impl fmt::Display for SE3Tangent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rho = self.rho();
        let theta = self.theta();
        write!(
            f,
            "se3(rho: [{:.4}, {:.4}, {:.4}], theta: [{:.4}, {:.4}, {:.4}])",
            rho.x, rho.y, rho.z, theta.x, theta.y, theta.z
        )
    }
}

impl SE3 {
    /// Create a new SE3 element from translation and rotation.
    pub fn new(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        SE3 {
            rotation: SO3::new(rotation),
            translation,
        }
    }

    /// Create SE3 from translation components and Euler angles.
    pub fn from_translation_euler(x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Self {
        let rotation = UnitQuaternion::from_euler_angles(roll, pitch, yaw);
        Self::new(Vector3::new(x, y, z), rotation)
    }

    /// Create SE3 from SO3 and Vector3 components.
    pub fn from_translation_so3(translation: Vector3<f64>, rotation: SO3) -> Self {
        SE3 {
            rotation,
            translation,
        }
    }

    /// Get the translation part.
    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    /// Get the rotation matrix.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.rotation_matrix()
    }

    /// Get as an Isometry3.
    pub fn isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.translation),
            self.rotation.quaternion(),
        )
    }

    /// Get the 4x4 homogeneous transformation matrix.
    pub fn matrix(&self) -> Matrix4<f64> {
        self.isometry().to_homogeneous()
    }

    /// Apply this transform to a point and return the 3×6 Jacobian of the
    /// transformed point with respect to a left perturbation of the transform.
    ///
    /// ```text
    /// p' = R p + t,   ∂p'/∂ε = [ I₃  -[p']× ]
    /// ```
    pub fn transform_point(&self, point: &Vector3<f64>) -> (Vector3<f64>, Matrix3x6<f64>) {
        let mut jacobian = Matrix3x6::zeros();
        let transformed = self.act(point, Some(&mut jacobian), None);
        (transformed, jacobian)
    }
}

impl LieGroup for SE3 {
    type Element = SE3;
    type TangentVector = SE3Tangent;
    type JacobianMatrix = Matrix6<f64>;
    type ActionJacobian = Matrix3x6<f64>;

    fn identity() -> Self::Element {
        SE3 {
            rotation: SO3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// M⁻¹ = [ Rᵀ  -Rᵀt ; 0  1 ]
    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::Element {
        let rot_inv = self.rotation.inverse(None);
        let trans_inv = -rot_inv.act(&self.translation, None, None);
        let result = SE3::from_translation_so3(trans_inv, rot_inv);

        if let Some(jac) = jacobian {
            *jac = -result.adjoint();
        }

        result
    }

    /// M_a M_b = [ R_a R_b   R_a t_b + t_a ; 0  1 ]
    fn compose(
        &self,
        other: &Self::Element,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self::Element {
        let composed_rotation = self.rotation.compose(&other.rotation, None, None);
        let composed_translation =
            self.rotation.act(&other.translation, None, None) + self.translation;

        if let Some(jac_self) = jacobian_self {
            *jac_self = Matrix6::identity();
        }
        if let Some(jac_other) = jacobian_other {
            *jac_other = self.adjoint();
        }

        SE3::from_translation_so3(composed_translation, composed_rotation)
    }

    /// τ = log(M) = [ V⁻¹(θ) t ; Log(R) ], where V is the SO(3) left Jacobian.
    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector {
        let theta = self.rotation.log(None);
        let rho = theta.left_jacobian_inv() * self.translation;
        let result = SE3Tangent::new(rho, theta.coeffs());

        if let Some(jac) = jacobian {
            *jac = result.left_jacobian_inv();
        }

        result
    }

    fn act(
        &self,
        vector: &Vector3<f64>,
        jacobian_self: Option<&mut Self::ActionJacobian>,
        jacobian_vector: Option<&mut Matrix3<f64>>,
    ) -> Vector3<f64> {
        let result = self.rotation.act(vector, None, None) + self.translation;

        if let Some(jac_self) = jacobian_self {
            jac_self
                .fixed_view_mut::<3, 3>(0, 0)
                .copy_from(&Matrix3::identity());
            jac_self.fixed_view_mut::<3, 3>(0, 3).copy_from(&(-skew(&result)));
        }
        if let Some(jac_vector) = jacobian_vector {
            jac_vector.copy_from(&self.rotation.rotation_matrix());
        }

        result
    }

    /// Ad(M) = [ R  [t]×R ; 0  R ]
    fn adjoint(&self) -> Self::JacobianMatrix {
        let rotation_matrix = self.rotation.rotation_matrix();
        let mut adjoint_matrix = Matrix6::zeros();

        adjoint_matrix
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&rotation_matrix);
        adjoint_matrix
            .fixed_view_mut::<3, 3>(3, 3)
            .copy_from(&rotation_matrix);
        adjoint_matrix
            .fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(skew(&self.translation) * rotation_matrix));

        adjoint_matrix
    }

    fn random() -> Self::Element {
        let mut rng = rand::rng();

        // Random translation in [-1, 1]³
        let translation = Vector3::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
        );

        SE3::from_translation_so3(translation, SO3::random())
    }
}

impl SE3Tangent {
    /// Create a new SE3Tangent from rho (translational) and theta (rotational) components.
    pub fn new(rho: Vector3<f64>, theta: Vector3<f64>) -> Self {
        let mut data = Vector6::zeros();
        data.fixed_rows_mut::<3>(0).copy_from(&rho);
        data.fixed_rows_mut::<3>(3).copy_from(&theta);
        SE3Tangent { data }
    }

    /// Get the raw 6-vector `[rho; theta]`.
    pub fn coeffs(&self) -> Vector6<f64> {
        self.data
    }

    /// Get the rho (translational) part.
    pub fn rho(&self) -> Vector3<f64> {
        self.data.fixed_rows::<3>(0).into_owned()
    }

    /// Get the theta (rotational) part.
    pub fn theta(&self) -> Vector3<f64> {
        self.data.fixed_rows::<3>(3).into_owned()
    }

    /// Curly-wedge operator ξ^⋏, the matrix of the Lie bracket `ad(ξ) ζ = [ξ, ζ]`.
    ///
    /// ```text
    /// ad([ρ; θ]) = [ [θ]×  [ρ]× ]
    ///              [  0    [θ]× ]
    /// ```
    ///
    /// Satisfies `ad(a) b = -ad(b) a`.
    pub fn ad(&self) -> Matrix6<f64> {
        let rho_skew = skew(&self.rho());
        let theta_skew = skew(&self.theta());
        let mut ad = Matrix6::zeros();
        ad.fixed_view_mut::<3, 3>(0, 0).copy_from(&theta_skew);
        ad.fixed_view_mut::<3, 3>(3, 3).copy_from(&theta_skew);
        ad.fixed_view_mut::<3, 3>(0, 3).copy_from(&rho_skew);
        ad
    }

    /// Q(ρ, θ), the coupling block of the SE(3) left Jacobian.
    ///
    /// ```text
    /// Q = ½ρ× + b (θ×ρ× + ρ×θ× + θ×ρ×θ×)
    ///       + c (θ×²ρ× + ρ×θ×² - 3 θ×ρ×θ×)
    ///       + d (θ×ρ×θ×² + θ×²ρ×θ×)
    /// b = (φ - sin φ)/φ³
    /// c = (φ² + 2 cos φ - 2)/(2φ⁴)
    /// d = (2φ - 3 sin φ + φ cos φ)/(2φ⁵)
    /// ```
    pub fn q_block_jacobian_matrix(rho: &Vector3<f64>, theta: &Vector3<f64>) -> Matrix3<f64> {
        let rho_skew = skew(rho);
        let theta_skew = skew(theta);
        let theta_squared = theta.norm_squared();
        let angle = theta_squared.sqrt();

        let (_, b) = SO3Tangent::new(*theta).left_jacobian_coefficients();
        let (c, d) = Self::q_block_coefficients(angle, angle < Q_BLOCK_SMALL_ANGLE);

        let theta_rho = theta_skew * rho_skew;
        let rho_theta = rho_skew * theta_skew;
        let theta_rho_theta = theta_rho * theta_skew;
        let theta_theta_rho = theta_skew * theta_rho;
        let rho_theta_theta = rho_theta * theta_skew;

        let m2 = theta_rho + rho_theta + theta_rho_theta;
        let m3 = theta_theta_rho + rho_theta_theta - 3.0 * theta_rho_theta;
        let m4 = theta_rho_theta * theta_skew + theta_skew * theta_rho_theta;

        0.5 * rho_skew + b * m2 + c * m3 + d * m4
    }

    /// Coefficients (c, d) of the Q block at rotation angle `angle`, from the Taylor
    /// series when `series` is set and from the closed form otherwise.
    fn q_block_coefficients(angle: f64, series: bool) -> (f64, f64) {
        let theta_squared = angle * angle;
        let theta_fourth = theta_squared * theta_squared;
        if series {
            (
                1.0 / 24.0 - theta_squared / 720.0 + theta_fourth / 40320.0,
                1.0 / 120.0 - theta_squared / 2520.0 + theta_fourth / 120960.0,
            )
        } else {
            let (sin_angle, cos_angle) = angle.sin_cos();
            (
                (theta_squared + 2.0 * cos_angle - 2.0) / (2.0 * theta_fourth),
                (2.0 * angle - 3.0 * sin_angle + angle * cos_angle)
                    / (2.0 * theta_fourth * angle),
            )
        }
    }
}

impl From<Vector6<f64>> for SE3Tangent {
    fn from(data: Vector6<f64>) -> Self {
        SE3Tangent { data }
    }
}

impl From<SE3Tangent> for Vector6<f64> {
    fn from(tangent: SE3Tangent) -> Self {
        tangent.data
    }
}

impl Tangent<SE3> for SE3Tangent {
    /// M = exp(τ) = [ R(θ)  V(θ)ρ ; 0  1 ]
    fn exp(&self, jacobian: Option<&mut Matrix6<f64>>) -> SE3 {
        let theta_tangent = SO3Tangent::new(self.theta());
        let rotation = theta_tangent.exp(None);
        let translation = theta_tangent.left_jacobian() * self.rho();

        if let Some(jac) = jacobian {
            *jac = self.left_jacobian();
        }

        SE3::from_translation_so3(translation, rotation)
    }

    fn right_jacobian(&self) -> Matrix6<f64> {
        SE3Tangent::from(-self.data).left_jacobian()
    }

    /// J_l = [ J  Q ; 0  J ]
    fn left_jacobian(&self) -> Matrix6<f64> {
        let rho = self.rho();
        let theta = self.theta();
        let so3_left = SO3Tangent::new(theta).left_jacobian();

        let mut jac = Matrix6::zeros();
        jac.fixed_view_mut::<3, 3>(0, 0).copy_from(&so3_left);
        jac.fixed_view_mut::<3, 3>(3, 3).copy_from(&so3_left);
        jac.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&SE3Tangent::q_block_jacobian_matrix(&rho, &theta));
        jac
    }

    fn right_jacobian_inv(&self) -> Matrix6<f64> {
        SE3Tangent::from(-self.data).left_jacobian_inv()
    }

    /// J_l⁻¹ = [ J⁻¹  -J⁻¹ Q J⁻¹ ; 0  J⁻¹ ]
    fn left_jacobian_inv(&self) -> Matrix6<f64> {
        let rho = self.rho();
        let theta = self.theta();
        let so3_left_inv = SO3Tangent::new(theta).left_jacobian_inv();
        let q_block = SE3Tangent::q_block_jacobian_matrix(&rho, &theta);

        let mut jac = Matrix6::zeros();
        jac.fixed_view_mut::<3, 3>(0, 0).copy_from(&so3_left_inv);
        jac.fixed_view_mut::<3, 3>(3, 3).copy_from(&so3_left_inv);
        jac.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(-so3_left_inv * q_block * so3_left_inv));
        jac
    }

    fn zero() -> SE3Tangent {
        SE3Tangent::from(Vector6::zeros())
    }

    fn random() -> SE3Tangent {
        let mut rng = rand::rng();
        SE3Tangent::new(
            Vector3::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            ),
            Vector3::new(
                rng.random_range(-0.5..0.5),
                rng.random_range(-0.5..0.5),
                rng.random_range(-0.5..0.5),
            ),
        )
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.norm() < tolerance
    }
}
