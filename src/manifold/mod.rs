//! Lie group primitives used by the continuous-time residuals.
//!
//! This module provides the two groups the GP interpolation and the point-to-line
//! residual are built on:
//! - **SO(3)**: rotations in 3D
//! - **SE(3)**: rigid body transformations in 3D
//!
//! Lie group M,° | size   | dim | X ∈ M             | Constraint | T_X M        | Exp(T)        | Comp. | Action
//! ------------- | ------ | --- | ----------------- | ---------- | ------------ | ------------- | ----- | ------
//! Rotation      | SO(3),.| 3   | R                 | RᵀR = I    | [θ] ∈ R³     | R = exp([θ]x) | R₁R₂  | Rx
//! Rigid motion  | SE(3),.| 6   | M = [R t; 0 1]    | RᵀR = I    | [ρ, θ] ∈ R⁶  | Exp([ρ, θ]^)  | M₁M₂  | Rx+t
//!
//! # Perturbation convention
//!
//! Every Jacobian returned by this module is taken with respect to a **left**
//! perturbation of the group element, `X ← exp(ε^) ∘ X`. This is the convention the
//! GP motion prior is formulated in: the local variable `ξ(t) = log(T(t) T_k⁻¹)` lives in
//! the tangent space at the identity, and its derivatives compose with left Jacobians
//! without extra adjoints.
//!
//! Tangent vectors of SE(3) are ordered `[ρ (translation); θ (rotation)]`.
//!
//! # Example
//!
//! ```
//! use lidar_gp_odometry::manifold::se3::{SE3, SE3Tangent};
//! use lidar_gp_odometry::manifold::{LieGroup, Tangent};
//! use nalgebra::Vector3;
//!
//! let pose = SE3::from_translation_euler(1.0, 0.0, 0.0, 0.0, 0.0, 0.3);
//! let delta = SE3Tangent::new(Vector3::new(0.1, 0.0, 0.0), Vector3::new(0.0, 0.0, 0.05));
//!
//! // exp(δ^) ∘ T
//! let perturbed = delta.exp(None).compose(&pose, None, None);
//! let (point, jacobian) = perturbed.transform_point(&Vector3::new(0.0, 1.0, 0.0));
//! assert_eq!(jacobian.nrows(), 3);
//! assert!(point.norm() > 0.0);
//! ```

use nalgebra::{Matrix3, Vector3};
use std::fmt::Debug;

pub mod se3;
pub mod so3;

/// Skew-symmetric matrix `[v]×` such that `[v]× w = v × w`.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Core trait for Lie group operations.
///
/// Follows the manif layout (optional `&mut` Jacobian outputs), restricted to the
/// operations this crate differentiates through. All Jacobians are with respect to left
/// perturbations, see the module documentation.
pub trait LieGroup: Clone + Debug + PartialEq {
    /// The Lie group element type
    type Element: Clone + Debug + PartialEq;

    /// The tangent space vector type
    type TangentVector: Tangent<Self>;

    /// The Jacobian matrix type (DOF × DOF)
    type JacobianMatrix: Clone + Debug + PartialEq;

    /// Jacobian of the group action on a 3-vector with respect to the element
    type ActionJacobian: Clone + Debug + PartialEq;

    /// Get the identity element of the group.
    fn identity() -> Self::Element;

    /// Compute the inverse of this element.
    ///
    /// # Arguments
    /// * `jacobian` - Optional Jacobian ∂(g⁻¹)/∂g, equal to `-Ad(g⁻¹)`
    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::Element;

    /// Compose this element with another: g₁ ∘ g₂.
    ///
    /// # Arguments
    /// * `other` - The right operand for composition
    /// * `jacobian_self` - Optional Jacobian ∂(g₁ ∘ g₂)/∂g₁, equal to `I`
    /// * `jacobian_other` - Optional Jacobian ∂(g₁ ∘ g₂)/∂g₂, equal to `Ad(g₁)`
    fn compose(
        &self,
        other: &Self::Element,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self::Element;

    /// Logarithmic map from the group to the tangent space.
    ///
    /// # Arguments
    /// * `jacobian` - Optional Jacobian ∂log(g)/∂g, equal to `J_l⁻¹(log(g))`
    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector;

    /// Act on a vector: g ⊙ v.
    ///
    /// # Arguments
    /// * `vector` - Vector to transform
    /// * `jacobian_self` - Optional Jacobian ∂(g ⊙ v)/∂g
    /// * `jacobian_vector` - Optional Jacobian ∂(g ⊙ v)/∂v
    fn act(
        &self,
        vector: &Vector3<f64>,
        jacobian_self: Option<&mut Self::ActionJacobian>,
        jacobian_vector: Option<&mut Matrix3<f64>>,
    ) -> Vector3<f64>;

    /// Adjoint matrix Ad(g), with `g ∘ exp(φ^) ∘ g⁻¹ = exp((Ad(g) φ)^)`.
    fn adjoint(&self) -> Self::JacobianMatrix;

    /// Generate a random element (useful for testing and initialization).
    fn random() -> Self::Element;
}

/// Trait for tangent space (Lie algebra) operations.
pub trait Tangent<G: LieGroup>: Clone + Debug + PartialEq {
    /// Exponential map to the group: exp(φ^).
    ///
    /// # Arguments
    /// * `jacobian` - Optional Jacobian ∂exp(φ^)/∂φ, equal to the left Jacobian `J_l(φ)`
    fn exp(&self, jacobian: Option<&mut G::JacobianMatrix>) -> G::Element;

    /// Right Jacobian Jr: exp((φ + δφ)^) ≈ exp(φ^) ∘ exp((Jr δφ)^).
    fn right_jacobian(&self) -> G::JacobianMatrix;

    /// Left Jacobian Jl: exp((φ + δφ)^) ≈ exp((Jl δφ)^) ∘ exp(φ^).
    fn left_jacobian(&self) -> G::JacobianMatrix;

    /// Inverse of the right Jacobian.
    fn right_jacobian_inv(&self) -> G::JacobianMatrix;

    /// Inverse of the left Jacobian.
    fn left_jacobian_inv(&self) -> G::JacobianMatrix;

    /// Zero tangent vector.
    fn zero() -> G::TangentVector;

    /// Random tangent vector (useful for testing).
    fn random() -> G::TangentVector;

    /// Check if the tangent vector is approximately zero.
    fn is_zero(&self, tolerance: f64) -> bool;
}
