//! # SO(3): the special orthogonal group in 3D
//!
//! Rotations are stored as unit quaternions. `q` and `-q` describe the same
//! rotation, so comparisons should go through [`SO3::matrix`].
//!
//! ## The exp/log maps
//!
//! A vector `v ∈ R³` in the Lie algebra **so(3)** encodes an axis-angle
//! rotation: the direction is the rotation axis and the magnitude is the angle
//! in radians. `exp(0)` is the identity.
//!
//! Incremental updates on the manifold are applied on the left:
//!
//! ```text
//! R(δ) = exp(δ) · R₀
//! ```
//!
//! which keeps `R(δ)` orthonormal for any `δ`. See [`SO3::lplus`].

use std::ops::Mul;

use glam::{DMat3, DQuat, DVec3};

const SMALL_ANGLE_EPSILON: f64 = 1.0e-10;

/// A 3D rotation, stored as a unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SO3 {
    /// Unit quaternion representing the rotation.
    pub q: DQuat,
}

impl Default for SO3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl SO3 {
    /// The identity rotation.
    pub const IDENTITY: Self = Self {
        q: DQuat::IDENTITY,
    };

    /// Create a rotation from a quaternion. The quaternion is normalized.
    #[inline]
    pub fn from_quaternion(quat: DQuat) -> Self {
        Self {
            q: quat.normalize(),
        }
    }

    /// Create a rotation from a rotation matrix.
    ///
    /// The matrix is assumed to be orthonormal with determinant +1. Project
    /// approximate rotations onto SO(3) before calling this.
    pub fn from_matrix(mat: &DMat3) -> Self {
        Self {
            q: DQuat::from_mat3(mat).normalize(),
        }
    }

    /// The 3×3 rotation matrix.
    #[inline]
    pub fn matrix(&self) -> DMat3 {
        DMat3::from_quat(self.q)
    }

    /// The inverse rotation.
    #[inline]
    pub fn inverse(&self) -> Self {
        Self {
            q: self.q.conjugate(),
        }
    }

    /// Rotate a point.
    #[inline]
    pub fn rotate(&self, p: DVec3) -> DVec3 {
        self.q * p
    }

    /// Lie algebra -> Lie group.
    pub fn exp(v: DVec3) -> Self {
        let theta_sq = v.dot(v);
        let theta = theta_sq.sqrt();
        let theta_half = 0.5 * theta;

        let (w, b) = if theta < SMALL_ANGLE_EPSILON {
            // taylor expansion of cos(x/2) and sin(x/2)/x around 0
            (1.0 - theta_sq / 8.0, 0.5 - theta_sq / 48.0)
        } else {
            (theta_half.cos(), theta_half.sin() / theta)
        };

        let xyz = b * v;

        Self {
            q: DQuat::from_xyzw(xyz.x, xyz.y, xyz.z, w).normalize(),
        }
    }

    /// Lie group -> Lie algebra.
    pub fn log(&self) -> DVec3 {
        let mut w = self.q.w;
        let mut vec = DVec3::new(self.q.x, self.q.y, self.q.z);

        if w < 0.0 {
            w = -w;
            vec = -vec;
        }

        let theta = vec.length();

        if theta > SMALL_ANGLE_EPSILON {
            let half_theta = theta.atan2(w);
            vec * (2.0 * half_theta / theta)
        } else {
            vec * (2.0 / w)
        }
    }

    /// Apply a tangent-space increment on the left: `exp(tau) · x`.
    #[inline]
    pub fn lplus(tau: DVec3, x: &Self) -> Self {
        Self::exp(tau) * *x
    }

    /// Tangent-space difference on the left: `log(y · x⁻¹)`.
    #[inline]
    pub fn lminus(y: &Self, x: &Self) -> DVec3 {
        (*y * x.inverse()).log()
    }

    /// Vector space -> Lie algebra (skew-symmetric matrix).
    pub fn hat(v: DVec3) -> DMat3 {
        let (a, b, c) = (v.x, v.y, v.z);
        DMat3::from_cols_array(&[0.0, c, -b, -c, 0.0, a, b, -a, 0.0])
    }

    /// Lie algebra -> vector space.
    pub fn vee(omega: DMat3) -> DVec3 {
        DVec3::new(omega.y_axis.z, omega.z_axis.x, omega.x_axis.y)
    }
}

impl Mul for SO3 {
    type Output = SO3;

    fn mul(self, rhs: Self) -> Self::Output {
        Self {
            q: (self.q * rhs.q).normalize(),
        }
    }
}

impl Mul<DVec3> for SO3 {
    type Output = DVec3;

    fn mul(self, rhs: DVec3) -> Self::Output {
        self.rotate(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn max_abs_diff(a: &DMat3, b: &DMat3) -> f64 {
        (*a - *b)
            .to_cols_array()
            .iter()
            .fold(0.0, |acc, v| acc.max(v.abs()))
    }

    #[test]
    fn test_exp_zero_is_identity() {
        let s = SO3::exp(DVec3::ZERO);
        assert!(max_abs_diff(&s.matrix(), &DMat3::IDENTITY) < 1e-15);
    }

    #[test]
    fn test_exp_matches_axis_angle() {
        let v = DVec3::new(0.3, -0.2, 0.5);
        let expected = DMat3::from_axis_angle(v.normalize(), v.length());
        let r = SO3::exp(v).matrix();
        assert!(max_abs_diff(&r, &expected) < 1e-12);
    }

    #[test]
    fn test_exp_log() {
        for v in [
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.1, -0.4, 0.25),
            DVec3::new(-2.0, 1.0, 0.5),
            DVec3::new(1e-12, 0.0, -1e-12),
        ] {
            let log = SO3::exp(v).log();
            assert_relative_eq!(log.x, v.x, epsilon = 1e-10);
            assert_relative_eq!(log.y, v.y, epsilon = 1e-10);
            assert_relative_eq!(log.z, v.z, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_exp_is_orthonormal() {
        let r = SO3::exp(DVec3::new(0.7, 1.3, -0.4)).matrix();
        assert!(max_abs_diff(&(r * r.transpose()), &DMat3::IDENTITY) < 1e-12);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_from_matrix() {
        let mat = DMat3::from_cols_array(&[1.0, 0.0, 0.0, 0.0, 0.6, 0.8, 0.0, -0.8, 0.6]);
        let s = SO3::from_matrix(&mat);
        assert!(max_abs_diff(&s.matrix(), &mat) < 1e-12);
    }

    #[test]
    fn test_hat_vee() {
        let v = DVec3::new(1.0, 2.0, 3.0);
        let hat_v = SO3::hat(v);
        assert_eq!(hat_v.x_axis.y, 3.0);
        assert_eq!(hat_v.x_axis.z, -2.0);
        assert_eq!(hat_v.y_axis.x, -3.0);
        assert_eq!(hat_v.y_axis.z, 1.0);
        assert_eq!(hat_v.z_axis.x, 2.0);
        assert_eq!(hat_v.z_axis.y, -1.0);
        assert_eq!(SO3::vee(hat_v), v);

        // hat(v) * p == v x p
        let p = DVec3::new(-0.5, 0.25, 2.0);
        let lhs = hat_v * p;
        let rhs = v.cross(p);
        assert_relative_eq!(lhs.x, rhs.x, epsilon = 1e-12);
        assert_relative_eq!(lhs.y, rhs.y, epsilon = 1e-12);
        assert_relative_eq!(lhs.z, rhs.z, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse() {
        let so3 = SO3::exp(DVec3::new(0.5, -0.2, 0.1));
        let identity = so3.matrix() * so3.inverse().matrix();
        assert!(max_abs_diff(&identity, &DMat3::IDENTITY) < 1e-12);
    }

    #[test]
    fn test_lplus_lminus() {
        let x = SO3::exp(DVec3::new(0.2, 0.1, -0.3));
        let tau = DVec3::new(-0.05, 0.02, 0.01);
        let y = SO3::lplus(tau, &x);

        let expected = SO3::exp(tau).matrix() * x.matrix();
        assert!(max_abs_diff(&y.matrix(), &expected) < 1e-12);

        let back = SO3::lminus(&y, &x);
        assert_relative_eq!(back.x, tau.x, epsilon = 1e-10);
        assert_relative_eq!(back.y, tau.y, epsilon = 1e-10);
        assert_relative_eq!(back.z, tau.z, epsilon = 1e-10);
    }

    #[test]
    fn test_rotate_matches_matrix() {
        let so3 = SO3::exp(DVec3::new(0.3, 0.9, -0.1));
        let p = DVec3::new(1.0, -2.0, 0.5);
        let a = so3 * p;
        let b = so3.matrix() * p;
        assert_relative_eq!(a.x, b.x, epsilon = 1e-12);
        assert_relative_eq!(a.y, b.y, epsilon = 1e-12);
        assert_relative_eq!(a.z, b.z, epsilon = 1e-12);
    }
}
