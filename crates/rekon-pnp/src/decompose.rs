//! Decomposition of a 3×4 projection matrix into intrinsics and pose.

use glam::{DMat3, DVec3};
use nalgebra::{Matrix3, Matrix3x4};

use crate::ops::{argmin, mat3_from_na, mat3_to_na, vec3_from_na};
use crate::pnp::PnPError;

/// Factors of a projection matrix `P = K·[R | t]`.
#[derive(Debug, Clone)]
pub struct ProjectionDecomposition {
    /// Upper-triangular intrinsics with positive diagonal, scaled so that `K[2][2] = 1`.
    pub intrinsics: DMat3,
    /// Orthogonal factor. Its determinant has the sign of `det(P[:, :3])`.
    pub rotation: DMat3,
    /// Translation, metric up to the scale of `P` being absorbed by `K`.
    pub translation: DVec3,
}

/// RQ decomposition `m = K·Q` with `K` upper triangular and `Q` orthogonal.
///
/// The diagonal of `K` is made non-negative by moving signs into `Q`.
pub fn rq_decompose(m: &Matrix3<f64>) -> (Matrix3<f64>, Matrix3<f64>) {
    #[rustfmt::skip]
    let flip = Matrix3::new(
        0.0, 0.0, 1.0,
        0.0, 1.0, 0.0,
        1.0, 0.0, 0.0,
    );

    // (J·m)ᵀ = Q·R  =>  m = (J·Rᵀ·J)·(J·Qᵀ)
    let qr = (flip * m).transpose().qr();
    let mut k = flip * qr.r().transpose() * flip;
    let mut q = flip * qr.q().transpose();

    for i in 0..3 {
        if k[(i, i)] < 0.0 {
            k.column_mut(i).neg_mut();
            q.row_mut(i).neg_mut();
        }
    }

    (k, q)
}

/// Decompose a projection matrix into `K`, `R` and `t`.
///
/// Fails when the left 3×3 block is singular.
pub fn decompose_projection(p: &Matrix3x4<f64>) -> Result<ProjectionDecomposition, PnPError> {
    let m: Matrix3<f64> = p.fixed_view::<3, 3>(0, 0).into_owned();
    let (k, q) = rq_decompose(&m);

    let k_inv = k.try_inverse().ok_or_else(|| {
        PnPError::DegenerateConfiguration("projection matrix has a singular 3x3 block".to_string())
    })?;
    let t = k_inv * p.column(3);

    let scale = k[(2, 2)];
    if scale.abs() <= f64::EPSILON {
        return Err(PnPError::DegenerateConfiguration(
            "projection matrix has a vanishing focal scale".to_string(),
        ));
    }

    Ok(ProjectionDecomposition {
        intrinsics: mat3_from_na(&(k / scale)),
        rotation: mat3_from_na(&q),
        translation: vec3_from_na(&t),
    })
}

/// Nearest rotation to `m` in the Frobenius sense.
///
/// Computes the polar factor `U·Vᵀ`. When that has determinant −1 the column of
/// `U` belonging to the smallest singular value is negated. Also returns the
/// singular values of `m`.
pub fn nearest_rotation(m: &DMat3) -> Result<(DMat3, DVec3), PnPError> {
    let svd = mat3_to_na(m).svd(true, true);
    let mut u = svd
        .u
        .ok_or_else(|| PnPError::SvdFailed("Failed to compute U".to_string()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| PnPError::SvdFailed("Failed to compute V^T".to_string()))?;

    if (u * v_t).determinant() < 0.0 {
        let k = argmin(svd.singular_values.as_slice());
        u.column_mut(k).neg_mut();
    }

    Ok((mat3_from_na(&(u * v_t)), vec3_from_na(&svd.singular_values)))
}
