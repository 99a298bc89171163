#![allow(clippy::op_ref)]

use glam::{DMat3, DVec2, DVec3};
use nalgebra::{DMatrix, DVector, Matrix3, Matrix4, Vector3};

use crate::pnp::PnPError;

pub(crate) fn mat3_to_na(m: &DMat3) -> Matrix3<f64> {
    Matrix3::from_column_slice(&m.to_cols_array())
}

pub(crate) fn mat3_from_na(m: &Matrix3<f64>) -> DMat3 {
    DMat3::from_cols_slice(m.as_slice())
}

pub(crate) fn vec3_to_na(v: DVec3) -> Vector3<f64> {
    Vector3::new(v.x, v.y, v.z)
}

pub(crate) fn vec3_from_na(v: &Vector3<f64>) -> DVec3 {
    DVec3::new(v.x, v.y, v.z)
}

/// Index of the smallest entry; singular values are not assumed to be sorted.
pub(crate) fn argmin(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |(best_i, best_v), (i, &v)| {
            if v < best_v {
                (i, v)
            } else {
                (best_i, best_v)
            }
        })
        .0
}

/// Indices sorting `values` in ascending order.
pub(crate) fn argsort_ascending(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    order
}

/// Compute the centroid of a set of points.
pub(crate) fn compute_centroid(pts: &[DVec3]) -> DVec3 {
    let n = pts.len() as f64;
    pts.iter().fold(DVec3::ZERO, |acc, &p| acc + p) / n
}

/// Root-mean-square reprojection error under the normalized pinhole model.
pub(crate) fn reprojection_rmse(
    points_world: &[DVec3],
    points_image: &[DVec2],
    r: &DMat3,
    t: &DVec3,
) -> f64 {
    let sum_sq: f64 = points_world
        .iter()
        .zip(points_image.iter())
        .map(|(&pw, &uv)| {
            let pc = *r * pw + *t;
            let du = pc.x / pc.z - uv.x;
            let dv = pc.y / pc.z - uv.y;
            du.mul_add(du, dv * dv)
        })
        .sum();
    (sum_sq / points_world.len() as f64).sqrt()
}

/// Umeyama/Kabsch alignment without scale: returns `(R, t)` with `dst ≈ R·src + t`.
pub(crate) fn umeyama(src: &[DVec3], dst: &[DVec3]) -> Result<(DMat3, DVec3), PnPError> {
    if src.len() != dst.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "source points",
            left_len: src.len(),
            right_name: "destination points",
            right_len: dst.len(),
        });
    }

    let mu_s = compute_centroid(src);
    let mu_d = compute_centroid(dst);

    // H = Σ (dst - mu_d) (src - mu_s)^T
    let mut h = Matrix3::<f64>::zeros();
    for (&s, &d) in src.iter().zip(dst.iter()) {
        h += vec3_to_na(d - mu_d) * vec3_to_na(s - mu_s).transpose();
    }

    let svd = h.svd(true, true);
    let mut u = svd
        .u
        .ok_or_else(|| PnPError::SvdFailed("Failed to compute U".to_string()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| PnPError::SvdFailed("Failed to compute V^T".to_string()))?;

    // Handle reflection by flipping the least significant direction.
    if (u * v_t).determinant() < 0.0 {
        let k = argmin(svd.singular_values.as_slice());
        u.column_mut(k).neg_mut();
    }

    let r = mat3_from_na(&(u * v_t));
    let t = mu_d - r * mu_s;
    Ok((r, t))
}

/// Hartley normalization of 2D points: zero mean, mean distance √2.
///
/// Returns the normalized points and the 3×3 similarity that produced them.
pub(crate) fn normalize_points_2d(pts: &[DVec2]) -> Option<(Vec<DVec2>, Matrix3<f64>)> {
    let n = pts.len() as f64;
    let mean = pts.iter().fold(DVec2::ZERO, |acc, &p| acc + p) / n;
    let mean_dist = pts.iter().map(|&p| (p - mean).length()).sum::<f64>() / n;
    if !mean_dist.is_finite() || mean_dist <= f64::EPSILON {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;

    #[rustfmt::skip]
    let t = Matrix3::new(
        s, 0.0, -s * mean.x,
        0.0, s, -s * mean.y,
        0.0, 0.0, 1.0,
    );
    let normalized = pts.iter().map(|&p| (p - mean) * s).collect();
    Some((normalized, t))
}

/// Hartley normalization of 3D points: zero mean, mean distance √3.
///
/// Returns the normalized points and the 4×4 similarity that produced them.
pub(crate) fn normalize_points_3d(pts: &[DVec3]) -> Option<(Vec<DVec3>, Matrix4<f64>)> {
    let mean = compute_centroid(pts);
    let n = pts.len() as f64;
    let mean_dist = pts.iter().map(|&p| (p - mean).length()).sum::<f64>() / n;
    if !mean_dist.is_finite() || mean_dist <= f64::EPSILON {
        return None;
    }
    let s = 3.0f64.sqrt() / mean_dist;

    #[rustfmt::skip]
    let t = Matrix4::new(
        s, 0.0, 0.0, -s * mean.x,
        0.0, s, 0.0, -s * mean.y,
        0.0, 0.0, s, -s * mean.z,
        0.0, 0.0, 0.0, 1.0,
    );
    let normalized = pts.iter().map(|&p| (p - mean) * s).collect();
    Some((normalized, t))
}

/// Control point `j` of null-space vector `k` (rows `3j..3j+3`, column `k`).
#[inline]
pub(crate) fn null_block(null: &DMatrix<f64>, j: usize, k: usize) -> DVec3 {
    DVec3::new(null[(3 * j, k)], null[(3 * j + 1, k)], null[(3 * j + 2, k)])
}

/// Camera-frame control points `Σ_k β_k v_k`.
pub(crate) fn control_points_from_betas(null: &DMatrix<f64>, betas: &[f64]) -> Vec<DVec3> {
    let nc = null.nrows() / 3;
    (0..nc)
        .map(|j| {
            betas
                .iter()
                .enumerate()
                .fold(DVec3::ZERO, |acc, (k, &b)| acc + null_block(null, j, k) * b)
        })
        .collect()
}

const GN_MAX_ITERATIONS: usize = 10;
const GN_DAMPING: f64 = 1e-12;
const GN_STOP_EPS: f64 = 1e-14;

/// Gauss-Newton refinement of the betas so that the distances between the
/// camera-frame control points match the world-frame ones.
///
/// * `null` – null-space basis, shape `(3·nc, nc)`.
/// * `pairs` – control point pairs, one per entry of `rho`.
/// * `rho` – squared world distances for each pair.
pub(crate) fn gauss_newton(
    beta_init: &[f64],
    null: &DMatrix<f64>,
    pairs: &[(usize, usize)],
    rho: &[f64],
) -> Vec<f64> {
    let dim = beta_init.len();
    let mut bet = DVector::from_column_slice(beta_init);

    for _ in 0..GN_MAX_ITERATIONS {
        let cc = control_points_from_betas(null, bet.as_slice());

        let mut f = DVector::<f64>::zeros(pairs.len());
        let mut j = DMatrix::<f64>::zeros(pairs.len(), dim);

        for (r, &(a, b)) in pairs.iter().enumerate() {
            let diff = cc[a] - cc[b];
            f[r] = diff.length_squared() - rho[r];
            for k in 0..dim {
                let d_col = null_block(null, a, k) - null_block(null, b, k);
                j[(r, k)] = 2.0 * diff.dot(d_col);
            }
        }

        let mut a = j.transpose() * &j;
        for d in 0..dim {
            a[(d, d)] += GN_DAMPING;
        }
        let rhs = j.transpose() * f;

        let Some(delta) = a.cholesky().map(|c| c.solve(&rhs)) else {
            break;
        };
        bet -= &delta;
        if delta.norm() < GN_STOP_EPS {
            break;
        }
    }

    bet.iter().copied().collect()
}
