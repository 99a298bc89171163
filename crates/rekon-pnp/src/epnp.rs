//! Efficient Perspective-n-Point (EPnP) solver
//! Paper: https://www.tugraz.at/fileadmin/user_upload/Institute/ICG/Images/team_lepetit/publications/lepetit_ijcv08.pdf
//!
//! World points are expressed as barycentric combinations of four control
//! points (three for planar scenes). The camera-frame control points lie in
//! the null space of a `2N × 3·nc` system built from the observations; the
//! null-space weights (betas) are fixed by requiring the inter-control-point
//! distances to match the world ones.

use glam::{DVec2, DVec3};
use nalgebra::{DMatrix, DVector, Matrix3};
use rekon_lie::SO3;

use crate::ops::{
    argsort_ascending, compute_centroid, control_points_from_betas, gauss_newton, null_block,
    reprojection_rmse, umeyama, vec3_to_na,
};
use crate::pnp::{check_correspondences, NumericTol, PnPError, PnPResult, PnPSolver};

/// Minimum number of correspondences EPnP accepts.
pub const EPNP_MIN_POINTS: usize = 4;

/// Marker type representing the Efficient PnP algorithm.
pub struct EPnP;

impl PnPSolver for EPnP {
    type Param = EPnPParams;

    fn solve(
        points_world: &[DVec3],
        points_image: &[DVec2],
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError> {
        solve_epnp(points_world, points_image, params)
    }
}

/// Parameters controlling the EPnP solver.
#[derive(Debug, Clone)]
pub struct EPnPParams {
    /// Shared numeric tolerances.
    pub tol: NumericTol,
    /// Ratio between the smallest and largest principal extent of the world
    /// points below which the scene is treated as planar.
    pub planar_threshold: f64,
}

impl Default for EPnPParams {
    fn default() -> Self {
        Self {
            tol: NumericTol::default(),
            planar_threshold: 1e-6,
        }
    }
}

impl EPnPParams {
    /// Set the planarity threshold.
    pub fn with_planar_threshold(mut self, threshold: f64) -> Self {
        self.planar_threshold = threshold;
        self
    }
}

/// Control points in the world frame: centroid plus principal axes.
struct ControlPoints {
    points: Vec<DVec3>,
    /// Principal directions scaled by their extent, one per non-centroid control point.
    axes: Vec<DVec3>,
}

impl ControlPoints {
    fn count(&self) -> usize {
        self.points.len()
    }

    fn is_planar(&self) -> bool {
        self.points.len() == 3
    }

    fn pairs(&self) -> &'static [(usize, usize)] {
        if self.is_planar() {
            &CP_PAIRS[..3]
        } else {
            &CP_PAIRS
        }
    }
}

const CP_PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (1, 2), (0, 3), (1, 3), (2, 3)];

/// Solve Perspective-n-Point (EPnP).
///
/// # Arguments
/// * `points_world` – 3-D coordinates in the world frame, `N ≥ 4`.
/// * `points_image` – Corresponding normalized image coordinates.
///
/// # Returns
/// [`PnPResult`] with the rotation **world → camera**, the translation, the
/// Rodrigues vector of the rotation and the RMS reprojection error of the
/// best candidate.
pub fn solve_epnp(
    points_world: &[DVec3],
    points_image: &[DVec2],
    params: &EPnPParams,
) -> Result<PnPResult, PnPError> {
    check_correspondences(points_world, points_image, EPNP_MIN_POINTS)?;

    let cw = select_control_points(points_world, params)?;
    let nc = cw.count();
    let alphas = compute_barycentric(points_world, &cw);

    let m = build_m(&alphas, points_image, nc);
    let null = null_space(&m, nc)?;

    let pairs = cw.pairs();
    let rho: Vec<f64> = pairs
        .iter()
        .map(|&(a, b)| (cw.points[a] - cw.points[b]).length_squared())
        .collect();
    let l = build_l(&null, pairs);
    let rho_vec = DVector::from_column_slice(&rho);

    let mut betas: Vec<Vec<f64>> = Vec::new();
    betas.extend(estimate_beta_linear(&l, &rho_vec, nc, params.tol.svd));
    betas.extend(estimate_beta_two(&l, &rho_vec, nc, params.tol.svd));
    if !cw.is_planar() {
        betas.extend(estimate_beta_three(&l, &rho_vec, nc, params.tol.svd));
    }

    let mut best: Option<(f64, glam::DMat3, DVec3)> = None;
    for beta in &betas {
        let refined = gauss_newton(beta, &null, pairs, &rho);
        let Some((r_c, t_c)) = pose_from_betas(&refined, &null, &alphas, points_world) else {
            continue;
        };
        let err = reprojection_rmse(points_world, points_image, &r_c, &t_c);
        if !err.is_finite() {
            continue;
        }
        if best.as_ref().map_or(true, |(best_err, _, _)| err < *best_err) {
            best = Some((err, r_c, t_c));
        }
    }

    let (best_err, best_r, best_t) = best.ok_or(PnPError::NoSolution)?;

    log::debug!(
        "EPnP: {} points, {} control points, {} beta candidates, rmse {:e}",
        points_world.len(),
        nc,
        betas.len(),
        best_err
    );

    Ok(PnPResult {
        rotation: best_r,
        translation: best_t,
        rvec: SO3::from_matrix(&best_r).log(),
        reproj_rmse: Some(best_err),
        planar: cw.is_planar(),
    })
}

/// Select the centroid and the principal axes of the world points as control points.
fn select_control_points(
    points_world: &[DVec3],
    params: &EPnPParams,
) -> Result<ControlPoints, PnPError> {
    let n = points_world.len() as f64;
    let c = compute_centroid(points_world);

    let mut cov = Matrix3::<f64>::zeros();
    for &p in points_world {
        let d = vec3_to_na(p - c);
        cov += d * d.transpose();
    }
    cov /= n;

    let eigen = cov.symmetric_eigen();
    let values = eigen.eigenvalues.as_slice();
    let mut order = argsort_ascending(values);
    order.reverse();

    let axes_sig: Vec<(f64, DVec3)> = order
        .iter()
        .map(|&i| {
            let v = eigen.eigenvectors.column(i);
            (values[i].max(0.0).sqrt(), DVec3::new(v[0], v[1], v[2]))
        })
        .collect();

    let largest = axes_sig[0].0;
    if largest <= params.tol.eps {
        return Err(PnPError::DegenerateConfiguration(
            "world points coincide".to_string(),
        ));
    }
    if axes_sig[1].0 <= params.planar_threshold * largest {
        return Err(PnPError::DegenerateConfiguration(
            "world points are collinear".to_string(),
        ));
    }

    let planar = axes_sig[2].0 <= params.planar_threshold * largest;
    let num_axes = if planar { 2 } else { 3 };

    let axes: Vec<DVec3> = axes_sig
        .iter()
        .take(num_axes)
        .map(|(sigma, axis)| *axis * *sigma)
        .collect();

    let mut points = Vec::with_capacity(num_axes + 1);
    points.push(c);
    points.extend(axes.iter().map(|&a| c + a));

    Ok(ControlPoints { points, axes })
}

/// Barycentric coordinates of world points with respect to the control points.
///
/// The control axes are orthogonal, so each coordinate is a projection onto
/// its axis. The returned `[α0, α1, α2, α3]` sum to one and `α3 = 0` for
/// planar configurations.
fn compute_barycentric(points_world: &[DVec3], cw: &ControlPoints) -> Vec<[f64; 4]> {
    let c0 = cw.points[0];
    points_world
        .iter()
        .map(|&p| {
            let diff = p - c0;
            let mut alpha = [0.0; 4];
            for (i, axis) in cw.axes.iter().enumerate() {
                alpha[i + 1] = diff.dot(*axis) / axis.length_squared();
            }
            alpha[0] = 1.0 - alpha[1..].iter().sum::<f64>();
            alpha
        })
        .collect()
}

/// Construct the `2N × 3·nc` design matrix **M** used by EPnP.
///
/// Rows are padded with zeros up to `3·nc` so that the decomposition always
/// yields a full right-singular basis.
fn build_m(alphas: &[[f64; 4]], points_image: &[DVec2], nc: usize) -> DMatrix<f64> {
    let n = alphas.len();
    let cols = 3 * nc;
    let mut m = DMatrix::<f64>::zeros((2 * n).max(cols), cols);

    for (i, (a, uv)) in alphas.iter().zip(points_image.iter()).enumerate() {
        let row_x = 2 * i;
        let row_y = row_x + 1;

        for (j, &alpha) in a.iter().take(nc).enumerate() {
            let base = 3 * j;
            m[(row_x, base)] = alpha;
            m[(row_x, base + 2)] = -alpha * uv.x;
            m[(row_y, base + 1)] = alpha;
            m[(row_y, base + 2)] = -alpha * uv.y;
        }
    }

    m
}

/// Right-singular vectors of `m` for the `nc` smallest singular values,
/// arranged as columns of a `3·nc × nc` matrix, smallest first.
fn null_space(m: &DMatrix<f64>, nc: usize) -> Result<DMatrix<f64>, PnPError> {
    let svd = m.clone().svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| PnPError::SvdFailed("Failed to compute V^T".to_string()))?;
    let order = argsort_ascending(svd.singular_values.as_slice());

    let mut null = DMatrix::<f64>::zeros(v_t.ncols(), nc);
    for (k, &row) in order.iter().take(nc).enumerate() {
        null.set_column(k, &v_t.row(row).transpose());
    }
    Ok(null)
}

/// Column of the L matrix holding the coefficient of `β_a·β_b` (`a ≤ b`).
#[inline]
fn l_col(a: usize, b: usize) -> usize {
    b * (b + 1) / 2 + a
}

/// Build the `pairs × nc(nc+1)/2` matrix **L** so that `L·β̄ = ρ`, where `β̄`
/// stacks the products `β_a·β_b`.
fn build_l(null: &DMatrix<f64>, pairs: &[(usize, usize)]) -> DMatrix<f64> {
    let nc = null.ncols();
    let mut l = DMatrix::<f64>::zeros(pairs.len(), nc * (nc + 1) / 2);

    for (r, &(i, j)) in pairs.iter().enumerate() {
        let dv: Vec<DVec3> = (0..nc)
            .map(|k| null_block(null, i, k) - null_block(null, j, k))
            .collect();
        for b in 0..nc {
            for a in 0..=b {
                let scale = if a == b { 1.0 } else { 2.0 };
                l[(r, l_col(a, b))] = scale * dv[a].dot(dv[b]);
            }
        }
    }

    l
}

/// Least-squares solve of `L[:, cols] · x = ρ`.
fn solve_l_subset(l: &DMatrix<f64>, cols: &[usize], rho: &DVector<f64>, tol: f64) -> Option<Vec<f64>> {
    let l_sub = l.select_columns(cols.iter());
    let sol = l_sub.svd(true, true).solve(rho, tol).ok()?;
    let x: Vec<f64> = sol.iter().copied().collect();
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Betas from the products `β0·β_k` only (all betas active).
fn estimate_beta_linear(l: &DMatrix<f64>, rho: &DVector<f64>, nc: usize, tol: f64) -> Option<Vec<f64>> {
    let cols: Vec<usize> = (0..nc).map(|k| l_col(0, k)).collect();
    let x = solve_l_subset(l, &cols, rho, tol)?;

    let (b0, sign) = if x[0] < 0.0 {
        ((-x[0]).sqrt(), -1.0)
    } else {
        (x[0].sqrt(), 1.0)
    };
    if b0 <= 0.0 {
        return None;
    }

    let mut beta = vec![0.0; nc];
    beta[0] = b0;
    for k in 1..nc {
        beta[k] = sign * x[k] / b0;
    }
    Some(beta)
}

/// Betas assuming only the two smallest null vectors contribute.
fn estimate_beta_two(l: &DMatrix<f64>, rho: &DVector<f64>, nc: usize, tol: f64) -> Option<Vec<f64>> {
    let x = solve_l_subset(l, &[l_col(0, 0), l_col(0, 1), l_col(1, 1)], rho, tol)?;

    let mut beta = vec![0.0; nc];
    if x[0] < 0.0 {
        beta[0] = (-x[0]).sqrt();
        beta[1] = if x[2] > 0.0 { 0.0 } else { (-x[2]).sqrt() };
    } else {
        beta[0] = x[0].sqrt();
        beta[1] = if x[2] < 0.0 { 0.0 } else { x[2].sqrt() };
    }
    if x[1] < 0.0 {
        beta[0] = -beta[0];
    }
    Some(beta)
}

/// Betas assuming only the three smallest null vectors contribute.
fn estimate_beta_three(l: &DMatrix<f64>, rho: &DVector<f64>, nc: usize, tol: f64) -> Option<Vec<f64>> {
    let cols = [l_col(0, 0), l_col(0, 1), l_col(1, 1), l_col(0, 2), l_col(1, 2)];
    let x = solve_l_subset(l, &cols, rho, tol)?;

    let mut beta = vec![0.0; nc];
    if x[0] < 0.0 {
        beta[0] = (-x[0]).sqrt();
        beta[1] = if x[2] > 0.0 { 0.0 } else { (-x[2]).sqrt() };
    } else {
        beta[0] = x[0].sqrt();
        beta[1] = if x[2] < 0.0 { 0.0 } else { x[2].sqrt() };
    }
    if x[1] < 0.0 {
        beta[0] = -beta[0];
    }
    if beta[0] == 0.0 {
        return None;
    }
    beta[2] = x[3] / beta[0];
    Some(beta)
}

/// Compute pose (R, t) from a set of betas using the null-space vectors.
///
/// The camera-frame points are rebuilt from their barycentric coordinates and
/// aligned with the world points. The sign of the solution is chosen so that
/// the first point lies in front of the camera.
fn pose_from_betas(
    betas: &[f64],
    null: &DMatrix<f64>,
    alphas: &[[f64; 4]],
    points_world: &[DVec3],
) -> Option<(glam::DMat3, DVec3)> {
    let mut cc = control_points_from_betas(null, betas);

    let camera_point = |alpha: &[f64; 4], cc: &[DVec3]| {
        cc.iter()
            .zip(alpha.iter())
            .fold(DVec3::ZERO, |acc, (&c, &a)| acc + c * a)
    };

    if camera_point(&alphas[0], &cc).z < 0.0 {
        for pt in &mut cc {
            *pt = -*pt;
        }
    }

    let points_camera: Vec<DVec3> = alphas.iter().map(|a| camera_point(a, &cc)).collect();
    let (r, t) = umeyama(points_world, &points_camera).ok()?;

    (r.is_finite() && t.is_finite()).then_some((r, t))
}
