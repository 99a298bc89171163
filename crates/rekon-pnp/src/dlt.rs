//! Normalized Direct Linear Transform for projective resection.
//!
//! Estimates a 3×4 projection matrix `P` with `x ~ P·[X; 1]` from at least six
//! 2D-3D correspondences, then recovers a Euclidean pose from it.

use glam::{DMat3, DVec2, DVec3};
use nalgebra::{DMatrix, Matrix3x4, Vector4};
use rekon_lie::SO3;

use crate::decompose::{decompose_projection, nearest_rotation};
use crate::ops::{argsort_ascending, normalize_points_2d, normalize_points_3d, reprojection_rmse};
use crate::pnp::{check_correspondences, NumericTol, PnPError, PnPResult, PnPSolver};

/// Minimum number of correspondences the DLT accepts.
pub const DLT_MIN_POINTS: usize = 6;

/// Marker type representing projective resection followed by KRt decomposition.
pub struct DLT;

impl PnPSolver for DLT {
    type Param = DltParams;

    fn solve(
        points_world: &[DVec3],
        points_image: &[DVec2],
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError> {
        let p = projective_resection(points_world, points_image, params)?;
        let pose = pose_from_projection(&p, points_world[0])?;
        let rmse = reprojection_rmse(points_world, points_image, &pose.rotation, &pose.translation);

        Ok(PnPResult {
            rotation: pose.rotation,
            translation: pose.translation,
            rvec: SO3::from_matrix(&pose.rotation).log(),
            reproj_rmse: Some(rmse),
            planar: false,
        })
    }
}

/// Parameters for the DLT solver.
#[derive(Debug, Clone, Default)]
pub struct DltParams {
    /// Shared numeric tolerances. `eps` bounds the ratio between the second
    /// smallest and the largest singular value of the design matrix.
    pub tol: NumericTol,
}

impl DltParams {
    /// Set the numeric tolerances.
    pub fn with_tolerance(mut self, tol: NumericTol) -> Self {
        self.tol = tol;
        self
    }
}

/// Estimate the projection matrix from 2D-3D correspondences.
///
/// The points are Hartley-normalized before building the `2N × 12` system and
/// the result is denormalized and scaled to unit Frobenius norm. The sign of
/// the returned matrix is arbitrary; see [`orient_projection`].
pub fn projective_resection(
    points_world: &[DVec3],
    points_image: &[DVec2],
    params: &DltParams,
) -> Result<Matrix3x4<f64>, PnPError> {
    check_correspondences(points_world, points_image, DLT_MIN_POINTS)?;

    let (image_n, t_image) = normalize_points_2d(points_image).ok_or_else(|| {
        PnPError::DegenerateConfiguration("image points coincide".to_string())
    })?;
    let (world_n, t_world) = normalize_points_3d(points_world).ok_or_else(|| {
        PnPError::DegenerateConfiguration("world points coincide".to_string())
    })?;

    let n = points_world.len();
    let mut a = DMatrix::<f64>::zeros((2 * n).max(12), 12);
    for (i, (xw, uv)) in world_n.iter().zip(image_n.iter()).enumerate() {
        let x = [xw.x, xw.y, xw.z, 1.0];
        for (j, &xj) in x.iter().enumerate() {
            a[(2 * i, j)] = xj;
            a[(2 * i, 8 + j)] = -uv.x * xj;
            a[(2 * i + 1, 4 + j)] = xj;
            a[(2 * i + 1, 8 + j)] = -uv.y * xj;
        }
    }

    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| PnPError::SvdFailed("Failed to compute V^T".to_string()))?;
    let sv = svd.singular_values.as_slice();
    let order = argsort_ascending(sv);

    let largest = sv[order[order.len() - 1]];
    if sv[order[1]] <= params.tol.eps * largest {
        return Err(PnPError::DegenerateConfiguration(
            "projection is not uniquely determined by the points".to_string(),
        ));
    }

    let h = v_t.row(order[0]);
    let p_n = Matrix3x4::from_fn(|r, c| h[(0, 4 * r + c)]);

    let t_image_inv = t_image.try_inverse().ok_or_else(|| {
        PnPError::DegenerateConfiguration("image normalization is singular".to_string())
    })?;
    let p = t_image_inv * p_n * t_world;

    let norm = p.norm();
    if !norm.is_finite() || norm <= params.tol.svd {
        return Err(PnPError::NoSolution);
    }

    log::debug!(
        "DLT: {} points, singular gap {:e}",
        n,
        sv[order[1]] / largest.max(f64::MIN_POSITIVE)
    );

    Ok(p / norm)
}

/// Depth of `point` along the optical axis of `p`, i.e. `(P·[X; 1])_z`.
pub fn projective_depth(p: &Matrix3x4<f64>, point: DVec3) -> f64 {
    (p * Vector4::new(point.x, point.y, point.z, 1.0)).z
}

/// Negate `p` when `reference` projects with negative depth.
///
/// Returns the oriented matrix and whether it was flipped.
pub fn orient_projection(p: &Matrix3x4<f64>, reference: DVec3) -> (Matrix3x4<f64>, bool) {
    if projective_depth(p, reference) < 0.0 {
        (-p, true)
    } else {
        (*p, false)
    }
}

/// Euclidean pose recovered from a projection matrix.
#[derive(Debug, Clone)]
pub struct ProjectivePose {
    /// Nearest rotation to the orthogonal factor of `P`.
    pub rotation: DMat3,
    /// Translation from the KRt decomposition.
    pub translation: DVec3,
    /// Whether `P` had to be negated to put the reference point in front.
    pub flipped: bool,
    /// Singular values of the orthogonal factor before correction.
    pub singular_values: DVec3,
    /// Determinant of the orthogonal factor before correction.
    pub determinant: f64,
    /// Depth of the reference point under the final pose.
    pub reference_depth: f64,
}

impl ProjectivePose {
    /// Whether the reference point lies behind the recovered camera.
    pub fn is_behind_camera(&self) -> bool {
        self.reference_depth < 0.0
    }
}

/// Orient `p` by `reference`, decompose it and project the rotation onto SO(3).
pub fn pose_from_projection(
    p: &Matrix3x4<f64>,
    reference: DVec3,
) -> Result<ProjectivePose, PnPError> {
    let (p, flipped) = orient_projection(p, reference);
    let dec = decompose_projection(&p)?;

    let determinant = dec.rotation.determinant();
    let (rotation, singular_values) = nearest_rotation(&dec.rotation)?;
    let reference_depth = (rotation * reference + dec.translation).z;

    Ok(ProjectivePose {
        rotation,
        translation: dec.translation,
        flipped,
        singular_values,
        determinant,
        reference_depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_scene(seed: u64, n: usize) -> (Vec<DVec3>, Vec<DVec2>, DMat3, DVec3) {
        let mut rng = StdRng::seed_from_u64(seed);
        let r = SO3::exp(DVec3::new(0.15, -0.3, 0.05)).matrix();
        let t = DVec3::new(0.3, 0.1, 5.0);

        let world: Vec<DVec3> = (0..n)
            .map(|_| {
                DVec3::new(
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                )
            })
            .collect();
        let image = world
            .iter()
            .map(|&p| {
                let pc = r * p + t;
                DVec2::new(pc.x / pc.z, pc.y / pc.z)
            })
            .collect();
        (world, image, r, t)
    }

    #[test]
    fn test_projective_resection_reprojects() -> Result<(), PnPError> {
        let (world, image, _, _) = random_scene(7, 10);
        let p = projective_resection(&world, &image, &DltParams::default())?;
        assert_relative_eq!(p.norm(), 1.0, epsilon = 1e-12);

        for (xw, uv) in world.iter().zip(image.iter()) {
            let x = p * Vector4::new(xw.x, xw.y, xw.z, 1.0);
            assert_relative_eq!(x.x / x.z, uv.x, epsilon = 1e-9);
            assert_relative_eq!(x.y / x.z, uv.y, epsilon = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_dlt_solver_recovers_pose() -> Result<(), PnPError> {
        let (world, image, r, t) = random_scene(11, 8);
        let result = DLT::solve(&world, &image, &DltParams::default())?;

        assert!(result.rotation.abs_diff_eq(r, 1e-8));
        assert!(result.translation.abs_diff_eq(t, 1e-7));
        assert!(result.reproj_rmse.is_some_and(|e| e < 1e-9));
        assert!(!result.planar);
        Ok(())
    }

    #[test]
    fn test_negated_projection_is_reoriented() -> Result<(), PnPError> {
        let (world, image, r, t) = random_scene(3, 8);
        let p = projective_resection(&world, &image, &DltParams::default())?;
        let negated = -p;
        assert!(projective_depth(&negated, world[0]) * projective_depth(&p, world[0]) < 0.0);

        let (oriented, _) = orient_projection(&negated, world[0]);
        assert!(projective_depth(&oriented, world[0]) > 0.0);

        let pose = pose_from_projection(&negated, world[0])?;
        assert!(!pose.is_behind_camera());
        assert!(pose.rotation.abs_diff_eq(r, 1e-8));
        assert!(pose.translation.abs_diff_eq(t, 1e-7));
        assert_relative_eq!(pose.determinant, 1.0, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_requires_six_points() {
        let (world, image, _, _) = random_scene(5, 5);
        assert!(matches!(
            projective_resection(&world, &image, &DltParams::default()),
            Err(PnPError::InsufficientCorrespondences {
                required: 6,
                actual: 5
            })
        ));
    }

    #[test]
    fn test_tolerance_rejects_well_spread_points() -> Result<(), PnPError> {
        let (world, image, _, _) = random_scene(13, 10);
        projective_resection(&world, &image, &DltParams::default())?;

        let strict = DltParams::default().with_tolerance(NumericTol {
            svd: 1e-12,
            eps: 0.9,
        });
        assert!(matches!(
            projective_resection(&world, &image, &strict),
            Err(PnPError::DegenerateConfiguration(_))
        ));
        Ok(())
    }

    #[test]
    fn test_planar_points_are_degenerate() {
        let world: Vec<DVec3> = (0..8)
            .map(|i| DVec3::new((i % 4) as f64 * 0.5, (i / 4) as f64 * 0.7 + 0.1 * i as f64, 0.0))
            .collect();
        let image: Vec<DVec2> = world
            .iter()
            .map(|p| DVec2::new(p.x / (p.y + 4.0), p.y / (p.y + 4.0)))
            .collect();
        assert!(matches!(
            projective_resection(&world, &image, &DltParams::default()),
            Err(PnPError::DegenerateConfiguration(_))
        ));
    }
}
