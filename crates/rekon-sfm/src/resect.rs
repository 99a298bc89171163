//! Euclidean resection of a single camera from its markers.
//!
//! The pipeline assembles 2D-3D correspondences from the reconstruction,
//! computes a closed-form initial pose (EPnP, optionally falling back to
//! projective resection), refines it with Levenberg-Marquardt over the
//! reprojection error and finally publishes the pose.

use glam::{DMat3, DVec2, DVec3};
use nalgebra::DVector;
use rekon_lie::SO3;
use rekon_optim::{
    CostFunction, LevenbergMarquardt, OptimizerError, OptimizerResult, TerminationReason,
};
use rekon_pnp::{
    pose_from_projection, projective_resection, solve_epnp, DltParams, EPnPParams, PnPError,
};
use thiserror::Error;

use crate::marker::{Marker, TrackId};
use crate::reconstruction::{CameraPose, Reconstruction};

/// Minimum number of markers required to resect a camera.
pub const MIN_CORRESPONDENCES: usize = 5;

/// Errors produced by camera resection.
#[derive(Debug, Error)]
pub enum ResectError {
    /// Not enough markers to constrain the pose.
    #[error("Resection requires at least {required} markers, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of markers.
        required: usize,
        /// Number of markers provided.
        actual: usize,
    },

    /// A marker refers to a track without a triangulated point.
    #[error("No triangulated point for track {track}")]
    MissingPoint {
        /// Track of the offending marker.
        track: TrackId,
    },

    /// EPnP failed and no fallback was allowed.
    #[error("EPnP failed: {0}")]
    PrimaryEstimationFailed(#[source] PnPError),

    /// EPnP failed and the projective fallback could not produce a pose.
    #[error("Projective fallback failed: {0}")]
    FallbackFailed(#[source] PnPError),

    /// The fallback pose still places the reference point behind the camera.
    #[error("Reference point is behind the camera after correction (depth {depth})")]
    FallbackDegenerate {
        /// Depth of the reference point under the corrected pose.
        depth: f64,
    },

    /// Refinement stopped without meeting a convergence criterion.
    #[error("Pose refinement did not converge: {reason:?} after {iterations} iterations")]
    RefinementNonConvergence {
        /// Why the optimizer stopped.
        reason: TerminationReason,
        /// Iterations performed.
        iterations: usize,
    },

    /// The optimizer rejected the problem.
    #[error(transparent)]
    Refinement(#[from] OptimizerError),
}

/// Parameters for camera resection.
#[derive(Debug, Clone, Default)]
pub struct ResectParams {
    /// Run projective resection when EPnP fails.
    pub allow_fallback: bool,
    /// Fail when the fallback pose keeps the reference point behind the camera.
    pub strict_fallback: bool,
    /// Fail when the refinement does not converge.
    pub require_convergence: bool,
    /// EPnP parameters.
    pub epnp: EPnPParams,
    /// Projective resection parameters.
    pub dlt: DltParams,
    /// Refinement parameters.
    pub lm: LevenbergMarquardt,
}

impl ResectParams {
    /// Enable or disable the projective fallback.
    pub fn with_allow_fallback(mut self, allow: bool) -> Self {
        self.allow_fallback = allow;
        self
    }

    /// Treat a fallback pose with the reference point behind the camera as an error.
    pub fn with_strict_fallback(mut self, strict: bool) -> Self {
        self.strict_fallback = strict;
        self
    }

    /// Treat a non-converged refinement as an error.
    pub fn with_require_convergence(mut self, require: bool) -> Self {
        self.require_convergence = require;
        self
    }

    /// Set the EPnP parameters.
    pub fn with_epnp(mut self, epnp: EPnPParams) -> Self {
        self.epnp = epnp;
        self
    }

    /// Set the projective fallback parameters.
    pub fn with_dlt(mut self, dlt: DltParams) -> Self {
        self.dlt = dlt;
        self
    }

    /// Set the refinement parameters.
    pub fn with_lm(mut self, lm: LevenbergMarquardt) -> Self {
        self.lm = lm;
        self
    }
}

/// How the initial pose was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialEstimate {
    /// Closed-form EPnP.
    EPnP,
    /// Projective resection and KRt decomposition.
    Projective {
        /// Whether the projection matrix was negated to orient it.
        flipped: bool,
    },
}

/// Outcome of a successful resection.
#[derive(Debug, Clone)]
pub struct ResectReport {
    /// Refined camera pose.
    pub pose: CameraPose,
    /// Path that produced the initial pose.
    pub initial_estimate: InitialEstimate,
    /// Optimizer summary of the refinement.
    pub refinement: OptimizerResult,
    /// RMS reprojection error of the initial pose.
    pub initial_rmse: f64,
    /// RMS reprojection error of the refined pose.
    pub final_rmse: f64,
    /// Number of correspondences used.
    pub num_correspondences: usize,
}

/// Reprojection residuals of a pose `exp(δ)·R₀, t` in normalized coordinates.
///
/// Parameters are `[δx, δy, δz, tx, ty, tz]`; two residuals per point.
pub struct ResectCost<'a> {
    points_world: &'a [DVec3],
    points_image: &'a [DVec2],
    base_rotation: SO3,
}

impl<'a> ResectCost<'a> {
    /// Create the cost for the given correspondences around `base_rotation`.
    pub fn new(points_world: &'a [DVec3], points_image: &'a [DVec2], base_rotation: SO3) -> Self {
        Self {
            points_world,
            points_image,
            base_rotation,
        }
    }

    /// Rotation and translation encoded by `params`.
    pub fn pose(&self, params: &DVector<f64>) -> (SO3, DVec3) {
        let delta = DVec3::new(params[0], params[1], params[2]);
        let t = DVec3::new(params[3], params[4], params[5]);
        (SO3::lplus(delta, &self.base_rotation), t)
    }
}

impl CostFunction for ResectCost<'_> {
    fn num_parameters(&self) -> usize {
        6
    }

    fn num_residuals(&self) -> usize {
        2 * self.points_world.len()
    }

    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        let (r, t) = self.pose(params);
        let mut residuals = DVector::<f64>::zeros(self.num_residuals());
        for (i, (&pw, &uv)) in self.points_world.iter().zip(self.points_image).enumerate() {
            let pc = r * pw + t;
            residuals[2 * i] = pc.x / pc.z - uv.x;
            residuals[2 * i + 1] = pc.y / pc.z - uv.y;
        }
        residuals
    }
}

/// Gather the image and world coordinates of `markers`, aligned by index.
fn assemble_correspondences(
    markers: &[Marker],
    reconstruction: &Reconstruction,
) -> Result<(Vec<DVec2>, Vec<DVec3>), ResectError> {
    let first = &markers[0];
    if markers
        .iter()
        .any(|m| m.clip != first.clip || m.frame != first.frame)
    {
        log::warn!(
            "markers span several frames, resecting clip {} frame {}",
            first.clip,
            first.frame
        );
    }

    markers
        .iter()
        .map(|m| {
            reconstruction
                .point_for_track(m.track)
                .map(|point| (m.center, point.position))
                .ok_or(ResectError::MissingPoint { track: m.track })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(|pairs| pairs.into_iter().unzip())
}

/// Closed-form pose from the correspondences.
fn initial_pose(
    points_world: &[DVec3],
    points_image: &[DVec2],
    params: &ResectParams,
) -> Result<(DMat3, DVec3, InitialEstimate), ResectError> {
    let primary = match solve_epnp(points_world, points_image, &params.epnp) {
        Ok(res) => return Ok((res.rotation, res.translation, InitialEstimate::EPnP)),
        Err(e) => e,
    };

    if !params.allow_fallback {
        return Err(ResectError::PrimaryEstimationFailed(primary));
    }
    log::debug!("EPnP failed ({primary}), trying projective resection");

    let p = projective_resection(points_world, points_image, &params.dlt)
        .map_err(ResectError::FallbackFailed)?;
    let pose = pose_from_projection(&p, points_world[0]).map_err(ResectError::FallbackFailed)?;

    if pose.is_behind_camera() {
        log::warn!(
            "projective resection left the reference point behind the camera (depth {:e})",
            pose.reference_depth
        );
        if params.strict_fallback {
            return Err(ResectError::FallbackDegenerate {
                depth: pose.reference_depth,
            });
        }
    }

    Ok((
        pose.rotation,
        pose.translation,
        InitialEstimate::Projective {
            flipped: pose.flipped,
        },
    ))
}

/// Refine `(rotation, translation)` by minimizing the reprojection error.
///
/// Returns the refined pose and the optimizer summary.
pub fn refine_pose(
    points_world: &[DVec3],
    points_image: &[DVec2],
    rotation: &DMat3,
    translation: DVec3,
    lm: &LevenbergMarquardt,
) -> Result<(DMat3, DVec3, OptimizerResult), ResectError> {
    let cost = ResectCost::new(points_world, points_image, SO3::from_matrix(rotation));
    let mut params = DVector::from_vec(vec![
        0.0,
        0.0,
        0.0,
        translation.x,
        translation.y,
        translation.z,
    ]);

    let result = lm.minimize(&cost, &mut params)?;
    let (r, t) = cost.pose(&params);
    Ok((r.matrix(), t, result))
}

/// Estimate the pose of the frame observed by `markers` without modifying
/// the reconstruction.
///
/// All markers are expected to share the clip and frame of the first one.
pub fn estimate_camera_pose(
    markers: &[Marker],
    reconstruction: &Reconstruction,
    intrinsics: usize,
    params: &ResectParams,
) -> Result<ResectReport, ResectError> {
    if markers.len() < MIN_CORRESPONDENCES {
        return Err(ResectError::InsufficientCorrespondences {
            required: MIN_CORRESPONDENCES,
            actual: markers.len(),
        });
    }

    let (points_image, points_world) = assemble_correspondences(markers, reconstruction)?;
    let (r0, t0, initial_estimate) = initial_pose(&points_world, &points_image, params)?;
    let (rotation, translation, refinement) =
        refine_pose(&points_world, &points_image, &r0, t0, &params.lm)?;

    if !refinement.converged() {
        log::warn!(
            "pose refinement stopped without converging: {:?} after {} iterations",
            refinement.termination_reason,
            refinement.iterations
        );
        if params.require_convergence {
            return Err(ResectError::RefinementNonConvergence {
                reason: refinement.termination_reason,
                iterations: refinement.iterations,
            });
        }
    }

    let n = points_world.len() as f64;
    let report = ResectReport {
        pose: CameraPose {
            clip: markers[0].clip,
            frame: markers[0].frame,
            intrinsics,
            rotation,
            translation,
        },
        initial_estimate,
        initial_rmse: (refinement.initial_cost / n).sqrt(),
        final_rmse: (refinement.final_cost / n).sqrt(),
        refinement,
        num_correspondences: points_world.len(),
    };

    log::debug!(
        "resected clip {} frame {} from {} markers via {:?}: rmse {:e} -> {:e}",
        report.pose.clip,
        report.pose.frame,
        report.num_correspondences,
        report.initial_estimate,
        report.initial_rmse,
        report.final_rmse
    );

    Ok(report)
}

/// Estimate the pose of the frame observed by `markers` and insert it into
/// the reconstruction.
///
/// Nothing is inserted on failure. An existing pose for the same frame is
/// replaced.
pub fn euclidean_resect(
    markers: &[Marker],
    reconstruction: &mut Reconstruction,
    intrinsics: usize,
    params: &ResectParams,
) -> Result<ResectReport, ResectError> {
    let report = estimate_camera_pose(markers, reconstruction, intrinsics, params)?;
    reconstruction.add_camera_pose(report.pose);
    Ok(report)
}

/// Resect the camera observing `markers` with default parameters.
///
/// Returns whether a pose was inserted.
pub fn resect(
    markers: &[Marker],
    reconstruction: &mut Reconstruction,
    allow_fallback: bool,
    intrinsics: usize,
) -> bool {
    let params = ResectParams::default().with_allow_fallback(allow_fallback);
    match euclidean_resect(markers, reconstruction, intrinsics, &params) {
        Ok(_) => true,
        Err(e) => {
            log::debug!("resection failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rekon_optim::numerical_jacobian;
    use rekon_pnp::NumericTol;

    fn cube() -> Vec<DVec3> {
        vec![
            DVec3::new(-0.5, -0.5, 0.5),
            DVec3::new(0.5, -0.5, -0.5),
            DVec3::new(0.5, 0.5, 0.5),
            DVec3::new(-0.5, 0.5, -0.5),
            DVec3::new(0.2, 0.1, 0.0),
            DVec3::new(-0.3, 0.4, 0.3),
        ]
    }

    fn project(points: &[DVec3], r: &DMat3, t: DVec3) -> Vec<DVec2> {
        points
            .iter()
            .map(|&p| {
                let pc = *r * p + t;
                DVec2::new(pc.x / pc.z, pc.y / pc.z)
            })
            .collect()
    }

    #[test]
    fn test_cost_vanishes_at_true_pose() {
        let world = cube();
        let r = SO3::exp(DVec3::new(0.1, 0.2, -0.1)).matrix();
        let t = DVec3::new(0.1, 0.0, 4.0);
        let image = project(&world, &r, t);

        let cost = ResectCost::new(&world, &image, SO3::from_matrix(&r));
        let params = DVector::from_vec(vec![0.0, 0.0, 0.0, t.x, t.y, t.z]);
        assert_eq!(cost.num_residuals(), 12);
        assert_relative_eq!(cost.cost(&params), 0.0, epsilon = 1e-24);
    }

    #[test]
    fn test_cost_pose_is_left_increment() {
        let world = cube();
        let image = project(&world, &DMat3::IDENTITY, DVec3::Z * 4.0);
        let base = SO3::exp(DVec3::new(0.3, -0.1, 0.2));
        let cost = ResectCost::new(&world, &image, base);

        let delta = DVec3::new(0.01, 0.02, -0.03);
        let params = DVector::from_vec(vec![delta.x, delta.y, delta.z, 0.1, 0.2, 4.0]);
        let (rotation, t) = cost.pose(&params);

        assert!(rotation.matrix().abs_diff_eq(SO3::lplus(delta, &base).matrix(), 1e-12));
        assert!(SO3::lminus(&rotation, &base).abs_diff_eq(delta, 1e-12));
        assert_eq!(t, DVec3::new(0.1, 0.2, 4.0));
    }

    #[test]
    fn test_cost_jacobian_translation_column() {
        let world = cube();
        let image = vec![DVec2::ZERO; world.len()];
        let t = DVec3::new(0.0, 0.0, 5.0);
        let cost = ResectCost::new(&world, &image, SO3::IDENTITY);
        let params = DVector::from_vec(vec![0.0, 0.0, 0.0, t.x, t.y, t.z]);
        let j = numerical_jacobian(&cost, &params);

        // d(x/z)/dtx = 1/z at the identity rotation.
        for (i, p) in world.iter().enumerate() {
            assert_relative_eq!(j[(2 * i, 3)], 1.0 / (p.z + 5.0), epsilon = 1e-8);
            assert_relative_eq!(j[(2 * i + 1, 3)], 0.0, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_refine_pose_from_perturbed_seed() -> Result<(), ResectError> {
        let world = cube();
        let r = SO3::exp(DVec3::new(-0.2, 0.1, 0.3)).matrix();
        let t = DVec3::new(-0.2, 0.3, 6.0);
        let image = project(&world, &r, t);

        let r0 = (SO3::exp(DVec3::new(0.02, -0.01, 0.015)) * SO3::from_matrix(&r)).matrix();
        let t0 = t + DVec3::new(0.05, -0.03, 0.2);
        let (r_ref, t_ref, result) =
            refine_pose(&world, &image, &r0, t0, &LevenbergMarquardt::default())?;

        assert!(result.final_cost <= result.initial_cost);
        assert!(r_ref.abs_diff_eq(r, 1e-8));
        assert!(t_ref.abs_diff_eq(t, 1e-7));
        Ok(())
    }

    #[test]
    fn test_initial_pose_without_fallback() {
        // Coincident world points defeat EPnP.
        let world = vec![DVec3::new(0.0, 0.0, 1.0); 6];
        let image = vec![DVec2::ZERO; 6];
        let result = initial_pose(&world, &image, &ResectParams::default());
        assert!(matches!(result, Err(ResectError::PrimaryEstimationFailed(_))));

        let params = ResectParams::default().with_allow_fallback(true);
        let result = initial_pose(&world, &image, &params);
        assert!(matches!(result, Err(ResectError::FallbackFailed(_))));
    }

    #[test]
    fn test_fallback_uses_dlt_params() -> Result<(), ResectError> {
        let world = vec![
            DVec3::new(-0.5, -0.5, 0.5),
            DVec3::new(0.5, -0.5, -0.5),
            DVec3::new(0.5, 0.5, 0.5),
            DVec3::new(-0.5, 0.5, -0.5),
            DVec3::new(0.2, 0.1, -0.4),
            DVec3::new(-0.3, 0.4, 0.3),
            DVec3::new(0.4, -0.2, 0.1),
            DVec3::new(-0.1, -0.4, -0.2),
        ];
        let r = SO3::exp(DVec3::new(0.1, -0.05, 0.2)).matrix();
        let image = project(&world, &r, DVec3::new(0.1, -0.1, 5.0));

        // EPnP rejects every rig, so the projective path decides the outcome.
        let params = ResectParams::default()
            .with_allow_fallback(true)
            .with_epnp(EPnPParams::default().with_planar_threshold(f64::INFINITY));
        let (_, _, estimate) = initial_pose(&world, &image, &params)?;
        assert!(matches!(estimate, InitialEstimate::Projective { .. }));

        let strict_dlt = DltParams::default().with_tolerance(NumericTol {
            svd: 1e-12,
            eps: 0.9,
        });
        let result = initial_pose(&world, &image, &params.with_dlt(strict_dlt));
        assert!(matches!(result, Err(ResectError::FallbackFailed(_))));
        Ok(())
    }
}
