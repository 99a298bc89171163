//! Common data types shared across Perspective-n-Point (PnP) solvers.
//!
//! All solvers in this crate work on **normalized** image coordinates, i.e.
//! the camera intrinsics have already been removed and a world point `X` is
//! observed at `x = (R·X + t).xy / (R·X + t).z`.

use glam::{DMat3, DVec2, DVec3};
use thiserror::Error;

/// Error types for PnP solvers.
#[derive(Debug, Error)]
pub enum PnPError {
    /// Invalid input data - insufficient correspondences for the specific solver
    #[error("PnP solver requires at least {required} 2D-3D correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences required by the solver
        required: usize,
        /// Actual number of correspondences provided
        actual: usize,
    },

    /// Invalid input data - mismatched array lengths with descriptive labels.
    #[error("Mismatched array lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedArrayLengths {
        /// Label for the left-hand slice
        left_name: &'static str,
        /// Length of the left-hand slice
        left_len: usize,
        /// Label for the right-hand slice
        right_name: &'static str,
        /// Length of the right-hand slice
        right_len: usize,
    },

    /// Singular value decomposition failed
    #[error("SVD computation failed: {0}")]
    SvdFailed(String),

    /// The point configuration does not constrain the pose
    #[error("Degenerate point configuration: {0}")]
    DegenerateConfiguration(String),

    /// None of the candidate solutions produced a finite pose
    #[error("No valid pose candidate found")]
    NoSolution,
}

/// Numeric tolerances used by linear algebra routines throughout the PnP pipeline.
#[derive(Debug, Clone)]
pub struct NumericTol {
    /// Tolerance for singular-value decomposition.
    pub svd: f64,
    /// Epsilon threshold for singular-value checks when deciding whether a configuration is degenerate.
    pub eps: f64,
}

impl Default for NumericTol {
    fn default() -> Self {
        Self {
            svd: 1e-12,
            eps: 1e-12,
        }
    }
}

/// Result returned by any PnP solver.
///
/// The rotation matrix maps coordinates from the **world** frame to the
/// **camera** frame.
#[derive(Debug, Clone)]
pub struct PnPResult {
    /// Estimated rotation matrix.
    pub rotation: DMat3,
    /// Estimated translation vector.
    pub translation: DVec3,
    /// Rodrigues axis-angle representation (log-map) of `rotation`.
    pub rvec: DVec3,
    /// Optional root-mean-square reprojection error in normalized units.
    pub reproj_rmse: Option<f64>,
    /// Whether the world points were solved as a coplanar configuration.
    pub planar: bool,
}

/// Trait implemented by every PnP solver available in this crate.
pub trait PnPSolver {
    /// Parameter object specific to the solver.
    type Param;

    /// Solve for camera pose given 2D-3D correspondences.
    ///
    /// # Arguments
    /// * `world` – 3-D coordinates in the world frame.
    /// * `image` – Corresponding normalized image coordinates.
    /// * `params` – Solver-specific parameters.
    fn solve(
        world: &[DVec3],
        image: &[DVec2],
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError>;
}

/// Validate that both slices have the same length and at least `required` entries.
pub(crate) fn check_correspondences(
    world: &[DVec3],
    image: &[DVec2],
    required: usize,
) -> Result<(), PnPError> {
    if world.len() != image.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "world points",
            left_len: world.len(),
            right_name: "image points",
            right_len: image.len(),
        });
    }
    if world.len() < required {
        return Err(PnPError::InsufficientCorrespondences {
            required,
            actual: world.len(),
        });
    }
    if !world.iter().all(|p| p.is_finite()) || !image.iter().all(|p| p.is_finite()) {
        return Err(PnPError::DegenerateConfiguration(
            "correspondences contain non-finite coordinates".to_string(),
        ));
    }
    Ok(())
}
