#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Rekon PnP (Perspective-n-Point)
//!
//! Camera pose estimation from 2D-3D point correspondences in normalized
//! image coordinates.
//!
//! ## Key Features
//!
//! - **EPnP Algorithm**: closed-form solver for general and planar scenes
//! - **Projective resection**: normalized DLT with KRt decomposition
//! - **Projection utilities**: orientation, RQ decomposition, nearest rotation
//!
//! ## Example: Basic EPnP
//!
//! ```rust
//! use glam::{DVec2, DVec3};
//! use rekon_pnp::{solve_pnp, PnPMethod};
//!
//! let world = vec![
//!     DVec3::new(0.0, 0.0, 0.0),
//!     DVec3::new(1.0, 0.0, 0.0),
//!     DVec3::new(0.0, 1.0, 0.0),
//!     DVec3::new(0.0, 0.0, 1.0),
//!     DVec3::new(1.0, 1.0, 0.5),
//! ];
//! // Camera 5 units in front of the points, no rotation.
//! let image: Vec<DVec2> = world
//!     .iter()
//!     .map(|p| DVec2::new(p.x / (p.z + 5.0), p.y / (p.z + 5.0)))
//!     .collect();
//!
//! let result = solve_pnp(&world, &image, PnPMethod::EPnPDefault)?;
//! assert!((result.translation - DVec3::new(0.0, 0.0, 5.0)).length() < 1e-6);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod decompose;
mod dlt;
mod epnp;
mod ops;
mod pnp;

pub use decompose::{decompose_projection, nearest_rotation, rq_decompose, ProjectionDecomposition};
pub use dlt::{
    orient_projection, pose_from_projection, projective_depth, projective_resection, DltParams,
    ProjectivePose, DLT, DLT_MIN_POINTS,
};
pub use epnp::{solve_epnp, EPnP, EPnPParams, EPNP_MIN_POINTS};
pub use pnp::{NumericTol, PnPError, PnPResult, PnPSolver};

use glam::{DVec2, DVec3};

/// Enumeration of the PnP algorithms available in this crate.
#[derive(Debug, Clone)]
pub enum PnPMethod {
    /// Efficient PnP solver with a user-supplied parameter object.
    EPnP(EPnPParams),
    /// Efficient PnP solver with the crate's default parameters.
    EPnPDefault,
    /// Projective resection followed by KRt decomposition.
    Dlt(DltParams),
}

/// Dispatch helper that runs the chosen PnP `method`.
///
/// # Arguments
/// * `world` – 3-D coordinates in the world frame.
/// * `image` – Corresponding normalized image coordinates.
/// * `method` – Solver to use.
pub fn solve_pnp(
    world: &[DVec3],
    image: &[DVec2],
    method: PnPMethod,
) -> Result<PnPResult, PnPError> {
    match method {
        PnPMethod::EPnP(params) => EPnP::solve(world, image, &params),
        PnPMethod::EPnPDefault => EPnP::solve(world, image, &EPnPParams::default()),
        PnPMethod::Dlt(params) => DLT::solve(world, image, &params),
    }
}
