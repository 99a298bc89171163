#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Rekon SfM
//!
//! Data model of an incremental reconstruction (markers, points, camera
//! poses) and the resection step that adds a camera pose from the markers
//! of one frame.
//!
//! ```rust
//! use glam::{DVec2, DVec3};
//! use rekon_sfm::{resect, Marker, Point, Reconstruction};
//!
//! let mut reconstruction = Reconstruction::new();
//! let points = [
//!     DVec3::new(-1.0, -1.0, 0.5),
//!     DVec3::new(1.0, -1.0, -0.5),
//!     DVec3::new(1.0, 1.0, 0.3),
//!     DVec3::new(-1.0, 1.0, -0.2),
//!     DVec3::new(0.3, 0.2, 0.8),
//!     DVec3::new(-0.4, 0.6, -0.7),
//! ];
//! let mut markers = Vec::new();
//! for (track, &position) in points.iter().enumerate() {
//!     let track = track as u32;
//!     reconstruction.add_point(Point { track, position });
//!     let z = position.z + 5.0;
//!     markers.push(Marker::new(DVec2::new(position.x / z, position.y / z), 0, 1, track));
//! }
//!
//! assert!(resect(&markers, &mut reconstruction, false, 0));
//! let pose = reconstruction.camera_pose_for_frame(0, 1).ok_or("pose missing")?;
//! assert!((pose.translation - DVec3::new(0.0, 0.0, 5.0)).length() < 1e-4);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Markers and their identifiers.
pub mod marker;

/// Reconstruction storage for points and camera poses.
pub mod reconstruction;

/// Camera resection.
pub mod resect;

pub use marker::{ClipId, FrameId, Marker, TrackId};
pub use reconstruction::{CameraPose, Point, Reconstruction};
pub use resect::{
    estimate_camera_pose, euclidean_resect, refine_pose, resect, InitialEstimate, ResectCost,
    ResectError, ResectParams, ResectReport, MIN_CORRESPONDENCES,
};
