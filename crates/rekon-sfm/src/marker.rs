use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Identifier of a clip (an image sequence).
pub type ClipId = u32;

/// Identifier of a frame within a clip.
pub type FrameId = u32;

/// Identifier of a track, linking markers of one feature across frames.
pub type TrackId = u32;

/// A 2D detection of a tracked feature in one frame.
///
/// The center is in normalized camera coordinates, i.e. with the intrinsics
/// already removed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    /// Observed position in normalized image coordinates.
    pub center: DVec2,
    /// Clip the marker was observed in.
    pub clip: ClipId,
    /// Frame the marker was observed in.
    pub frame: FrameId,
    /// Track the marker belongs to.
    pub track: TrackId,
}

impl Marker {
    /// Create a marker at `center` for the given clip, frame and track.
    pub fn new(center: DVec2, clip: ClipId, frame: FrameId, track: TrackId) -> Self {
        Self {
            center,
            clip,
            frame,
            track,
        }
    }
}
