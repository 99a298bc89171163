use std::collections::{BTreeMap, HashMap};

use glam::{DMat3, DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::marker::{ClipId, FrameId, Marker, TrackId};

/// A triangulated 3D point belonging to a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Track the point was triangulated from.
    pub track: TrackId,
    /// Position in the world frame.
    pub position: DVec3,
}

/// Pose of the camera for one frame of a clip.
///
/// `rotation` and `translation` map world coordinates into the camera frame:
/// `x_cam = rotation · x_world + translation`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    /// Clip of the frame.
    pub clip: ClipId,
    /// Frame the pose belongs to.
    pub frame: FrameId,
    /// Index of the intrinsics profile used by the camera.
    pub intrinsics: usize,
    /// World to camera rotation.
    pub rotation: DMat3,
    /// World to camera translation.
    pub translation: DVec3,
}

impl CameraPose {
    /// Transform a world point into the camera frame.
    pub fn transform(&self, point: DVec3) -> DVec3 {
        self.rotation * point + self.translation
    }

    /// Project a world point to normalized image coordinates.
    ///
    /// Returns `None` if the point has zero depth.
    pub fn project(&self, point: DVec3) -> Option<DVec2> {
        let pc = self.transform(point);
        (pc.z != 0.0).then(|| DVec2::new(pc.x / pc.z, pc.y / pc.z))
    }

    /// Position of the camera center in the world frame.
    pub fn center(&self) -> DVec3 {
        -(self.rotation.transpose() * self.translation)
    }
}

/// Camera poses and 3D points of an incremental reconstruction.
///
/// Poses are keyed by `(clip, frame)`; points are keyed by track.
#[derive(Debug, Clone, Default)]
pub struct Reconstruction {
    camera_poses: BTreeMap<(ClipId, FrameId), CameraPose>,
    points: HashMap<TrackId, Point>,
}

impl Reconstruction {
    /// Create an empty reconstruction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the point of `point.track`. Returns the previous point.
    pub fn add_point(&mut self, point: Point) -> Option<Point> {
        self.points.insert(point.track, point)
    }

    /// Look up the point triangulated for `track`.
    pub fn point_for_track(&self, track: TrackId) -> Option<&Point> {
        self.points.get(&track)
    }

    /// Insert or replace the pose for `(pose.clip, pose.frame)`.
    ///
    /// Returns the pose previously stored for that frame, if any.
    pub fn add_camera_pose(&mut self, pose: CameraPose) -> Option<CameraPose> {
        self.camera_poses.insert((pose.clip, pose.frame), pose)
    }

    /// Pose of the given frame, if it has been resected.
    pub fn camera_pose_for_frame(&self, clip: ClipId, frame: FrameId) -> Option<&CameraPose> {
        self.camera_poses.get(&(clip, frame))
    }

    /// All camera poses ordered by clip then frame.
    pub fn camera_poses(&self) -> impl Iterator<Item = &CameraPose> {
        self.camera_poses.values()
    }

    /// All points, in arbitrary order.
    pub fn points(&self) -> impl Iterator<Item = &Point> {
        self.points.values()
    }

    /// Number of camera poses.
    pub fn num_camera_poses(&self) -> usize {
        self.camera_poses.len()
    }

    /// Number of points.
    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    /// Root-mean-square reprojection error of `pose` over `markers`.
    ///
    /// Markers without a point or projecting with zero depth are skipped.
    /// Returns `None` when no marker contributes.
    pub fn reprojection_rmse(&self, pose: &CameraPose, markers: &[Marker]) -> Option<f64> {
        let (sum_sq, count) = markers
            .iter()
            .filter_map(|m| {
                let point = self.point_for_track(m.track)?;
                let uv = pose.project(point.position)?;
                Some((uv - m.center).length_squared())
            })
            .fold((0.0, 0usize), |(s, c), e| (s + e, c + 1));

        (count > 0).then(|| (sum_sq / count as f64).sqrt())
    }
}
