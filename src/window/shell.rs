//! FrameShell - the permanent, lightweight trace of every frame ever seen.
//!
//! A shell is created at first sight of a frame and survives after the full
//! keyframe state is marginalized; the shell sequence forms the trajectory
//! history. Shells are only ever appended, never reordered or removed.

use crate::geometry::SE3;

use super::types::{FrameId, KeyframeId};

/// Lightweight, append-only record of one frame.
#[derive(Debug, Clone)]
pub struct FrameShell {
    /// Sequential frame id; equals the shell's index in the history.
    pub id: FrameId,

    /// Caller-provided id of the source image (dataset index etc.).
    pub incoming_id: i64,

    /// Timestamp in nanoseconds.
    pub timestamp_ns: u64,

    /// Current best pose estimate (camera to world). Refined in place while
    /// the frame is active, frozen afterwards.
    pub cam_to_world: SE3,

    /// Pose relative to the tracking reference at the time this frame was
    /// tracked. Stays valid after marginalization and backs the
    /// camera-to-tracking-reference export convention.
    pub cam_to_ref: SE3,

    /// The reference frame the coarse tracker used for this frame.
    pub tracking_ref: Option<FrameId>,

    /// Set on promotion; `None` for tracked-only frames.
    pub keyframe_id: Option<KeyframeId>,

    /// The keyframe that was newest when this frame left the active window.
    pub marginalized_at: Option<KeyframeId>,
}

impl FrameShell {
    pub fn is_keyframe(&self) -> bool {
        self.keyframe_id.is_some()
    }
}

/// Append-only sequence of all frame shells, ordered by `FrameId`.
#[derive(Debug, Default)]
pub struct FrameHistory {
    shells: Vec<FrameShell>,
}

impl FrameHistory {
    pub fn new() -> Self {
        Self { shells: Vec::new() }
    }

    /// Append a shell for a newly arrived frame and return its id.
    pub fn push(&mut self, incoming_id: i64, timestamp_ns: u64) -> FrameId {
        let id = FrameId(self.shells.len() as u64);
        self.shells.push(FrameShell {
            id,
            incoming_id,
            timestamp_ns,
            cam_to_world: SE3::identity(),
            cam_to_ref: SE3::identity(),
            tracking_ref: None,
            keyframe_id: None,
            marginalized_at: None,
        });
        id
    }

    pub fn get(&self, id: FrameId) -> Option<&FrameShell> {
        self.shells.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut FrameShell> {
        self.shells.get_mut(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.shells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameShell> {
        self.shells.iter()
    }

    /// Latest shell, if any frame has been seen.
    pub fn last(&self) -> Option<&FrameShell> {
        self.shells.last()
    }
}
