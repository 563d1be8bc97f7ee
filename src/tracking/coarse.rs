//! Coarse tracker contract and the swappable tracking reference.
//!
//! The coarse-to-fine photometric alignment itself lives outside this
//! crate; the front-end consumes it through `CoarseTracker`. The reference
//! it aligns against is always the newest keyframe of the active window,
//! published by the mapping worker as an immutable snapshot and swapped
//! atomically (whole object, never element-wise).

use crate::geometry::SE3;
use crate::tracking::frame::ImageFrame;
use crate::window::{FrameId, KeyframeId};

/// Immutable snapshot of the newest keyframe, consumed by the tracker.
///
/// Rebuilt by mapping after every keyframe cycle; readers hold an `Arc` to
/// whichever snapshot was current when their frame arrived.
#[derive(Debug, Clone)]
pub struct TrackingReference {
    pub keyframe: KeyframeId,
    pub shell: FrameId,
    pub cam_to_world: SE3,
    pub image: ImageFrame,

    /// Mean inverse depth of the reference's active points; seed for the
    /// tracker's pyramid initialization.
    pub mean_idepth: f64,

    /// Number of active points backing the reference.
    pub num_points: usize,
}

/// Pose estimate and confidence returned by one coarse alignment.
#[derive(Debug, Clone)]
pub struct CoarseTrackingResult {
    /// Transform from the new camera to the reference camera.
    pub frame_to_ref: SE3,

    /// Per-pyramid-level photometric chi-square residuals, finest level
    /// first. The finest entry gates tracking loss.
    pub residuals: Vec<f64>,

    /// Mean translational optical flow in pixels; drives the keyframe
    /// decision.
    pub flow: f64,

    /// Relative brightness change against the reference; drives the
    /// keyframe decision.
    pub brightness_change: f64,
}

impl CoarseTrackingResult {
    /// Residual at the finest level, infinite if the tracker reported none.
    pub fn finest_residual(&self) -> f64 {
        self.residuals.first().copied().unwrap_or(f64::INFINITY)
    }
}

/// The external coarse-to-fine frame tracker.
pub trait CoarseTracker: Send {
    /// Align `frame` against `reference`. `motion_hint` is the predicted
    /// reference-to-frame transform from inertial propagation, when
    /// available. `None` signals unrecoverable alignment failure.
    fn track(
        &mut self,
        reference: &TrackingReference,
        frame: &ImageFrame,
        motion_hint: Option<&SE3>,
    ) -> Option<CoarseTrackingResult>;
}
