//! Per-frame tracking outcome returned to the caller.

use crate::geometry::SE3;
use crate::window::FrameId;

use super::state::TrackingState;

/// Snapshot of one `submit_image` call, suitable for logging and
/// visualization downstream.
#[derive(Debug, Clone)]
pub struct TrackingSnapshot {
    pub state: TrackingState,

    /// Shell id assigned to this frame.
    pub frame: FrameId,

    /// Coarse pose estimate at submission time (camera to world).
    pub cam_to_world: SE3,

    /// Whether the front-end recommended promotion.
    pub needs_keyframe: bool,

    /// Finest-level chi-square residual of the coarse alignment;
    /// zero while not initialized.
    pub coarse_rmse: f64,
}
