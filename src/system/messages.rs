//! Inter-stage message types.
//!
//! A `TrackedFrame` is what the tracking stage hands to the mapping worker
//! through the pipeline queue: the image, the coarse pose estimate, the
//! keyframe recommendation, and the raw inertial interval.

use crate::geometry::SE3;
use crate::imu::ImuSample;
use crate::tracking::bootstrap::BootstrapResult;
use crate::tracking::frame::ImageFrame;
use crate::window::FrameId;

/// One tracked frame queued for mapping.
pub struct TrackedFrame {
    /// Shell already appended to the frame history by the tracker.
    pub shell: FrameId,

    pub image: ImageFrame,

    /// Coarse pose estimate (camera to world) at submission time.
    pub cam_to_world: SE3,

    /// The tracker's keyframe recommendation. The pipeline's catch-up
    /// policy may override it on dequeue.
    pub needs_keyframe: bool,

    /// Raw inertial samples covering the interval since the previous frame.
    pub imu_samples: Vec<ImuSample>,

    /// Present only on the frame that completes bootstrap; carries the
    /// initial map the first keyframe is built from.
    pub bootstrap: Option<BootstrapResult>,
}
