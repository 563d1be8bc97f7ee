//! Output sinks.
//!
//! Anything interested in the pipeline's results registers an `OutputSink`;
//! after every mapping cycle each registered sink receives the updated
//! window poses, the active point cloud, and the photometric parameters.
//! The core never depends on a concrete sink.

use nalgebra::Vector3;
use tracing::info;

use crate::geometry::SE3;
use crate::io::trajectory::TrajectoryEntry;
use crate::window::{AffineLight, FrameId, KeyframeId};

/// Pose and photometric state of one active-window frame.
#[derive(Debug, Clone)]
pub struct WindowPose {
    pub keyframe: KeyframeId,
    pub shell: FrameId,
    pub timestamp_ns: u64,
    pub cam_to_world: SE3,
    pub affine: AffineLight,
}

/// One active point, in world coordinates.
#[derive(Debug, Clone)]
pub struct CloudPoint {
    pub position: Vector3<f64>,
    /// Inverse-depth information; higher is better constrained.
    pub idepth_confidence: f64,
    pub host: KeyframeId,
}

/// Everything a sink receives after one mapping cycle.
#[derive(Debug, Clone, Default)]
pub struct WindowUpdate {
    pub poses: Vec<WindowPose>,
    pub points: Vec<CloudPoint>,
}

/// A registered output collaborator. Every sink receives every update;
/// delivery order among sinks is unspecified.
pub trait OutputSink: Send {
    fn publish_window(&mut self, update: &WindowUpdate);

    fn publish_trajectory(&mut self, entries: &[TrajectoryEntry]);
}

/// Sink that summarizes updates into the tracing log. Handy default for
/// headless runs.
#[derive(Debug, Default)]
pub struct LogSink {
    updates: usize,
}

impl OutputSink for LogSink {
    fn publish_window(&mut self, update: &WindowUpdate) {
        self.updates += 1;
        info!(
            "[Output] update {}: {} frames, {} points",
            self.updates,
            update.poses.len(),
            update.points.len()
        );
    }

    fn publish_trajectory(&mut self, entries: &[TrajectoryEntry]) {
        info!("[Output] trajectory with {} poses", entries.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_sink_counts_updates() {
        let mut sink = LogSink::default();
        sink.publish_window(&WindowUpdate::default());
        sink.publish_window(&WindowUpdate::default());
        assert_eq!(sink.updates, 2);
    }
}
