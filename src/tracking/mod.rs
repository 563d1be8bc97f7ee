//! Tracking front-end: per-frame pose estimation, keyframe decision, and
//! submission into the mapping queue.

pub mod bootstrap;
pub mod coarse;
pub mod frame;
pub mod keyframe_decision;
pub mod result;
pub mod state;
pub mod tracker;

pub use bootstrap::{BootstrapProgress, BootstrapResult, BootstrapSeed, Bootstrapper};
pub use coarse::{CoarseTracker, CoarseTrackingResult, TrackingReference};
pub use frame::{CameraModel, ImageFrame};
pub use keyframe_decision::KeyframeSelector;
pub use result::TrackingSnapshot;
pub use state::TrackingState;
pub use tracker::Tracker;
