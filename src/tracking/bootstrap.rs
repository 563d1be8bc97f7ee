//! Bootstrap contract: the external initializer that turns the first few
//! frames into an initial map. Consumed until it reports ready or gives up;
//! after that it is never queried again.

use crate::geometry::SE3;
use crate::tracking::frame::ImageFrame;

/// A point seeded by the initializer, with a converged inverse depth.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapSeed {
    pub u: f32,
    pub v: f32,
    pub idepth: f64,
}

/// Initial map produced when bootstrap succeeds.
#[derive(Debug, Clone)]
pub struct BootstrapResult {
    /// Pose of the bootstrap frame (camera to world, before gravity
    /// alignment).
    pub cam_to_world: SE3,

    /// Seed points for the first keyframe.
    pub seeds: Vec<BootstrapSeed>,

    /// Scale normalization applied to the seed depths.
    pub scale: f64,
}

/// Progress of the bootstrap stage after feeding one frame.
pub enum BootstrapProgress {
    /// Keep feeding frames.
    NeedMoreFrames,
    /// Initial map established; the fed frame becomes the first keyframe.
    Ready(Box<BootstrapResult>),
    /// The attempt budget is exhausted; the session flags `init_failed`.
    Failed,
}

/// The external coarse initializer.
pub trait Bootstrapper: Send {
    fn feed(&mut self, frame: &ImageFrame) -> BootstrapProgress;
}
