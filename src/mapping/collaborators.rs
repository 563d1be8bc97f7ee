//! Mapping-side collaborator contracts: pixel selection and candidate
//! tracing. Both operate on raw image content the orchestrator treats as
//! opaque.

use crate::geometry::SE3;
use crate::tracking::frame::ImageFrame;
use crate::window::{Candidate, CandidateSeed, TraceStatus};

/// Picks well-distributed, high-gradient pixels to seed new candidates on
/// a fresh keyframe.
pub trait PixelSelector: Send {
    /// Return up to `budget` seed positions for `image`.
    fn select(&mut self, image: &ImageFrame, budget: usize) -> Vec<CandidateSeed>;
}

/// Everything a tracer needs to search one candidate's epipolar interval
/// in a target frame.
pub struct TraceContext<'a> {
    pub host_image: &'a ImageFrame,
    pub target_image: &'a ImageFrame,

    /// Transform from host camera to target camera.
    pub target_from_host: &'a SE3,

    /// Brightness transfer from host into target.
    pub affine_scale: f64,
    pub affine_offset: f64,
}

/// Refines a candidate's inverse-depth interval against one target frame.
pub trait CandidateTracer: Send {
    /// Narrow `candidate.idepth_min/max` where possible and report how the
    /// attempt went. Bookkeeping (attempt counters, status) is done by the
    /// caller.
    fn trace(&mut self, candidate: &mut Candidate, ctx: &TraceContext<'_>) -> TraceStatus;
}
