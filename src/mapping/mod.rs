//! Mapping back-end: the worker that drains the frame queue and drives the
//! point lifecycle, optimization, and marginalization for each keyframe.

pub mod activation;
pub mod collaborators;
pub mod mapper;
pub mod marginalization;
pub mod report;

pub use activation::{activate_candidates, ActivationOutcome};
pub use collaborators::{CandidateTracer, PixelSelector, TraceContext};
pub use mapper::Mapper;
pub use marginalization::{flag_frames, marginalize_frame, MarginalizationOutcome};
pub use report::{MappingReport, SessionStats};
