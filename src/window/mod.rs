//! The sliding-window store: frame shells, active keyframes, point
//! hypotheses, and residual edges.

pub mod frame;
pub mod point;
pub mod residual;
pub mod shell;
pub mod types;
#[allow(clippy::module_inception)]
pub mod window;

pub use frame::{AffineLight, Keyframe};
pub use point::{ActivePoint, Candidate, CandidateSeed, PointStatus, TraceStatus};
pub use residual::{Residual, ResidualState};
pub use shell::{FrameHistory, FrameShell};
pub use types::{FrameId, KeyframeId, PointId, ResidualId};
pub use window::{FramePrecalc, Window};
