//! System layer: entry point, shared state, messages, and the
//! tracking→mapping pipeline.

pub mod messages;
pub mod odometry;
pub mod pipeline;
pub mod shared_state;

pub use messages::TrackedFrame;
pub use odometry::{Collaborators, OdometrySystem};
pub use pipeline::{Drained, FramePipeline};
pub use shared_state::SharedState;
