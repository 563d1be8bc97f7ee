//! IO: trajectory export and offline replay loaders.

pub mod replay;
pub mod trajectory;

pub use replay::{load_frame_index, load_imu_csv, samples_in_interval, FrameEntry};
pub use trajectory::{ExportOptions, PoseConvention, TrajectoryEntry};
