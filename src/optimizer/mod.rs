//! Window optimization: the energy-backend contract and the damped
//! Gauss-Newton loop with full state backup/rollback.

pub mod backend;
pub mod window_optimizer;

pub use backend::{EnergyBackend, EnergyEval, FrameStep, StateStep};
pub use window_optimizer::{optimize, OptimizeReport, StateBackup};
