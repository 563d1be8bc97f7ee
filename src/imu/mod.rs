//! Inertial collaborator contracts.
//!
//! Preintegration internals live outside this crate; the pipeline consumes
//! them through two narrow traits. `InertialIntegrator` turns the raw
//! samples between two frames into a relative-motion prior the optimization
//! loop attaches as an extra prior term; `GravityInitializer` is queried
//! once during bootstrap to fix absolute scale and the gravity direction,
//! and never again on the hot path.

pub mod sample;

pub use sample::{GRAVITY_MAGNITUDE, ImuBias, ImuSample};

use nalgebra::{SMatrix, Vector3};

use crate::geometry::SE3;

/// 6×6 covariance of a relative-motion prior `[ω, v]`.
pub type Matrix6 = SMatrix<f64, 6, 6>;

/// Relative-motion prior over a time interval, with uncertainty.
#[derive(Debug, Clone)]
pub struct MotionPrior {
    /// Predicted transform from the earlier frame to the later frame.
    pub delta: SE3,

    /// Predicted velocity at the end of the interval (world frame).
    pub velocity: Vector3<f64>,

    /// Covariance of the `[rotation, translation]` error.
    pub covariance: Matrix6,
}

/// Integrates raw inertial samples over a frame interval.
pub trait InertialIntegrator: Send {
    /// Integrate `samples` covering `[from_ns, to_ns]` and return the
    /// relative-motion prior, or `None` when the interval has too few
    /// samples to be informative.
    fn integrate(&mut self, from_ns: u64, to_ns: u64, samples: &[ImuSample])
        -> Option<MotionPrior>;

    /// Current bias estimate, refreshed by the backend after optimization.
    fn bias(&self) -> ImuBias;
}

/// Result of the one-shot gravity/scale bootstrap.
#[derive(Debug, Clone)]
pub struct GravityEstimate {
    /// Transform aligning the first camera frame with the gravity-aligned
    /// world frame.
    pub world_from_first: SE3,

    /// Metric scale factor for the bootstrap map.
    pub scale: f64,
}

/// Bootstraps gravity direction and absolute scale from early samples.
pub trait GravityInitializer: Send {
    /// Feed the samples seen so far; returns the estimate once observable.
    fn estimate(&mut self, samples: &[ImuSample]) -> Option<GravityEstimate>;
}
