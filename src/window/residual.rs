//! Residual edges between an activated point and an observing keyframe.

use super::types::{KeyframeId, PointId, ResidualId};

/// Optimization state of one residual edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidualState {
    /// Linearized and contributing to the energy.
    Active,
    /// Flagged statistically inconsistent after an optimization pass.
    Outlier,
}

/// A photometric observation edge: the point hosted on `host` is observed
/// in `target`. Both endpoints are active-window members for the lifetime
/// of the edge; removal of either endpoint removes the edge in the same
/// transaction.
#[derive(Debug, Clone)]
pub struct Residual {
    pub id: ResidualId,
    pub point: PointId,
    pub host: KeyframeId,
    pub target: KeyframeId,

    pub state: ResidualState,

    /// Energy from the most recent linearization; refreshed by the backend.
    pub energy: f64,
}

impl Residual {
    pub fn is_active(&self) -> bool {
        self.state == ResidualState::Active
    }

    /// True if the edge touches the given frame as host or target.
    pub fn references(&self, frame: KeyframeId) -> bool {
        self.host == frame || self.target == frame
    }
}
