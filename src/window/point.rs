//! Point hypotheses: candidates awaiting depth convergence and activated
//! points carrying inverse depth in the optimization window.

use super::types::{KeyframeId, PointId, ResidualId};

/// Outcome of the most recent trace attempt for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceStatus {
    /// Never traced yet.
    Uninitialized,
    /// Depth interval narrowed successfully.
    Good,
    /// Projected outside the target image.
    OutOfBounds,
    /// Photometric error too large along the whole epipolar interval.
    Outlier,
    /// Baseline too small to be informative; left untouched.
    Skipped,
    /// Epipolar geometry degenerate for this point.
    BadCondition,
}

/// Seed position for a new candidate, produced by the pixel selector.
#[derive(Debug, Clone, Copy)]
pub struct CandidateSeed {
    pub u: f32,
    pub v: f32,
    /// Selector's gradient-based quality score, higher is better.
    pub quality: f32,
}

/// A point hypothesis that has not yet converged to a reliable depth.
///
/// Candidates live on their host keyframe and are traced across every
/// subsequent frame until the inverse-depth interval collapses (activation)
/// or tracing keeps failing (discard).
#[derive(Debug, Clone)]
pub struct Candidate {
    pub u: f32,
    pub v: f32,

    /// Current inverse-depth search interval.
    pub idepth_min: f64,
    pub idepth_max: f64,

    pub quality: f32,
    pub status: TraceStatus,

    /// Number of successful traces so far.
    pub good_observations: u32,

    /// Number of trace attempts (successful or not).
    pub attempts: u32,
}

impl Candidate {
    pub fn from_seed(seed: CandidateSeed) -> Self {
        Self {
            u: seed.u,
            v: seed.v,
            idepth_min: 0.0,
            idepth_max: f64::INFINITY,
            quality: seed.quality,
            status: TraceStatus::Uninitialized,
            good_observations: 0,
            attempts: 0,
        }
    }

    /// Midpoint of the current inverse-depth interval.
    pub fn estimated_idepth(&self) -> f64 {
        if self.idepth_max.is_finite() {
            0.5 * (self.idepth_min + self.idepth_max)
        } else {
            self.idepth_min.max(1e-3)
        }
    }

    /// Width of the inverse-depth interval; infinite until the first trace.
    pub fn idepth_spread(&self) -> f64 {
        self.idepth_max - self.idepth_min
    }

    /// A candidate is ready for activation once its depth interval has
    /// collapsed below `max_spread` over at least `min_observations` traces.
    pub fn is_activatable(&self, max_spread: f64, min_observations: u32) -> bool {
        self.status == TraceStatus::Good
            && self.good_observations >= min_observations
            && self.idepth_spread() < max_spread
            && self.idepth_min >= 0.0
    }

    /// Candidates that keep failing to trace carry no usable information.
    pub fn is_discardable(&self, max_failed_attempts: u32) -> bool {
        match self.status {
            TraceStatus::Outlier | TraceStatus::BadCondition => true,
            _ => self.attempts >= max_failed_attempts && self.good_observations == 0,
        }
    }
}

/// Lifecycle state of an activated point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointStatus {
    /// Participating in optimization.
    Active,
    /// Flagged inconsistent; removed without a prior contribution.
    Outlier,
    /// Removed with its information folded into the marginalization prior.
    Marginalized,
    /// Removed with too little information to be worth a prior term.
    Dropped,
}

/// An activated 3D point hypothesis: pixel position on its host keyframe
/// plus inverse depth in the host camera frame.
#[derive(Debug, Clone)]
pub struct ActivePoint {
    pub id: PointId,
    pub host: KeyframeId,

    pub u: f32,
    pub v: f32,

    /// Inverse depth in the host frame; the single geometric degree of
    /// freedom optimized per point.
    pub idepth: f64,

    /// Accumulated inverse-depth information (larger = better constrained).
    /// Reported with the point cloud and used to decide whether a removed
    /// point deserves a prior contribution.
    pub idepth_confidence: f64,

    pub status: PointStatus,

    /// Residual edges referencing this point.
    pub residuals: Vec<ResidualId>,

    /// Keyframe that was newest when this point was activated.
    pub created_at: KeyframeId,
}

impl ActivePoint {
    pub fn is_active(&self) -> bool {
        self.status == PointStatus::Active
    }
}
