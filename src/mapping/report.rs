//! Per-cycle mapping reports and session-scoped statistics.
//!
//! Each mapping cycle produces one `MappingReport`; the session accumulates
//! them into `SessionStats`. Both live on the session object, never in
//! process-wide state.

use crate::optimizer::OptimizeReport;
use crate::window::FrameId;

/// What one mapping cycle did.
#[derive(Debug, Clone, Default)]
pub struct MappingReport {
    pub frame: Option<FrameId>,
    pub is_keyframe: bool,
    pub forced_keyframe: bool,

    /// Candidates traced across the new frame.
    pub traced: usize,
    /// New candidate seeds created on the keyframe.
    pub seeded: usize,
    /// Candidates promoted to active points.
    pub activated: usize,
    /// Candidates discarded for failed depth convergence.
    pub discarded_candidates: usize,

    /// Residuals flagged as outliers after optimization.
    pub outlier_residuals: usize,
    /// Points dropped with negligible information.
    pub dropped_points: usize,
    /// Points folded into the marginalization prior.
    pub marginalized_points: usize,
    /// Frames retired from the window this cycle.
    pub marginalized_frames: usize,

    pub optimization: Option<OptimizeReport>,

    /// Queue backlog observed at the start of the cycle.
    pub backlog: usize,
}

/// Running totals for one session.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub frames_mapped: usize,
    pub keyframes: usize,
    pub forced_keyframes: usize,
    pub points_activated: usize,
    pub candidates_seeded: usize,
    pub points_dropped: usize,
    pub points_marginalized: usize,
    pub frames_marginalized: usize,
    pub outlier_residuals: usize,
    pub rejected_steps: usize,
    pub last_rmse: f64,
}

impl SessionStats {
    pub fn absorb(&mut self, report: &MappingReport) {
        self.frames_mapped += 1;
        if report.is_keyframe {
            self.keyframes += 1;
        }
        if report.forced_keyframe {
            self.forced_keyframes += 1;
        }
        self.points_activated += report.activated;
        self.candidates_seeded += report.seeded;
        self.points_dropped += report.dropped_points;
        self.points_marginalized += report.marginalized_points;
        self.frames_marginalized += report.marginalized_frames;
        self.outlier_residuals += report.outlier_residuals;
        if let Some(opt) = &report.optimization {
            self.rejected_steps += opt.rejected_steps;
            self.last_rmse = opt.final_rmse;
        }
    }
}
