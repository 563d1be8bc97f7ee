//! Pipeline configuration.
//!
//! Loads settings from a TOML file; every knob has a default calibrated for
//! a seven-frame window at video rate.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level settings for the odometry pipeline.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub window: WindowSettings,
    pub pipeline: PipelineSettings,
    pub optimizer: OptimizerSettings,
    pub points: PointSettings,
    pub tracking: TrackingSettings,
}

/// Active-window bounds and marginalization scoring.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowSettings {
    /// Maximum number of keyframes held in the active window.
    pub capacity: usize,

    /// Weight of the spatial-redundancy term in the retention score.
    pub redundancy_weight: f64,

    /// Weight of the minimum-observation term in the retention score.
    pub observation_weight: f64,

    /// Frames whose active-point fraction drops below this are flagged for
    /// marginalization even when the window is not full.
    pub min_point_fraction: f64,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            capacity: 7,
            redundancy_weight: 1.0,
            observation_weight: 0.25,
            min_point_fraction: 0.05,
        }
    }
}

/// Tracking→mapping queue behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Capacity of the frame queue; `submit` blocks only for queue
    /// insertion while below this bound.
    pub max_backlog: usize,

    /// Backlog length at which the next dequeued frame is forced to
    /// keyframe status regardless of the tracker's recommendation.
    pub force_keyframe_backlog: usize,

    /// When false, every submit waits for mapping to finish the frame
    /// (deterministic offline replay).
    pub pipelined: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_backlog: 8,
            force_keyframe_backlog: 3,
            pipelined: true,
        }
    }
}

/// Damped Gauss-Newton loop behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OptimizerSettings {
    /// Iteration bound per mapping cycle.
    pub max_iterations: usize,

    /// Consecutive step rejections tolerated before the cycle settles on
    /// the pre-step state.
    pub max_step_rejects: usize,

    /// Initial damping factor.
    pub initial_lambda: f64,

    /// Multiplier applied to lambda on rejection / acceptance.
    pub lambda_up: f64,
    pub lambda_down: f64,

    /// Relative energy growth tolerated before a step counts as divergent.
    pub energy_ascent_tolerance: f64,

    /// Step-norm threshold below which the loop declares convergence.
    pub convergence_step_norm: f64,

    /// Per-group step scales (differential damping).
    pub step_scale_rotation: f64,
    pub step_scale_translation: f64,
    pub step_scale_affine: f64,
    pub step_scale_idepth: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            max_iterations: 6,
            max_step_rejects: 4,
            initial_lambda: 1e-4,
            lambda_up: 4.0,
            lambda_down: 0.25,
            energy_ascent_tolerance: 1e-3,
            convergence_step_norm: 1e-7,
            step_scale_rotation: 1.0,
            step_scale_translation: 1.0,
            step_scale_affine: 0.5,
            step_scale_idepth: 1.0,
        }
    }
}

/// Point lifecycle thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PointSettings {
    /// Maximum candidates promoted per mapping cycle.
    pub activation_budget: usize,

    /// Candidate inverse-depth interval must collapse below this to be
    /// activatable.
    pub max_idepth_spread: f64,

    /// Minimum successful traces before activation.
    pub min_trace_observations: u32,

    /// Trace attempts tolerated without a single success.
    pub max_failed_traces: u32,

    /// Candidate seeds requested from the pixel selector per keyframe.
    pub seeds_per_keyframe: usize,

    /// Residual-energy percentile defining the adaptive outlier threshold.
    pub outlier_energy_percentile: f64,

    /// Scale applied on top of the percentile threshold.
    pub outlier_energy_scale: f64,

    /// Points need at least this many surviving residuals to stay alive
    /// after outlier removal.
    pub min_residuals: usize,

    /// Points need at least this many residuals at marginalization time to
    /// be worth folding into the prior.
    pub min_residuals_for_prior: usize,
}

impl Default for PointSettings {
    fn default() -> Self {
        Self {
            activation_budget: 40,
            max_idepth_spread: 0.05,
            min_trace_observations: 2,
            max_failed_traces: 8,
            seeds_per_keyframe: 150,
            outlier_energy_percentile: 0.7,
            outlier_energy_scale: 1.5,
            min_residuals: 2,
            min_residuals_for_prior: 3,
        }
    }
}

/// Front-end thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackingSettings {
    /// A frame whose coarse-tracking residual exceeds this multiple of the
    /// running RMSE is declared lost.
    pub lost_chi2_factor: f64,

    /// Maximum frames between keyframes.
    pub max_frames_between_keyframes: usize,

    /// Flow/brightness score above which the decision heuristic requests a
    /// keyframe.
    pub keyframe_score_threshold: f64,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            lost_chi2_factor: 9.0,
            max_frames_between_keyframes: 15,
            keyframe_score_threshold: 1.0,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file. Missing keys fall back to defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let settings: Settings = toml::from_str(&contents)
            .with_context(|| format!("parsing settings from {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject obviously unusable combinations early.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.window.capacity >= 3, "window capacity must be >= 3");
        anyhow::ensure!(
            self.pipeline.force_keyframe_backlog <= self.pipeline.max_backlog,
            "force_keyframe_backlog cannot exceed max_backlog"
        );
        anyhow::ensure!(
            self.optimizer.max_iterations >= 1,
            "optimizer needs at least one iteration"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.points.outlier_energy_percentile),
            "outlier_energy_percentile must be in [0, 1]"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn test_toml_roundtrip() {
        let settings = Settings::default();
        let text = toml::to_string_pretty(&settings).unwrap();
        assert!(text.contains("[window]"));
        assert!(text.contains("[optimizer]"));

        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed.window.capacity, settings.window.capacity);
        assert_eq!(
            parsed.pipeline.force_keyframe_backlog,
            settings.pipeline.force_keyframe_backlog
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: Settings = toml::from_str("[window]\ncapacity = 5\n").unwrap();
        assert_eq!(parsed.window.capacity, 5);
        assert_eq!(
            parsed.points.activation_budget,
            PointSettings::default().activation_budget
        );
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut settings = Settings::default();
        settings.pipeline.force_keyframe_backlog = settings.pipeline.max_backlog + 1;
        assert!(settings.validate().is_err());
    }
}
