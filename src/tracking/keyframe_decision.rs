//! Keyframe decision criteria.
//!
//! A new keyframe is requested when the coarse tracker reports enough
//! optical flow or brightness change against the current reference, or
//! unconditionally after a maximum frame gap. The pipeline's catch-up
//! policy can override the decision downstream.

use crate::config::TrackingSettings;

use super::coarse::CoarseTrackingResult;

/// Weight of the brightness term relative to the flow term.
const BRIGHTNESS_WEIGHT: f64 = 0.6;

/// Decides whether the current frame should be promoted to a keyframe.
pub struct KeyframeSelector {
    /// Maximum frames between keyframes.
    max_frames: usize,
    /// Combined flow/brightness score above which a keyframe is requested.
    score_threshold: f64,
    /// Frame counter since the last keyframe.
    frames_since_kf: usize,
}

impl KeyframeSelector {
    pub fn new(settings: &TrackingSettings) -> Self {
        Self {
            max_frames: settings.max_frames_between_keyframes,
            score_threshold: settings.keyframe_score_threshold,
            frames_since_kf: 0,
        }
    }

    /// Decide from the coarse-tracking confidence vector.
    pub fn should_promote(&mut self, result: &CoarseTrackingResult) -> bool {
        self.frames_since_kf += 1;

        // Always promote when the gap gets too large.
        if self.frames_since_kf >= self.max_frames {
            self.frames_since_kf = 0;
            return true;
        }

        let score = result.flow + BRIGHTNESS_WEIGHT * result.brightness_change.abs();
        if score > self.score_threshold {
            self.frames_since_kf = 0;
            return true;
        }

        false
    }

    /// Reset after a keyframe was created outside the decision path
    /// (bootstrap, catch-up override).
    pub fn reset(&mut self) {
        self.frames_since_kf = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SE3;

    fn result(flow: f64, brightness: f64) -> CoarseTrackingResult {
        CoarseTrackingResult {
            frame_to_ref: SE3::identity(),
            residuals: vec![1.0],
            flow,
            brightness_change: brightness,
        }
    }

    fn selector() -> KeyframeSelector {
        KeyframeSelector::new(&TrackingSettings {
            lost_chi2_factor: 9.0,
            max_frames_between_keyframes: 5,
            keyframe_score_threshold: 1.0,
        })
    }

    #[test]
    fn test_high_flow_promotes() {
        let mut sel = selector();
        assert!(sel.should_promote(&result(2.0, 0.0)));
    }

    #[test]
    fn test_low_score_does_not_promote() {
        let mut sel = selector();
        assert!(!sel.should_promote(&result(0.1, 0.1)));
    }

    #[test]
    fn test_max_gap_forces_promotion() {
        let mut sel = selector();
        for _ in 0..4 {
            assert!(!sel.should_promote(&result(0.0, 0.0)));
        }
        assert!(sel.should_promote(&result(0.0, 0.0)));
        // Counter reset afterwards.
        assert!(!sel.should_promote(&result(0.0, 0.0)));
    }

    #[test]
    fn test_brightness_change_contributes() {
        let mut sel = selector();
        assert!(sel.should_promote(&result(0.0, 2.0)));
    }
}
