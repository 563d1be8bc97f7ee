//! Candidate activation: promote converged candidates to active points
//! under a fixed per-cycle budget, best information gain first.

use tracing::debug;

use crate::config::PointSettings;
use crate::window::{KeyframeId, Window};

/// Result of one activation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivationOutcome {
    pub activated: usize,
    pub discarded: usize,
}

/// Expected information gain of activating a candidate: selector quality
/// scaled by how well the depth interval has collapsed and how often the
/// trace succeeded.
fn activation_score(quality: f32, spread: f64, good_observations: u32) -> f64 {
    quality as f64 * (good_observations as f64) / (spread + 1e-6)
}

/// Promote up to `settings.activation_budget` candidates across the whole
/// window and discard the hopeless ones. New points get residual edges to
/// every other active frame.
pub fn activate_candidates(window: &mut Window, settings: &PointSettings) -> ActivationOutcome {
    let mut outcome = ActivationOutcome::default();

    // Gather (host, index, score) for every activatable candidate, then
    // promote the best across all frames, not per-frame.
    let mut eligible: Vec<(KeyframeId, usize, f64)> = Vec::new();
    for frame in window.frames() {
        for (idx, candidate) in frame.candidates.iter().enumerate() {
            if candidate.is_activatable(
                settings.max_idepth_spread,
                settings.min_trace_observations,
            ) {
                eligible.push((
                    frame.id,
                    idx,
                    activation_score(
                        candidate.quality,
                        candidate.idepth_spread(),
                        candidate.good_observations,
                    ),
                ));
            }
        }
    }
    eligible.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
    eligible.truncate(settings.activation_budget);

    // Highest index first so removal keeps the remaining indices valid.
    eligible.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));

    let frame_ids: Vec<KeyframeId> = window.order().to_vec();
    for (host, idx, _) in eligible {
        let candidate = window
            .get_mut(host)
            .expect("eligible host must be active")
            .candidates
            .remove(idx);
        let point = window.create_point(host, &candidate);
        for &target in &frame_ids {
            if target != host {
                window.add_residual(point, target);
            }
        }
        outcome.activated += 1;
    }

    // Drop candidates that keep failing to converge.
    for &frame_id in &frame_ids {
        let frame = window.get_mut(frame_id).expect("active frame");
        let before = frame.candidates.len();
        frame
            .candidates
            .retain(|c| !c.is_discardable(settings.max_failed_traces));
        outcome.discarded += before - frame.candidates.len();
    }

    if outcome.activated > 0 || outcome.discarded > 0 {
        debug!(
            "[Activation] promoted {}, discarded {}",
            outcome.activated, outcome.discarded
        );
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{converged_candidate, push_test_frame};
    use crate::window::TraceStatus;

    fn settings() -> PointSettings {
        PointSettings {
            activation_budget: 3,
            ..PointSettings::default()
        }
    }

    #[test]
    fn test_budget_caps_activation() {
        let mut window = Window::new(4);
        let a = push_test_frame(&mut window);
        let _b = push_test_frame(&mut window);

        for _ in 0..10 {
            window.get_mut(a).unwrap().candidates.push(converged_candidate());
        }

        let outcome = activate_candidates(&mut window, &settings());
        assert_eq!(outcome.activated, 3);
        assert_eq!(window.num_points(), 3);
        assert_eq!(window.get(a).unwrap().candidates.len(), 7);
        window.check_consistent().unwrap();
    }

    #[test]
    fn test_best_scores_win() {
        let mut window = Window::new(4);
        let a = push_test_frame(&mut window);
        let _b = push_test_frame(&mut window);

        let mut weak = converged_candidate();
        weak.quality = 0.1;
        let mut strong = converged_candidate();
        strong.quality = 10.0;
        strong.u = 99.0;

        window.get_mut(a).unwrap().candidates.push(weak);
        window.get_mut(a).unwrap().candidates.push(strong);

        let outcome = activate_candidates(
            &mut window,
            &PointSettings {
                activation_budget: 1,
                ..PointSettings::default()
            },
        );
        assert_eq!(outcome.activated, 1);
        let activated = window.points().next().unwrap();
        assert_eq!(activated.u, 99.0);
    }

    #[test]
    fn test_new_points_get_residuals_to_all_other_frames() {
        let mut window = Window::new(4);
        let a = push_test_frame(&mut window);
        let _b = push_test_frame(&mut window);
        let _c = push_test_frame(&mut window);

        window.get_mut(a).unwrap().candidates.push(converged_candidate());
        activate_candidates(&mut window, &settings());

        assert_eq!(window.num_residuals(), 2);
        window.check_consistent().unwrap();
    }

    #[test]
    fn test_hopeless_candidates_discarded() {
        let mut window = Window::new(4);
        let a = push_test_frame(&mut window);

        let mut hopeless = converged_candidate();
        hopeless.status = TraceStatus::Outlier;
        hopeless.good_observations = 0;
        window.get_mut(a).unwrap().candidates.push(hopeless);

        let outcome = activate_candidates(&mut window, &settings());
        assert_eq!(outcome.activated, 0);
        assert_eq!(outcome.discarded, 1);
        assert!(window.get(a).unwrap().candidates.is_empty());
    }
}
