//! Marginalization policy: which frame leaves the window, and the
//! transactional removal that folds its information into the prior.

use tracing::debug;

use crate::config::{PointSettings, WindowSettings};
use crate::optimizer::EnergyBackend;
use crate::window::{FrameHistory, KeyframeId, PointStatus, Window};

/// What one frame marginalization did.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarginalizationOutcome {
    pub points_absorbed: usize,
    pub points_dropped: usize,
    pub residuals_removed: usize,
}

/// Retention score: how much keeping this frame is worth. Far-from-others
/// frames carry distinct viewpoints; frames whose points are weakly
/// observed carry little. The lowest score goes first.
fn retention_score(window: &Window, frame: KeyframeId, settings: &WindowSettings) -> f64 {
    let this = window.get(frame).expect("scored frame must be active");
    let mut dist_sum = 0.0;
    let mut others = 0;
    for other in window.frames() {
        if other.id != frame {
            dist_sum += this.cam_to_world.distance(&other.cam_to_world);
            others += 1;
        }
    }
    let mean_dist = if others > 0 {
        dist_sum / others as f64
    } else {
        0.0
    };
    settings.redundancy_weight * mean_dist
        + settings.observation_weight * this.min_point_observations() as f64
}

/// Select the frames to retire before the next insertion.
///
/// Two rules, in order:
/// 1. any frame (outside the two newest) whose active-point fraction has
///    collapsed below `min_point_fraction` of the window maximum;
/// 2. if the window is full and nothing was flagged, the lowest retention
///    score among frames outside the two newest.
///
/// The newest frame is never eligible.
pub fn flag_frames(window: &Window, settings: &WindowSettings) -> Vec<KeyframeId> {
    let order = window.order();
    if order.len() < 3 {
        return Vec::new();
    }
    // The two most recent keyframes are protected.
    let eligible = &order[..order.len() - 2];

    let max_points = window
        .frames()
        .map(|f| f.num_point_hypotheses())
        .max()
        .unwrap_or(0);

    let mut flagged: Vec<KeyframeId> = eligible
        .iter()
        .copied()
        .filter(|&id| {
            max_points > 0
                && (window.get(id).expect("active").num_point_hypotheses() as f64)
                    < settings.min_point_fraction * max_points as f64
        })
        .collect();

    if window.is_full() && flagged.is_empty() {
        let victim = eligible
            .iter()
            .copied()
            .min_by(|&a, &b| {
                retention_score(window, a, settings)
                    .partial_cmp(&retention_score(window, b, settings))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("eligible frames exist when window is full");
        flagged.push(victim);
    }

    flagged
}

/// Retire one frame from the window.
///
/// Informative points hosted on it are folded into the backend's prior;
/// the rest are dropped. Every residual touching the frame goes in the
/// same transaction, and points left without any constraint are dropped
/// too, so the remaining problem stays well-posed. The shell survives in
/// the history with its retirement recorded.
pub fn marginalize_frame(
    window: &mut Window,
    backend: &mut dyn EnergyBackend,
    history: &mut FrameHistory,
    frame: KeyframeId,
    settings: &PointSettings,
) -> MarginalizationOutcome {
    assert_ne!(
        Some(frame),
        window.newest_id(),
        "the current frame is never marginalized"
    );
    let mut outcome = MarginalizationOutcome::default();
    let residuals_before = window.num_residuals();

    // Split the frame's own points into prior-worthy and negligible.
    let hosted: Vec<_> = window
        .get(frame)
        .expect("marginalized frame must be active")
        .points
        .keys()
        .copied()
        .collect();
    for pid in hosted {
        let informative = window
            .point(pid)
            .map(|p| p.residuals.len() >= settings.min_residuals_for_prior)
            .unwrap_or(false);
        if informative {
            backend.absorb_point(window, pid);
            window.remove_point(pid, PointStatus::Marginalized);
            outcome.points_absorbed += 1;
        } else {
            backend.drop_point(pid);
            window.remove_point(pid, PointStatus::Dropped);
            outcome.points_dropped += 1;
        }
    }

    // Frame-level prior contribution, then the transactional removal of the
    // frame and every residual still referencing it.
    backend.absorb_frame(window, frame);
    let (removed, leftovers) = window
        .remove_frame(frame)
        .expect("marginalized frame must be active");
    debug_assert!(leftovers.is_empty(), "hosted points were handled above");

    // Points observed only by the retired frame have no constraint left.
    let newest = window.newest_id();
    let orphaned: Vec<_> = window
        .points()
        .filter(|p| p.residuals.is_empty() && Some(p.host) != newest)
        .map(|p| p.id)
        .collect();
    for pid in orphaned {
        backend.drop_point(pid);
        window.remove_point(pid, PointStatus::Dropped);
        outcome.points_dropped += 1;
    }

    outcome.residuals_removed = residuals_before - window.num_residuals();

    if let Some(shell) = history.get_mut(removed.shell) {
        shell.marginalized_at = window.newest_id();
    }
    window.set_precalc();

    debug!(
        "[Marginalize] {}: {} points absorbed, {} dropped, {} residuals removed",
        frame, outcome.points_absorbed, outcome.points_dropped, outcome.residuals_removed
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{converged_candidate, push_test_frame, ScriptedBackend};
    use nalgebra::Vector3;

    fn full_window(capacity: usize) -> (Window, Vec<KeyframeId>) {
        let mut window = Window::new(capacity);
        let ids: Vec<KeyframeId> = (0..capacity).map(|_| push_test_frame(&mut window)).collect();
        // Spread the frames out so retention scores differ.
        for (i, &id) in ids.iter().enumerate() {
            window.get_mut(id).unwrap().cam_to_world.translation =
                Vector3::new(i as f64, 0.0, 0.0);
        }
        (window, ids)
    }

    #[test]
    fn test_newest_two_never_flagged() {
        let (window, ids) = full_window(5);
        let settings = WindowSettings::default();
        let flagged = flag_frames(&window, &settings);
        assert_eq!(flagged.len(), 1);
        assert!(!flagged.contains(&ids[ids.len() - 1]));
        assert!(!flagged.contains(&ids[ids.len() - 2]));
    }

    #[test]
    fn test_nothing_flagged_below_capacity() {
        let mut window = Window::new(6);
        for _ in 0..4 {
            push_test_frame(&mut window);
        }
        let flagged = flag_frames(&window, &WindowSettings::default());
        assert!(flagged.is_empty());
    }

    #[test]
    fn test_starved_frame_flagged_even_below_capacity() {
        let mut window = Window::new(6);
        let starved = push_test_frame(&mut window);
        let rich = push_test_frame(&mut window);
        push_test_frame(&mut window);
        push_test_frame(&mut window);

        // One frame hosts plenty of points, the starved one none.
        for _ in 0..10 {
            let c = converged_candidate();
            window.create_point(rich, &c);
        }

        let flagged = flag_frames(&window, &WindowSettings::default());
        assert_eq!(flagged, vec![starved]);
    }

    #[test]
    fn test_marginalize_folds_informative_points() {
        let (mut window, ids) = full_window(5);
        let mut history = FrameHistory::new();
        for _ in 0..5 {
            history.push(0, 0);
        }
        let victim = ids[0];

        // Informative point: observed in 3 other frames.
        let p = window.create_point(victim, &converged_candidate());
        for &t in &[ids[1], ids[2], ids[3]] {
            window.add_residual(p, t);
        }
        // Negligible point: one observation.
        let q = window.create_point(victim, &converged_candidate());
        window.add_residual(q, ids[1]);

        let mut backend = ScriptedBackend::with_energies(vec![1.0]);
        let outcome = marginalize_frame(
            &mut window,
            &mut backend,
            &mut history,
            victim,
            &PointSettings::default(),
        );

        assert_eq!(outcome.points_absorbed, 1);
        assert_eq!(outcome.points_dropped, 1);
        assert_eq!(outcome.residuals_removed, 4);
        assert_eq!(backend.absorbed_points(), vec![p]);
        assert_eq!(backend.absorbed_frames(), vec![victim]);
        assert_eq!(backend.dropped_points(), vec![q]);
        assert!(!window.contains(victim));
        window.check_consistent().unwrap();
    }

    #[test]
    fn test_marginalize_preserves_shell() {
        let (mut window, ids) = full_window(4);
        let mut history = FrameHistory::new();
        for _ in 0..4 {
            history.push(0, 0);
        }
        let victim = ids[0];
        let shell = window.get(victim).unwrap().shell;

        let mut backend = ScriptedBackend::with_energies(vec![1.0]);
        marginalize_frame(
            &mut window,
            &mut backend,
            &mut history,
            victim,
            &PointSettings::default(),
        );

        let shell = history.get(shell).unwrap();
        assert_eq!(shell.marginalized_at, window.newest_id());
    }

    #[test]
    fn test_marginalize_drops_points_constrained_only_by_victim() {
        let (mut window, ids) = full_window(5);
        let mut history = FrameHistory::new();
        for _ in 0..5 {
            history.push(0, 0);
        }
        let victim = ids[0];

        // Point hosted elsewhere whose only observation targets the victim.
        let p = window.create_point(ids[1], &converged_candidate());
        window.add_residual(p, victim);

        let mut backend = ScriptedBackend::with_energies(vec![1.0]);
        let outcome = marginalize_frame(
            &mut window,
            &mut backend,
            &mut history,
            victim,
            &PointSettings::default(),
        );

        assert!(window.point(p).is_none());
        assert_eq!(outcome.points_dropped, 1);
        window.check_consistent().unwrap();
    }

    #[test]
    #[should_panic(expected = "never marginalized")]
    fn test_marginalizing_newest_panics() {
        let (mut window, ids) = full_window(4);
        let mut history = FrameHistory::new();
        let newest = *ids.last().unwrap();
        let mut backend = ScriptedBackend::with_energies(vec![1.0]);
        marginalize_frame(
            &mut window,
            &mut backend,
            &mut history,
            newest,
            &PointSettings::default(),
        );
    }
}
