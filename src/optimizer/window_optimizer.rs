//! Damped Gauss-Newton loop over the active window.
//!
//! Every iteration linearizes, solves for an increment, snapshots the full
//! mutable state, applies the scaled increment, and re-evaluates. A step
//! that raises the energy beyond tolerance (or produces anything
//! non-finite) is rolled back to the snapshot and retried with heavier
//! damping, up to a bounded number of rejects; the pre-step state is then
//! final for the cycle.

use tracing::{debug, trace};

use crate::config::OptimizerSettings;
use crate::geometry::SE3;
use crate::window::{AffineLight, KeyframeId, PointId, Window};

use super::backend::{EnergyBackend, EnergyEval, StateStep};

/// Snapshot of all mutable optimization state: poses, affine parameters,
/// inverse depths. Restoring reproduces the captured state bit for bit.
#[derive(Debug, Clone)]
pub struct StateBackup {
    frames: Vec<(KeyframeId, SE3, AffineLight)>,
    points: Vec<(PointId, f64)>,
}

impl StateBackup {
    pub fn capture(window: &Window) -> Self {
        let frames = window
            .frames()
            .map(|f| (f.id, f.cam_to_world.clone(), f.affine))
            .collect();
        let points = window.points().map(|p| (p.id, p.idepth)).collect();
        Self { frames, points }
    }

    pub fn restore(&self, window: &mut Window) {
        for (id, pose, affine) in &self.frames {
            let frame = window.get_mut(*id).expect("backed-up frame disappeared");
            frame.cam_to_world = pose.clone();
            frame.affine = *affine;
        }
        for (id, idepth) in &self.points {
            window
                .point_mut(*id)
                .expect("backed-up point disappeared")
                .idepth = *idepth;
        }
    }
}

/// Outcome of one `optimize` call.
#[derive(Debug, Clone)]
pub struct OptimizeReport {
    pub iterations: usize,
    pub rejected_steps: usize,
    pub initial_rmse: f64,
    pub final_rmse: f64,
    pub converged: bool,
}

/// Run up to `max_iterations` damped Gauss-Newton steps against `backend`.
///
/// Returns the quality report; window state is updated in place and the
/// relative-state cache is left consistent with the final poses.
pub fn optimize(
    window: &mut Window,
    backend: &mut dyn EnergyBackend,
    settings: &OptimizerSettings,
    max_iterations: usize,
) -> OptimizeReport {
    let max_iterations = max_iterations.min(settings.max_iterations.max(1));

    window.set_precalc();
    let mut current = backend.linearize(window);
    let initial_rmse = current.rmse();

    let mut lambda = settings.initial_lambda;
    let mut iterations = 0;
    let mut rejected_steps = 0;
    let mut converged = false;

    while iterations < max_iterations {
        iterations += 1;

        let step = match backend.solve(window, lambda) {
            Some(step) if step.is_finite() => step,
            _ => {
                // Nothing was applied, so there is no state to roll back;
                // the failed solve still counts against the reject budget.
                rejected_steps += 1;
                lambda *= settings.lambda_up;
                trace!("[Optimize] non-finite solve, lambda -> {lambda:.2e}");
                if rejected_steps >= settings.max_step_rejects {
                    break;
                }
                continue;
            }
        };

        if step.max_norm() < settings.convergence_step_norm {
            converged = true;
            break;
        }

        let backup = StateBackup::capture(window);
        backend.backup();

        apply_step(window, &step, settings);
        window.set_precalc();

        let proposed = backend.evaluate(window);
        let accepted = proposed.energy.is_finite()
            && proposed.energy
                <= current.energy * (1.0 + settings.energy_ascent_tolerance);

        if accepted {
            lambda = (lambda * settings.lambda_down).max(1e-12);
            trace!(
                "[Optimize] it={iterations} accepted energy {:.4e} -> {:.4e}",
                current.energy,
                proposed.energy
            );
            current = backend.linearize(window);
        } else {
            backup.restore(window);
            backend.restore();
            window.set_precalc();
            rejected_steps += 1;
            lambda *= settings.lambda_up;
            trace!(
                "[Optimize] it={iterations} rejected energy {:.4e} -> {:.4e}, lambda -> {lambda:.2e}",
                current.energy,
                proposed.energy
            );
            if rejected_steps >= settings.max_step_rejects {
                break;
            }
        }
    }

    let final_eval: EnergyEval = current;
    let report = OptimizeReport {
        iterations,
        rejected_steps,
        initial_rmse,
        final_rmse: final_eval.rmse(),
        converged,
    };
    debug!(
        "[Optimize] {} its, {} rejects, rmse {:.4} -> {:.4}",
        report.iterations, report.rejected_steps, report.initial_rmse, report.final_rmse
    );
    report
}

/// Apply an increment with per-group step scales.
fn apply_step(window: &mut Window, step: &StateStep, settings: &OptimizerSettings) {
    for (id, frame_step) in &step.frames {
        let frame = window.get_mut(*id).expect("step for unknown frame");
        let omega = frame_step.rotation * settings.step_scale_rotation;
        let v = frame_step.translation * settings.step_scale_translation;
        frame.cam_to_world = frame.cam_to_world.perturbed(&omega, &v);
        frame.affine.a += frame_step.affine.x * settings.step_scale_affine;
        frame.affine.b += frame_step.affine.y * settings.step_scale_affine;
    }
    for (id, didepth) in &step.points {
        let point = window.point_mut(*id).expect("step for unknown point");
        point.idepth += didepth * settings.step_scale_idepth;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::backend::FrameStep;
    use crate::testing::{push_test_frame, ScriptedBackend};
    use nalgebra::{Vector2, Vector3};

    fn settings() -> OptimizerSettings {
        OptimizerSettings::default()
    }

    fn small_window() -> Window {
        let mut window = Window::new(4);
        push_test_frame(&mut window);
        push_test_frame(&mut window);
        window
    }

    fn unit_step(window: &Window) -> StateStep {
        let mut step = StateStep::default();
        for frame in window.frames() {
            step.frames.insert(
                frame.id,
                FrameStep {
                    rotation: Vector3::new(0.01, 0.0, 0.0),
                    translation: Vector3::new(0.1, 0.0, 0.0),
                    affine: Vector2::new(0.01, 0.5),
                },
            );
        }
        step
    }

    #[test]
    fn test_descending_energy_is_accepted() {
        let mut window = small_window();
        let step = unit_step(&window);
        let mut backend = ScriptedBackend::with_energies(vec![100.0, 50.0, 25.0, 12.0, 6.0, 3.0])
            .with_constant_step(step);

        let report = optimize(&mut window, &mut backend, &settings(), 3);
        assert_eq!(report.iterations, 3);
        assert_eq!(report.rejected_steps, 0);
        assert!(report.final_rmse < report.initial_rmse);
    }

    #[test]
    fn test_rejected_step_restores_state_bit_identical() {
        let mut window = small_window();
        let step = unit_step(&window);
        // Energy rises on every proposal: every step must be rejected.
        let mut backend =
            ScriptedBackend::with_energies(vec![10.0, 50.0, 60.0, 70.0, 80.0, 90.0])
                .with_constant_step(step);

        let before = StateBackup::capture(&window);
        let report = optimize(&mut window, &mut backend, &settings(), 6);
        let after = StateBackup::capture(&window);

        assert!(report.rejected_steps >= 1);
        for ((id_a, pose_a, aff_a), (id_b, pose_b, aff_b)) in
            before.frames.iter().zip(after.frames.iter())
        {
            assert_eq!(id_a, id_b);
            assert_eq!(pose_a.translation, pose_b.translation);
            assert_eq!(pose_a.rotation.coords, pose_b.rotation.coords);
            assert_eq!(aff_a, aff_b);
        }
        assert_eq!(before.points, after.points);
        // Backend snapshots restored in lockstep.
        assert_eq!(backend.backups(), backend.restores());
    }

    #[test]
    fn test_non_finite_energy_triggers_rollback() {
        let mut window = small_window();
        let step = unit_step(&window);
        let mut backend =
            ScriptedBackend::with_energies(vec![10.0, f64::INFINITY, 8.0, 7.0, 6.0, 5.0])
                .with_constant_step(step);

        let before = window.newest().unwrap().cam_to_world.clone();
        let report = optimize(&mut window, &mut backend, &settings(), 1);
        let after = window.newest().unwrap().cam_to_world.clone();

        assert_eq!(report.rejected_steps, 1);
        assert_eq!(before.translation, after.translation);
        assert!(report.final_rmse.is_finite());
    }

    #[test]
    fn test_non_finite_solve_counts_as_reject_without_mutation() {
        let mut window = small_window();
        let mut bad = unit_step(&window);
        bad.points.insert(PointId(999), f64::NAN);
        let mut backend =
            ScriptedBackend::with_energies(vec![10.0; 8]).with_constant_step(bad);

        let before = StateBackup::capture(&window);
        let report = optimize(&mut window, &mut backend, &settings(), 4);
        let after = StateBackup::capture(&window);

        assert_eq!(report.rejected_steps, settings().max_step_rejects);
        assert_eq!(before.points, after.points);
        for ((_, pose_a, _), (_, pose_b, _)) in before.frames.iter().zip(after.frames.iter()) {
            assert_eq!(pose_a.translation, pose_b.translation);
        }
    }

    #[test]
    fn test_zero_step_declares_convergence() {
        let mut window = small_window();
        let mut backend = ScriptedBackend::with_energies(vec![10.0; 8])
            .with_constant_step(StateStep::default());

        let report = optimize(&mut window, &mut backend, &settings(), 5);
        assert!(report.converged);
        assert_eq!(report.rejected_steps, 0);
    }

    #[test]
    fn test_reject_budget_bounds_retries() {
        let mut window = small_window();
        let step = unit_step(&window);
        let mut backend = ScriptedBackend::with_energies(
            std::iter::once(10.0)
                .chain(std::iter::repeat(1e9).take(20))
                .collect::<Vec<_>>(),
        )
        .with_constant_step(step);

        let report = optimize(&mut window, &mut backend, &settings(), 20);
        assert_eq!(report.rejected_steps, settings().max_step_rejects);
    }
}
