//! Energy/information-matrix backend contract.
//!
//! The backend owns the linearized system: it builds and factors the normal
//! equations, accumulates the marginalization prior, and hands the loop a
//! state increment. Its internals (Jacobian layout, Schur tricks, the prior
//! representation) are its own business; the loop only relies on the
//! contract below.

use std::collections::HashMap;

use nalgebra::{Vector2, Vector3};

use crate::window::{KeyframeId, PointId, Window};

/// Proposed increment for one frame's variables.
#[derive(Debug, Clone, Default)]
pub struct FrameStep {
    /// Rotation increment (axis-angle, left-multiplied).
    pub rotation: Vector3<f64>,
    /// Translation increment.
    pub translation: Vector3<f64>,
    /// Affine brightness increment `[da, db]`.
    pub affine: Vector2<f64>,
}

/// Proposed increment for the whole window, keyed by stable ids.
#[derive(Debug, Clone, Default)]
pub struct StateStep {
    pub frames: HashMap<KeyframeId, FrameStep>,
    /// Inverse-depth increments.
    pub points: HashMap<PointId, f64>,
}

impl StateStep {
    /// Every component of every increment is finite.
    pub fn is_finite(&self) -> bool {
        self.frames.values().all(|f| {
            f.rotation.iter().all(|v| v.is_finite())
                && f.translation.iter().all(|v| v.is_finite())
                && f.affine.iter().all(|v| v.is_finite())
        }) && self.points.values().all(|v| v.is_finite())
    }

    /// Max-norm over all increments; used as the convergence measure.
    pub fn max_norm(&self) -> f64 {
        let frame_max = self
            .frames
            .values()
            .flat_map(|f| {
                f.rotation
                    .iter()
                    .chain(f.translation.iter())
                    .chain(f.affine.iter())
                    .copied()
                    .collect::<Vec<_>>()
            })
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let point_max = self
            .points
            .values()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        frame_max.max(point_max)
    }
}

/// Total energy of the window at some state.
#[derive(Debug, Clone, Copy)]
pub struct EnergyEval {
    pub energy: f64,
    /// Number of residual terms contributing.
    pub num_terms: usize,
}

impl EnergyEval {
    pub fn rmse(&self) -> f64 {
        if self.num_terms == 0 {
            0.0
        } else {
            (self.energy / self.num_terms as f64).sqrt()
        }
    }
}

/// The nonlinear least-squares backend consumed by the optimization loop
/// and the marginalization executor.
pub trait EnergyBackend: Send {
    /// Linearize all active residuals at the window's current state,
    /// refreshing each residual's `energy` field, and return the total.
    /// Non-finite values encountered inside the linearization must surface
    /// as a non-finite total, never as corrupted internal state.
    fn linearize(&mut self, window: &mut Window) -> EnergyEval;

    /// Solve the damped normal equations built by the last `linearize`.
    /// Returns `None` when the system contains non-finite values.
    fn solve(&mut self, window: &Window, lambda: f64) -> Option<StateStep>;

    /// Re-evaluate the total energy at the window's current state without
    /// relinearizing.
    fn evaluate(&mut self, window: &Window) -> EnergyEval;

    /// Snapshot the internal accumulated state (marginalization prior,
    /// linearization point) before a speculative step.
    fn backup(&mut self);

    /// Restore the snapshot taken by the last `backup`.
    fn restore(&mut self);

    /// Attach a relative-motion prior between two frames as an extra
    /// residual term.
    fn add_motion_prior(
        &mut self,
        from: KeyframeId,
        to: KeyframeId,
        prior: &crate::imu::MotionPrior,
    );

    /// Fold an informative point's accumulated information into the
    /// marginalization prior. Called before the point leaves the window.
    fn absorb_point(&mut self, window: &Window, point: PointId);

    /// Fold a retiring frame's information into the prior and retire its
    /// variables. Called before the frame leaves the window.
    fn absorb_frame(&mut self, window: &Window, frame: KeyframeId);

    /// Forget a point that is being dropped without a prior contribution.
    fn drop_point(&mut self, point: PointId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_step_finiteness() {
        let mut step = StateStep::default();
        step.points.insert(PointId(0), 0.5);
        assert!(step.is_finite());

        step.points.insert(PointId(1), f64::INFINITY);
        assert!(!step.is_finite());
    }

    #[test]
    fn test_state_step_max_norm() {
        let mut step = StateStep::default();
        step.frames.insert(
            KeyframeId(0),
            FrameStep {
                rotation: Vector3::new(0.0, -0.3, 0.0),
                translation: Vector3::new(0.1, 0.0, 0.0),
                affine: Vector2::zeros(),
            },
        );
        step.points.insert(PointId(0), -0.2);
        assert!((step.max_norm() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_rmse() {
        let eval = EnergyEval {
            energy: 16.0,
            num_terms: 4,
        };
        assert!((eval.rmse() - 2.0).abs() < 1e-12);
        assert_eq!(
            EnergyEval {
                energy: 0.0,
                num_terms: 0
            }
            .rmse(),
            0.0
        );
    }
}
