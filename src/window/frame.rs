//! Keyframe - full per-frame optimization state in the active window.
//!
//! Created on promotion, destroyed on marginalization. The permanent record
//! of the frame lives in its `FrameShell`; the keyframe only holds what the
//! optimizer and the point lifecycle need while the frame is active.

use std::collections::HashMap;

use crate::geometry::SE3;
use crate::tracking::frame::ImageFrame;

use super::point::{ActivePoint, Candidate};
use super::types::{FrameId, KeyframeId, PointId};

/// Affine photometric parameters `a, b`: the frame's brightness transfer is
/// modeled as `I' = e^a * I + b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineLight {
    pub a: f64,
    pub b: f64,
}

impl AffineLight {
    pub fn zero() -> Self {
        Self { a: 0.0, b: 0.0 }
    }

    /// Brightness transfer `(scale, offset)` mapping host intensities into
    /// the target frame, accounting for both exposures.
    pub fn host_to_target(
        host: &AffineLight,
        host_exposure_ms: f32,
        target: &AffineLight,
        target_exposure_ms: f32,
    ) -> (f64, f64) {
        let scale =
            (target_exposure_ms as f64 * (target.a).exp()) / (host_exposure_ms as f64 * (host.a).exp());
        let offset = target.b - scale * host.b;
        (scale, offset)
    }

    pub fn is_finite(&self) -> bool {
        self.a.is_finite() && self.b.is_finite()
    }
}

impl Default for AffineLight {
    fn default() -> Self {
        Self::zero()
    }
}

/// Full optimization state of one active-window frame.
#[derive(Debug)]
pub struct Keyframe {
    pub id: KeyframeId,

    /// Back-reference to the permanent shell (non-owning).
    pub shell: FrameId,

    /// Image pyramid reference for the tracing/tracking collaborators.
    pub image: ImageFrame,

    /// Current pose estimate, refined by the optimizer.
    pub cam_to_world: SE3,

    /// Affine brightness parameters, refined by the optimizer.
    pub affine: AffineLight,

    /// Activated points hosted on this frame.
    pub points: HashMap<PointId, ActivePoint>,

    /// Candidates awaiting depth convergence, hosted on this frame.
    pub candidates: Vec<Candidate>,

    /// Adaptive photometric outlier threshold for residuals targeting this
    /// frame; refreshed after each optimization pass.
    pub energy_threshold: f64,
}

impl Keyframe {
    pub fn new(id: KeyframeId, shell: FrameId, image: ImageFrame, cam_to_world: SE3) -> Self {
        Self {
            id,
            shell,
            image,
            cam_to_world,
            affine: AffineLight::zero(),
            points: HashMap::new(),
            candidates: Vec::new(),
            energy_threshold: f64::INFINITY,
        }
    }

    /// Number of points still participating in optimization.
    pub fn num_active_points(&self) -> usize {
        self.points.values().filter(|p| p.is_active()).count()
    }

    /// Active points plus pending candidates. Young frames whose seeds have
    /// not converged yet still count as well-populated.
    pub fn num_point_hypotheses(&self) -> usize {
        self.num_active_points() + self.candidates.len()
    }

    /// Smallest residual count among this frame's active points; frames
    /// whose points are weakly observed score low for retention.
    pub fn min_point_observations(&self) -> usize {
        self.points
            .values()
            .filter(|p| p.is_active())
            .map(|p| p.residuals.len())
            .min()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affine_identity_transfer() {
        let id = AffineLight::zero();
        let (scale, offset) = AffineLight::host_to_target(&id, 1.0, &id, 1.0);
        assert!((scale - 1.0).abs() < 1e-12);
        assert!(offset.abs() < 1e-12);
    }

    #[test]
    fn test_affine_exposure_ratio() {
        let id = AffineLight::zero();
        // Target exposed twice as long: intensities double.
        let (scale, _) = AffineLight::host_to_target(&id, 10.0, &id, 20.0);
        assert!((scale - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_min_point_observations_empty_frame() {
        let kf = Keyframe::new(
            KeyframeId(0),
            FrameId(0),
            ImageFrame::new(2, 2, vec![0.0; 4], 0, 1.0),
            SE3::identity(),
        );
        assert_eq!(kf.min_point_observations(), 0);
        assert_eq!(kf.num_active_points(), 0);
    }
}
