//! Rigid-body transform in SE(3), stored as unit quaternion + translation.
//!
//! Poses follow the `T_target_source` naming convention: `cam_to_world`
//! transforms a point from camera coordinates into world coordinates.

use nalgebra::{UnitQuaternion, Vector3, Vector6};

/// A rigid-body transform: rotation followed by translation.
#[derive(Debug, Clone, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Pure translation.
    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation,
        }
    }

    /// Inverse transform: if `self` maps A→B, the result maps B→A.
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    /// Transform a point: `p' = R p + t`.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Composition: `self * other` applies `other` first, then `self`.
    pub fn compose(&self, other: &SE3) -> SE3 {
        SE3 {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Apply a small left-multiplied increment `[ω, v]` (rotation vector,
    /// translation) to this pose. Used when stepping the optimizer.
    pub fn perturbed(&self, omega: &Vector3<f64>, v: &Vector3<f64>) -> SE3 {
        let dq = UnitQuaternion::from_scaled_axis(*omega);
        SE3 {
            rotation: dq * self.rotation,
            translation: dq * self.translation + v,
        }
    }

    /// Logarithm of the relative transform `self⁻¹ * other` as a 6-vector
    /// `[ω, v]`. Zero iff the two poses coincide.
    pub fn log_relative(&self, other: &SE3) -> Vector6<f64> {
        let rel = self.inverse().compose(other);
        let omega = rel.rotation.scaled_axis();
        let mut out = Vector6::zeros();
        out.fixed_rows_mut::<3>(0).copy_from(&omega);
        out.fixed_rows_mut::<3>(3).copy_from(&rel.translation);
        out
    }

    /// Geodesic rotation distance plus Euclidean translation distance.
    /// Cheap scalar used by redundancy scoring, not a proper metric.
    pub fn distance(&self, other: &SE3) -> f64 {
        let dt = (self.translation - other.translation).norm();
        let dr = self.rotation.angle_to(&other.rotation);
        dt + dr
    }

    /// All eight scalar components are finite.
    pub fn is_finite(&self) -> bool {
        self.translation.iter().all(|v| v.is_finite())
            && self.rotation.coords.iter().all(|v| v.is_finite())
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_identity_transform() {
        let p = Vector3::new(1.0, 2.0, 3.0);
        assert_eq!(SE3::identity().transform_point(&p), p);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = SE3::new(
            UnitQuaternion::from_euler_angles(0.1, -0.2, 0.3),
            Vector3::new(1.0, -2.0, 0.5),
        );
        let p = Vector3::new(4.0, 5.0, 6.0);
        let back = t.inverse().transform_point(&t.transform_point(&p));
        assert!((back - p).norm() < 1e-12);
    }

    #[test]
    fn test_compose_order() {
        let rot = SE3::new(
            UnitQuaternion::from_euler_angles(0.0, 0.0, FRAC_PI_2),
            Vector3::zeros(),
        );
        let trans = SE3::from_translation(Vector3::new(1.0, 0.0, 0.0));

        // rot ∘ trans: translate first, then rotate.
        let p = rot.compose(&trans).transform_point(&Vector3::zeros());
        assert!((p - Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_log_relative_zero_at_same_pose() {
        let t = SE3::new(
            UnitQuaternion::from_euler_angles(0.3, 0.1, -0.4),
            Vector3::new(0.5, 1.5, -2.0),
        );
        assert!(t.log_relative(&t).norm() < 1e-12);
    }

    #[test]
    fn test_perturbed_identity_step() {
        let t = SE3::new(
            UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
            Vector3::new(1.0, 2.0, 3.0),
        );
        let stepped = t.perturbed(&Vector3::zeros(), &Vector3::zeros());
        assert!((stepped.translation - t.translation).norm() < 1e-15);
        assert!(stepped.rotation.angle_to(&t.rotation) < 1e-15);
    }
}
