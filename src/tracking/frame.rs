//! Ingress frame type handed to the pipeline.
//!
//! The orchestrator never inspects pixels itself; intensity data is carried
//! opaquely for the coarse tracker, pixel selector, and candidate tracer
//! collaborators. The buffer is reference-counted so a frame can sit in the
//! mapping queue while the tracker keeps its own handle.

use std::sync::Arc;

/// One photometrically corrected input image plus its exposure time.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    /// Timestamp in nanoseconds.
    pub timestamp_ns: u64,

    /// Exposure time in milliseconds (1.0 if the camera does not report it).
    pub exposure_ms: f32,

    pub width: u32,
    pub height: u32,

    /// Row-major intensity data, `width * height` values.
    intensity: Arc<[f32]>,
}

impl ImageFrame {
    pub fn new(
        width: u32,
        height: u32,
        intensity: Vec<f32>,
        timestamp_ns: u64,
        exposure_ms: f32,
    ) -> Self {
        assert_eq!(
            intensity.len(),
            (width * height) as usize,
            "intensity buffer size must match image dimensions"
        );
        Self {
            timestamp_ns,
            exposure_ms,
            width,
            height,
            intensity: intensity.into(),
        }
    }

    pub fn intensity(&self) -> &[f32] {
        &self.intensity
    }

    /// Timestamp in seconds.
    pub fn timestamp_sec(&self) -> f64 {
        self.timestamp_ns as f64 / 1e9
    }
}

/// Pinhole intrinsics. Only what the output path needs to turn
/// (pixel, inverse depth) into a camera-frame point; distortion and
/// calibration loading are outside this crate.
#[derive(Debug, Clone, Copy)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraModel {
    /// Back-project a pixel at the given inverse depth into the camera
    /// frame.
    pub fn unproject(&self, u: f64, v: f64, idepth: f64) -> nalgebra::Vector3<f64> {
        let z = 1.0 / idepth;
        nalgebra::Vector3::new((u - self.cx) / self.fx * z, (v - self.cy) / self.fy * z, z)
    }

    /// Project a camera-frame point to pixel coordinates; `None` behind
    /// the camera.
    pub fn project(&self, p: &nalgebra::Vector3<f64>) -> Option<(f64, f64)> {
        if p.z <= 0.0 {
            return None;
        }
        Some((
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unproject_project_roundtrip() {
        let cam = CameraModel {
            fx: 400.0,
            fy: 400.0,
            cx: 320.0,
            cy: 240.0,
        };
        let p = cam.unproject(100.0, 50.0, 0.25);
        assert!((p.z - 4.0).abs() < 1e-12);
        let (u, v) = cam.project(&p).unwrap();
        assert!((u - 100.0).abs() < 1e-9);
        assert!((v - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_clone_shares_buffer() {
        let frame = ImageFrame::new(4, 2, vec![0.5; 8], 42, 1.0);
        let copy = frame.clone();
        assert!(std::ptr::eq(
            frame.intensity().as_ptr(),
            copy.intensity().as_ptr()
        ));
    }

    #[test]
    #[should_panic(expected = "intensity buffer size")]
    fn test_rejects_mismatched_buffer() {
        ImageFrame::new(4, 4, vec![0.0; 3], 0, 1.0);
    }
}
