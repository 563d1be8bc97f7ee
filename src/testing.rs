//! Scripted collaborators and fixtures shared across test modules.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nalgebra::Vector3;

use crate::geometry::SE3;
use crate::imu::{GravityEstimate, GravityInitializer, ImuBias, ImuSample, InertialIntegrator, MotionPrior};
use crate::io::trajectory::TrajectoryEntry;
use crate::mapping::collaborators::{CandidateTracer, PixelSelector, TraceContext};
use crate::optimizer::backend::{EnergyBackend, EnergyEval, StateStep};
use crate::output::{OutputSink, WindowUpdate};
use crate::tracking::bootstrap::{
    BootstrapProgress, BootstrapResult, BootstrapSeed, Bootstrapper,
};
use crate::tracking::coarse::{CoarseTracker, CoarseTrackingResult, TrackingReference};
use crate::tracking::frame::{CameraModel, ImageFrame};
use crate::window::{
    Candidate, CandidateSeed, FrameId, Keyframe, KeyframeId, PointId, TraceStatus, Window,
};

pub fn test_image() -> ImageFrame {
    test_image_at(0)
}

pub fn test_image_at(timestamp_ns: u64) -> ImageFrame {
    ImageFrame::new(8, 8, vec![0.5; 64], timestamp_ns, 1.0)
}

pub fn test_camera() -> CameraModel {
    CameraModel {
        fx: 100.0,
        fy: 100.0,
        cx: 4.0,
        cy: 4.0,
    }
}

/// Insert an identity-pose frame with the next sequential id.
pub fn push_test_frame(window: &mut Window) -> KeyframeId {
    let id = window.next_keyframe_id();
    let shell = FrameId(id.0);
    window.insert_frame(Keyframe::new(id, shell, test_image(), SE3::identity()))
}

/// A candidate that has converged tightly enough to activate.
pub fn converged_candidate() -> Candidate {
    let mut c = Candidate::from_seed(CandidateSeed {
        u: 4.0,
        v: 4.0,
        quality: 1.0,
    });
    c.status = TraceStatus::Good;
    c.idepth_min = 0.98;
    c.idepth_max = 1.01;
    c.good_observations = 3;
    c.attempts = 3;
    c
}

// ─────────────────────────────────────────────────────────────────────────
// Energy backend
// ─────────────────────────────────────────────────────────────────────────

enum EnergyScript {
    /// Fixed sequence; the last value repeats once exhausted.
    List(Vec<f64>),
    /// Geometric decay, always accepted by the loop.
    Decay { start: f64, factor: f64 },
}

/// Backend whose energies follow a script and whose steps are constant.
/// Counts every backup/restore and records absorbed/dropped state.
pub struct ScriptedBackend {
    script: EnergyScript,
    cursor: usize,
    step: StateStep,
    residual_energy: f64,
    backups: usize,
    restores: usize,
    absorbed_points: Vec<PointId>,
    absorbed_frames: Vec<KeyframeId>,
    dropped_points: Vec<PointId>,
}

impl ScriptedBackend {
    pub fn with_energies(energies: Vec<f64>) -> Self {
        assert!(!energies.is_empty());
        Self {
            script: EnergyScript::List(energies),
            cursor: 0,
            step: StateStep::default(),
            residual_energy: 1.0,
            backups: 0,
            restores: 0,
            absorbed_points: Vec::new(),
            absorbed_frames: Vec::new(),
            dropped_points: Vec::new(),
        }
    }

    pub fn decaying() -> Self {
        Self {
            script: EnergyScript::Decay {
                start: 100.0,
                factor: 0.7,
            },
            ..Self::with_energies(vec![0.0])
        }
    }

    pub fn with_constant_step(mut self, step: StateStep) -> Self {
        self.step = step;
        self
    }

    pub fn backups(&self) -> usize {
        self.backups
    }

    pub fn restores(&self) -> usize {
        self.restores
    }

    pub fn absorbed_points(&self) -> Vec<PointId> {
        self.absorbed_points.clone()
    }

    pub fn absorbed_frames(&self) -> Vec<KeyframeId> {
        self.absorbed_frames.clone()
    }

    pub fn dropped_points(&self) -> Vec<PointId> {
        self.dropped_points.clone()
    }

    fn next_energy(&mut self) -> f64 {
        let value = match &self.script {
            EnergyScript::List(values) => {
                *values.get(self.cursor).unwrap_or_else(|| {
                    values.last().expect("non-empty energy script")
                })
            }
            EnergyScript::Decay { start, factor } => start * factor.powi(self.cursor as i32),
        };
        self.cursor += 1;
        value
    }
}

impl EnergyBackend for ScriptedBackend {
    fn linearize(&mut self, window: &mut Window) -> EnergyEval {
        let ids: Vec<_> = window.residuals().map(|r| r.id).collect();
        for id in ids {
            window.residual_mut(id).expect("listed residual").energy = self.residual_energy;
        }
        EnergyEval {
            energy: self.next_energy(),
            num_terms: window.num_residuals().max(1),
        }
    }

    fn solve(&mut self, _window: &Window, _lambda: f64) -> Option<StateStep> {
        Some(self.step.clone())
    }

    fn evaluate(&mut self, window: &Window) -> EnergyEval {
        EnergyEval {
            energy: self.next_energy(),
            num_terms: window.num_residuals().max(1),
        }
    }

    fn backup(&mut self) {
        self.backups += 1;
    }

    fn restore(&mut self) {
        self.restores += 1;
    }

    fn add_motion_prior(&mut self, _from: KeyframeId, _to: KeyframeId, _prior: &MotionPrior) {}

    fn absorb_point(&mut self, _window: &Window, point: PointId) {
        self.absorbed_points.push(point);
    }

    fn absorb_frame(&mut self, _window: &Window, frame: KeyframeId) {
        self.absorbed_frames.push(frame);
    }

    fn drop_point(&mut self, point: PointId) {
        self.dropped_points.push(point);
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Front-end collaborators
// ─────────────────────────────────────────────────────────────────────────

/// Coarse tracker that recommends a keyframe every `keyframe_every` calls
/// and can be scripted to fail.
pub struct ScriptedTracker {
    keyframe_every: usize,
    fail_at: Option<usize>,
    infinite_residual_at: Option<usize>,
    count: usize,
}

impl ScriptedTracker {
    pub fn keyframe_every(n: usize) -> Self {
        Self {
            keyframe_every: n.max(1),
            fail_at: None,
            infinite_residual_at: None,
            count: 0,
        }
    }

    /// Return alignment failure on the n-th tracked frame.
    pub fn failing_at(mut self, n: usize) -> Self {
        self.fail_at = Some(n);
        self
    }

    /// Report an infinite residual on the n-th tracked frame.
    pub fn diverging_at(mut self, n: usize) -> Self {
        self.infinite_residual_at = Some(n);
        self
    }
}

impl CoarseTracker for ScriptedTracker {
    fn track(
        &mut self,
        _reference: &TrackingReference,
        _frame: &ImageFrame,
        _motion_hint: Option<&SE3>,
    ) -> Option<CoarseTrackingResult> {
        self.count += 1;
        if self.fail_at == Some(self.count) {
            return None;
        }
        let residual = if self.infinite_residual_at == Some(self.count) {
            f64::INFINITY
        } else {
            1.0
        };
        let promote = self.count % self.keyframe_every == 0;
        Some(CoarseTrackingResult {
            frame_to_ref: SE3::from_translation(Vector3::new(0.05, 0.0, 0.0)),
            residuals: vec![residual],
            flow: if promote { 5.0 } else { 0.1 },
            brightness_change: 0.0,
        })
    }
}

/// Bootstrapper that succeeds (or fails) after a fixed number of frames.
pub struct InstantBootstrapper {
    after: usize,
    fed: usize,
    fail: bool,
}

impl InstantBootstrapper {
    pub fn ready_after(after: usize) -> Self {
        Self {
            after: after.max(1),
            fed: 0,
            fail: false,
        }
    }

    pub fn failing_after(after: usize) -> Self {
        Self {
            after: after.max(1),
            fed: 0,
            fail: true,
        }
    }
}

impl Bootstrapper for InstantBootstrapper {
    fn feed(&mut self, _frame: &ImageFrame) -> BootstrapProgress {
        self.fed += 1;
        if self.fed < self.after {
            return BootstrapProgress::NeedMoreFrames;
        }
        if self.fail {
            return BootstrapProgress::Failed;
        }
        let seeds = (0..10)
            .map(|i| BootstrapSeed {
                u: i as f32 * 0.7,
                v: i as f32 * 0.5,
                idepth: 1.0,
            })
            .collect();
        BootstrapProgress::Ready(Box::new(BootstrapResult {
            cam_to_world: SE3::identity(),
            seeds,
            scale: 1.0,
        }))
    }
}

/// Gravity initializer that answers immediately with identity alignment.
pub struct InstantGravity;

impl GravityInitializer for InstantGravity {
    fn estimate(&mut self, _samples: &[ImuSample]) -> Option<GravityEstimate> {
        Some(GravityEstimate {
            world_from_first: SE3::identity(),
            scale: 1.0,
        })
    }
}

/// Inertial integrator that never produces a prior.
pub struct NullIntegrator;

impl InertialIntegrator for NullIntegrator {
    fn integrate(
        &mut self,
        _from_ns: u64,
        _to_ns: u64,
        _samples: &[ImuSample],
    ) -> Option<MotionPrior> {
        None
    }

    fn bias(&self) -> ImuBias {
        ImuBias::zero()
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Mapping collaborators
// ─────────────────────────────────────────────────────────────────────────

/// Pixel selector handing out a fixed number of evenly spaced seeds.
pub struct GridSelector {
    per_frame: usize,
}

impl GridSelector {
    pub fn new(per_frame: usize) -> Self {
        Self { per_frame }
    }
}

impl PixelSelector for GridSelector {
    fn select(&mut self, image: &ImageFrame, budget: usize) -> Vec<CandidateSeed> {
        let n = self.per_frame.min(budget);
        (0..n)
            .map(|i| CandidateSeed {
                u: (i as f32 + 0.5) / n as f32 * image.width as f32,
                v: image.height as f32 * 0.5,
                quality: 1.0,
            })
            .collect()
    }
}

/// Tracer that converges every candidate on the first attempt, optionally
/// sleeping to simulate expensive mapping.
#[derive(Default)]
pub struct ConvergingTracer {
    delay_ms: u64,
}

impl ConvergingTracer {
    pub fn with_delay(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

impl CandidateTracer for ConvergingTracer {
    fn trace(&mut self, candidate: &mut Candidate, _ctx: &TraceContext<'_>) -> TraceStatus {
        if self.delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.delay_ms));
        }
        candidate.idepth_min = 0.99;
        candidate.idepth_max = 1.01;
        TraceStatus::Good
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Output sinks
// ─────────────────────────────────────────────────────────────────────────

/// Shared counters observed by `CountingSink`s across threads.
#[derive(Default, Clone)]
pub struct SinkCounters {
    window_updates: Arc<AtomicUsize>,
    trajectories: Arc<AtomicUsize>,
}

impl SinkCounters {
    pub fn window_updates(&self) -> usize {
        self.window_updates.load(Ordering::SeqCst)
    }

    pub fn trajectories(&self) -> usize {
        self.trajectories.load(Ordering::SeqCst)
    }
}

/// Sink that only counts deliveries.
pub struct CountingSink {
    counters: SinkCounters,
}

impl CountingSink {
    pub fn new(counters: &SinkCounters) -> Self {
        Self {
            counters: counters.clone(),
        }
    }
}

impl OutputSink for CountingSink {
    fn publish_window(&mut self, _update: &WindowUpdate) {
        self.counters.window_updates.fetch_add(1, Ordering::SeqCst);
    }

    fn publish_trajectory(&mut self, _entries: &[TrajectoryEntry]) {
        self.counters.trajectories.fetch_add(1, Ordering::SeqCst);
    }
}
