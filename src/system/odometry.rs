//! OdometrySystem - entry point and thread orchestration.
//!
//! Owns the shared state, runs the tracking stage on the caller's thread,
//! and spawns the mapping worker. In pipelined mode `submit_image` returns
//! as soon as the frame is queued; with pipelining disabled it blocks until
//! mapping has fully finished the frame, for deterministic offline replay.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::Result;
use parking_lot::Mutex;

use crate::config::Settings;
use crate::geometry::SE3;
use crate::imu::{GravityInitializer, ImuSample, InertialIntegrator};
use crate::io::trajectory::{self, ExportOptions, TrajectoryEntry};
use crate::mapping::collaborators::{CandidateTracer, PixelSelector};
use crate::mapping::report::SessionStats;
use crate::mapping::Mapper;
use crate::optimizer::EnergyBackend;
use crate::output::OutputSink;
use crate::tracking::bootstrap::Bootstrapper;
use crate::tracking::coarse::CoarseTracker;
use crate::tracking::frame::{CameraModel, ImageFrame};
use crate::tracking::result::TrackingSnapshot;
use crate::tracking::Tracker;
use crate::window::FrameId;

use super::pipeline::FramePipeline;
use super::shared_state::SharedState;

/// The external collaborators the pipeline is wired with. All consumed as
/// black boxes through their traits.
pub struct Collaborators {
    pub coarse_tracker: Box<dyn CoarseTracker>,
    pub bootstrapper: Box<dyn Bootstrapper>,
    pub gravity: Box<dyn GravityInitializer>,
    pub backend: Box<dyn EnergyBackend>,
    pub tracer: Box<dyn CandidateTracer>,
    pub selector: Box<dyn PixelSelector>,
    pub integrator: Box<dyn InertialIntegrator>,
    /// Output sinks; each receives every window update.
    pub outputs: Vec<Box<dyn OutputSink>>,
}

/// The full odometry pipeline.
pub struct OdometrySystem {
    shared: Arc<SharedState>,
    pipeline: Arc<FramePipeline>,
    tracker: Tracker,
    mapping_handle: Option<JoinHandle<()>>,
    pipelined: bool,

    /// Ground-truth poses supplied by the caller (test/debug only).
    ground_truth: Mutex<Vec<(FrameId, SE3)>>,
}

impl OdometrySystem {
    /// Build the pipeline and spawn the mapping worker.
    pub fn new(settings: Settings, camera: CameraModel, collab: Collaborators) -> Result<Self> {
        settings.validate()?;

        let shared = SharedState::new(settings.window.capacity);
        let pipeline = Arc::new(FramePipeline::new(&settings.pipeline));
        let pipelined = settings.pipeline.pipelined;

        let tracker = Tracker::new(
            settings.tracking.clone(),
            Arc::clone(&shared),
            Arc::clone(&pipeline),
            collab.coarse_tracker,
            collab.bootstrapper,
            collab.gravity,
        );

        let mut mapper = Mapper::new(
            settings,
            camera,
            Arc::clone(&shared),
            Arc::clone(&pipeline),
            collab.backend,
            collab.tracer,
            collab.selector,
            collab.integrator,
            collab.outputs,
        );
        let mapping_handle = thread::Builder::new()
            .name("mapping".to_string())
            .spawn(move || mapper.run())?;

        Ok(Self {
            shared,
            pipeline,
            tracker,
            mapping_handle: Some(mapping_handle),
            pipelined,
            ground_truth: Mutex::new(Vec::new()),
        })
    }

    /// Feed one image (plus its inertial interval and optional ground
    /// truth). Runs tracking on the calling thread; in synchronous mode
    /// also waits for mapping to finish the frame.
    pub fn submit_image(
        &mut self,
        image: ImageFrame,
        incoming_id: i64,
        imu_samples: &[ImuSample],
        ground_truth: Option<&SE3>,
    ) -> Result<TrackingSnapshot> {
        let snapshot = self.tracker.process_frame(image, incoming_id, imu_samples)?;
        if let Some(gt) = ground_truth {
            self.ground_truth.lock().push((snapshot.frame, gt.clone()));
        }
        if !self.pipelined {
            self.pipeline.wait_until_idle();
        }
        Ok(snapshot)
    }

    /// Block until the mapping queue is empty and no frame is in flight.
    pub fn wait_until_idle(&self) {
        self.pipeline.wait_until_idle();
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.is_initialized()
    }

    /// Tracking was lost; terminal for this session.
    pub fn is_lost(&self) -> bool {
        self.shared.is_lost()
    }

    /// Bootstrap exhausted its attempt budget; the caller may retry with a
    /// fresh system.
    pub fn init_failed(&self) -> bool {
        self.shared.init_failed()
    }

    /// Session statistics accumulated so far.
    pub fn stats(&self) -> SessionStats {
        self.shared.stats.lock().clone()
    }

    /// Ground-truth poses recorded via `submit_image`.
    pub fn ground_truth(&self) -> Vec<(FrameId, SE3)> {
        self.ground_truth.lock().clone()
    }

    /// Ordered (timestamp, pose) list over the full frame history.
    pub fn export_trajectory(&self, options: &ExportOptions) -> Vec<TrajectoryEntry> {
        let history = self.shared.history.read();
        trajectory::collect(&history, options)
    }

    /// Write the trajectory in line-oriented text format.
    pub fn write_trajectory<P: AsRef<Path>>(&self, options: &ExportOptions, path: P) -> Result<()> {
        let history = self.shared.history.read();
        trajectory::write_file(&history, options, path)
    }

    /// Stop the mapping worker after it drains in-flight work.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.mapping_handle.take() {
            self.pipeline.wait_until_idle();
            self.shared.request_shutdown();
            let _ = handle.join();
        }
    }
}

impl Drop for OdometrySystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::testing::{
        test_camera, test_image_at, ConvergingTracer, CountingSink, GridSelector,
        InstantBootstrapper, InstantGravity, NullIntegrator, ScriptedBackend, ScriptedTracker,
        SinkCounters,
    };
    use crate::tracking::TrackingState;

    fn collaborators(tracker: ScriptedTracker, bootstrapper: InstantBootstrapper) -> Collaborators {
        Collaborators {
            coarse_tracker: Box::new(tracker),
            bootstrapper: Box::new(bootstrapper),
            gravity: Box::new(InstantGravity),
            backend: Box::new(ScriptedBackend::decaying()),
            tracer: Box::new(ConvergingTracer::default()),
            selector: Box::new(GridSelector::new(10)),
            integrator: Box::new(NullIntegrator),
            outputs: Vec::new(),
        }
    }

    fn synchronous_settings(capacity: usize) -> Settings {
        let mut settings = Settings::default();
        settings.window.capacity = capacity;
        settings.pipeline.pipelined = false;
        settings
    }

    fn run_frames(system: &mut OdometrySystem, count: u64) {
        for i in 0..count {
            let image = test_image_at(i * 50_000_000);
            system.submit_image(image, i as i64, &[], None).unwrap();
        }
    }

    #[test]
    fn test_steady_state_window_stays_at_capacity() {
        let mut system = OdometrySystem::new(
            synchronous_settings(4),
            test_camera(),
            collaborators(
                ScriptedTracker::keyframe_every(5),
                InstantBootstrapper::ready_after(1),
            ),
        )
        .unwrap();

        run_frames(&mut system, 50);
        system.wait_until_idle();

        assert!(system.is_initialized());
        assert!(!system.is_lost());

        let stats = system.stats();
        // Bootstrap keyframe + one every 5th tracked frame.
        assert!(stats.keyframes >= 10);
        assert!(stats.frames_marginalized >= stats.keyframes - 4);

        {
            let window = system.shared.window.read();
            assert_eq!(window.len(), 4);
            window.check_consistent().unwrap();
        }

        // Every frame ever seen is in the history, in order.
        let trajectory = system.export_trajectory(&ExportOptions::default());
        assert_eq!(trajectory.len(), 50);
        assert!(trajectory
            .windows(2)
            .all(|w| w[0].timestamp_ns <= w[1].timestamp_ns));
    }

    #[test]
    fn test_keyframes_only_export_matches_stats() {
        let mut system = OdometrySystem::new(
            synchronous_settings(4),
            test_camera(),
            collaborators(
                ScriptedTracker::keyframe_every(5),
                InstantBootstrapper::ready_after(1),
            ),
        )
        .unwrap();

        run_frames(&mut system, 30);
        system.wait_until_idle();

        let stats = system.stats();
        let keyframes = system.export_trajectory(&ExportOptions {
            keyframes_only: true,
            ..ExportOptions::default()
        });
        assert_eq!(keyframes.len(), stats.keyframes);
    }

    #[test]
    fn test_lost_tracking_is_terminal() {
        let mut system = OdometrySystem::new(
            synchronous_settings(4),
            test_camera(),
            collaborators(
                ScriptedTracker::keyframe_every(3).failing_at(5),
                InstantBootstrapper::ready_after(1),
            ),
        )
        .unwrap();

        run_frames(&mut system, 10);
        system.wait_until_idle();
        assert!(system.is_lost());

        let frames_mapped = system.stats().frames_mapped;
        let history_len = system.export_trajectory(&ExportOptions::default()).len();

        // Further frames must not touch the window, queue, or history.
        run_frames(&mut system, 5);
        system.wait_until_idle();

        assert_eq!(system.stats().frames_mapped, frames_mapped);
        assert_eq!(
            system.export_trajectory(&ExportOptions::default()).len(),
            history_len
        );
    }

    #[test]
    fn test_divergent_residual_declares_loss() {
        let mut system = OdometrySystem::new(
            synchronous_settings(4),
            test_camera(),
            collaborators(
                ScriptedTracker::keyframe_every(3).diverging_at(4),
                InstantBootstrapper::ready_after(1),
            ),
        )
        .unwrap();

        run_frames(&mut system, 8);
        system.wait_until_idle();
        assert!(system.is_lost());
        // Frames before the degenerate one were mapped, later ones ignored.
        assert_eq!(system.stats().frames_mapped, 4);
    }

    #[test]
    fn test_bootstrap_failure_sets_init_failed() {
        let mut system = OdometrySystem::new(
            synchronous_settings(4),
            test_camera(),
            collaborators(
                ScriptedTracker::keyframe_every(5),
                InstantBootstrapper::failing_after(3),
            ),
        )
        .unwrap();

        run_frames(&mut system, 5);
        assert!(system.init_failed());
        assert!(!system.is_initialized());
        assert_eq!(system.stats().keyframes, 0);
    }

    #[test]
    fn test_outputs_receive_every_update() {
        let counters = SinkCounters::default();
        let mut collab = collaborators(
            ScriptedTracker::keyframe_every(4),
            InstantBootstrapper::ready_after(1),
        );
        collab.outputs.push(Box::new(CountingSink::new(&counters)));
        collab.outputs.push(Box::new(CountingSink::new(&counters)));

        let mut system =
            OdometrySystem::new(synchronous_settings(4), test_camera(), collab).unwrap();
        run_frames(&mut system, 20);
        system.wait_until_idle();

        let keyframes = system.stats().keyframes;
        system.shutdown();

        // Both sinks saw every keyframe update, plus the final trajectory.
        assert_eq!(counters.window_updates(), 2 * keyframes);
        assert_eq!(counters.trajectories(), 2);
    }

    #[test]
    fn test_ground_truth_recorded() {
        let mut system = OdometrySystem::new(
            synchronous_settings(4),
            test_camera(),
            collaborators(
                ScriptedTracker::keyframe_every(5),
                InstantBootstrapper::ready_after(1),
            ),
        )
        .unwrap();

        let gt = SE3::from_translation(nalgebra::Vector3::new(1.0, 2.0, 3.0));
        system
            .submit_image(test_image_at(0), 0, &[], Some(&gt))
            .unwrap();
        let recorded = system.ground_truth();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].1.translation.x, 1.0);
    }

    #[test]
    fn test_pipelined_mode_catches_up_under_burst() {
        let mut settings = Settings::default();
        settings.window.capacity = 4;
        settings.pipeline.max_backlog = 4;
        settings.pipeline.force_keyframe_backlog = 2;

        let mut system = OdometrySystem::new(
            settings,
            test_camera(),
            {
                let mut collab = collaborators(
                    // Rarely recommends keyframes; catch-up promotes instead.
                    ScriptedTracker::keyframe_every(1000),
                    InstantBootstrapper::ready_after(1),
                );
                // Slow mapping down so the queue actually backs up.
                collab.tracer = Box::new(ConvergingTracer::with_delay(5));
                collab
            },
        )
        .unwrap();

        run_frames(&mut system, 30);
        system.wait_until_idle();

        let snapshot_state = system.tracker.state;
        assert_eq!(snapshot_state, TrackingState::Ok);
        // The backlog bound held (bounded channel) and at least one frame
        // was promoted by the catch-up override.
        assert!(system.stats().forced_keyframes >= 1);
        let window = system.shared.window.read();
        assert!(window.len() <= 4);
    }
}
