//! Mapping worker: drains the pipeline queue and runs the per-frame cycle.
//!
//! Non-keyframes only feed the candidate tracer. Keyframes run the full
//! cycle: marginalize if the window is full, insert, attach the inertial
//! prior, build residuals, trace, activate, optimize, remove outliers,
//! reseed candidates, publish, and swap the tracking reference.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::Settings;
use crate::imu::InertialIntegrator;
use crate::optimizer::{optimize, EnergyBackend};
use crate::output::{CloudPoint, OutputSink, WindowPose, WindowUpdate};
use crate::system::messages::TrackedFrame;
use crate::system::pipeline::{Drained, FramePipeline};
use crate::system::shared_state::SharedState;
use crate::tracking::coarse::TrackingReference;
use crate::tracking::frame::CameraModel;
use crate::window::{
    Candidate, Keyframe, KeyframeId, PointStatus, ResidualState, TraceStatus, Window,
};

use super::activation::activate_candidates;
use super::collaborators::{CandidateTracer, PixelSelector, TraceContext};
use super::marginalization::{flag_frames, marginalize_frame};
use super::report::MappingReport;

/// Timeout for dequeue attempts, so shutdown is polled regularly.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// The mapping-stage worker. Owns the backend and all mapping-side
/// collaborators; runs on its own thread.
pub struct Mapper {
    settings: Settings,
    camera: CameraModel,
    shared: Arc<SharedState>,
    pipeline: Arc<FramePipeline>,

    backend: Box<dyn EnergyBackend>,
    tracer: Box<dyn CandidateTracer>,
    selector: Box<dyn PixelSelector>,
    integrator: Box<dyn InertialIntegrator>,
    sinks: Vec<Box<dyn OutputSink>>,

    /// Previous keyframe (id, timestamp) for the inertial prior interval.
    last_keyframe: Option<(KeyframeId, u64)>,
}

impl Mapper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        camera: CameraModel,
        shared: Arc<SharedState>,
        pipeline: Arc<FramePipeline>,
        backend: Box<dyn EnergyBackend>,
        tracer: Box<dyn CandidateTracer>,
        selector: Box<dyn PixelSelector>,
        integrator: Box<dyn InertialIntegrator>,
        sinks: Vec<Box<dyn OutputSink>>,
    ) -> Self {
        Self {
            settings,
            camera,
            shared,
            pipeline,
            backend,
            tracer,
            selector,
            integrator,
            sinks,
            last_keyframe: None,
        }
    }

    /// Worker loop: runs until shutdown is requested or the queue closes.
    pub fn run(&mut self) {
        loop {
            if self.shared.is_shutdown_requested() {
                break;
            }
            match self.pipeline.drain(RECV_TIMEOUT) {
                Drained::Frame(frame) => {
                    self.process(*frame);
                    self.pipeline.mark_done();
                }
                Drained::Timeout => continue,
                Drained::Closed => break,
            }
        }
        debug!("[Mapper] worker exiting");
    }

    /// One mapping cycle.
    pub fn process(&mut self, frame: TrackedFrame) {
        let forced = self.pipeline.take_forced_keyframe();
        let make_keyframe = frame.bootstrap.is_some() || frame.needs_keyframe || forced;
        if forced && !frame.needs_keyframe {
            info!("[Mapper] catch-up: forcing frame {} to keyframe", frame.shell);
        }

        let mut report = MappingReport {
            frame: Some(frame.shell),
            is_keyframe: make_keyframe,
            forced_keyframe: forced && !frame.needs_keyframe,
            backlog: self.pipeline.backlog(),
            ..MappingReport::default()
        };

        if make_keyframe {
            self.make_keyframe(frame, &mut report);
        } else {
            self.make_non_keyframe(frame, &mut report);
        }

        {
            let window = self.shared.window.read();
            debug_assert!(
                window.check_consistent().is_ok(),
                "window inconsistent after cycle: {:?}",
                window.check_consistent()
            );
        }
        self.shared.stats.lock().absorb(&report);
    }

    /// Tracked-only frame: it contributes a pose to its shell (done by the
    /// tracker) and feeds the candidate tracer, nothing else.
    fn make_non_keyframe(&mut self, frame: TrackedFrame, report: &mut MappingReport) {
        let shared = Arc::clone(&self.shared);
        let mut window = shared.window.write();
        report.traced = self.trace_against(&mut window, &frame);
    }

    /// Full keyframe cycle.
    fn make_keyframe(&mut self, frame: TrackedFrame, report: &mut MappingReport) {
        let shared = Arc::clone(&self.shared);
        let mut window = shared.window.write();

        // Retire frames first so the insertion below stays within bounds.
        if window.len() >= 3 {
            let flagged = flag_frames(&window, &self.settings.window);
            for victim in flagged {
                let mut history = self.shared.history.write();
                let outcome = marginalize_frame(
                    &mut window,
                    self.backend.as_mut(),
                    &mut history,
                    victim,
                    &self.settings.points,
                );
                report.marginalized_frames += 1;
                report.marginalized_points += outcome.points_absorbed;
                report.dropped_points += outcome.points_dropped;
            }
        }

        // Trace candidates across the new image before it joins the window.
        report.traced = self.trace_against(&mut window, &frame);

        // Promote: allocate the keyframe and record it on the shell.
        let kf_id = window.next_keyframe_id();
        {
            let mut history = self.shared.history.write();
            let shell = history.get_mut(frame.shell).expect("tracked shell exists");
            shell.keyframe_id = Some(kf_id);
        }
        let mut keyframe = Keyframe::new(kf_id, frame.shell, frame.image.clone(), frame.cam_to_world.clone());
        if let Some(bootstrap) = &frame.bootstrap {
            for seed in &bootstrap.seeds {
                let mut candidate = Candidate::from_seed(crate::window::CandidateSeed {
                    u: seed.u,
                    v: seed.v,
                    quality: 1.0,
                });
                // Initializer depths are converged; give them a tight
                // interval so activation picks them up immediately.
                candidate.idepth_min = seed.idepth * 0.95;
                candidate.idepth_max = seed.idepth * 1.05;
                candidate.status = TraceStatus::Good;
                candidate.good_observations = self.settings.points.min_trace_observations;
                keyframe.candidates.push(candidate);
            }
            report.seeded += keyframe.candidates.len();
        }
        window.insert_frame(keyframe);

        // Inertial prior between the previous keyframe and this one.
        if let Some((prev_kf, prev_ts)) = self.last_keyframe {
            if let Some(prior) =
                self.integrator
                    .integrate(prev_ts, frame.image.timestamp_ns, &frame.imu_samples)
            {
                self.backend.add_motion_prior(prev_kf, kf_id, &prior);
            }
        }
        self.last_keyframe = Some((kf_id, frame.image.timestamp_ns));

        // Every active point gets an observation edge into the new frame.
        let points: Vec<_> = window.points().map(|p| p.id).collect();
        for pid in points {
            if window.point_host(pid) != Some(kf_id) {
                window.add_residual(pid, kf_id);
            }
        }

        // Activate converged candidates within the budget.
        let activation = activate_candidates(&mut window, &self.settings.points);
        report.activated = activation.activated;
        report.discarded_candidates = activation.discarded;

        // Optimize the window.
        let opt = optimize(
            &mut window,
            self.backend.as_mut(),
            &self.settings.optimizer,
            self.settings.optimizer.max_iterations,
        );
        report.optimization = Some(opt.clone());

        // Outlier removal against the adaptive per-frame threshold.
        self.update_energy_threshold(&mut window, kf_id);
        let (outliers, dropped) = self.remove_outliers(&mut window);
        report.outlier_residuals = outliers;
        report.dropped_points += dropped;

        // Fresh candidates for the new keyframe.
        let seeds = self
            .selector
            .select(&frame.image, self.settings.points.seeds_per_keyframe);
        report.seeded += seeds.len();
        {
            let kf = window.get_mut(kf_id).expect("just inserted");
            kf.candidates
                .extend(seeds.into_iter().map(Candidate::from_seed));
        }

        // Optimized poses back onto the shells.
        {
            let mut history = self.shared.history.write();
            for f in window.frames() {
                if let Some(shell) = history.get_mut(f.shell) {
                    shell.cam_to_world = f.cam_to_world.clone();
                }
            }
        }

        // Publish the new reference for the coarse tracker, whole-object.
        self.swap_reference(&window, kf_id);

        // Deliver the update to every registered sink.
        let update = self.build_update(&window);
        drop(window);
        for sink in &mut self.sinks {
            sink.publish_window(&update);
        }

        debug!(
            "[Mapper] keyframe {kf_id}: {} active points, {} residuals, rmse {:.4}",
            update.points.len(),
            report.outlier_residuals,
            opt.final_rmse
        );
    }

    /// Trace all candidates across the incoming frame. The frame is not in
    /// the window; relative poses come from its coarse estimate.
    fn trace_against(&mut self, window: &mut Window, frame: &TrackedFrame) -> usize {
        let mut traced = 0;
        let hosts: Vec<KeyframeId> = window.order().to_vec();
        for host_id in hosts {
            let host = window.get(host_id).expect("active frame");
            let target_from_host = frame
                .cam_to_world
                .inverse()
                .compose(&host.cam_to_world);
            let host_image = host.image.clone();

            let mut candidates = std::mem::take(&mut window.get_mut(host_id).unwrap().candidates);
            for candidate in &mut candidates {
                let ctx = TraceContext {
                    host_image: &host_image,
                    target_image: &frame.image,
                    target_from_host: &target_from_host,
                    affine_scale: 1.0,
                    affine_offset: 0.0,
                };
                let status = self.tracer.trace(candidate, &ctx);
                if status != TraceStatus::Skipped {
                    candidate.attempts += 1;
                    candidate.status = status;
                    if status == TraceStatus::Good {
                        candidate.good_observations += 1;
                    }
                }
                traced += 1;
            }
            window.get_mut(host_id).unwrap().candidates = candidates;
        }
        traced
    }

    /// Refresh the newest frame's adaptive outlier threshold from the
    /// distribution of residual energies targeting it.
    fn update_energy_threshold(&self, window: &mut Window, kf_id: KeyframeId) {
        let mut energies: Vec<f64> = window
            .residuals()
            .filter(|r| r.target == kf_id && r.is_active())
            .map(|r| r.energy)
            .filter(|e| e.is_finite())
            .collect();
        if energies.is_empty() {
            return;
        }
        energies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((energies.len() - 1) as f64 * self.settings.points.outlier_energy_percentile)
            as usize;
        let threshold = energies[idx] * self.settings.points.outlier_energy_scale;
        if let Some(frame) = window.get_mut(kf_id) {
            frame.energy_threshold = threshold.max(f64::MIN_POSITIVE);
        }
    }

    /// Flag residuals whose energy exceeds their target frame's threshold,
    /// remove them, and drop points left with too few observations.
    fn remove_outliers(&mut self, window: &mut Window) -> (usize, usize) {
        let flagged: Vec<_> = window
            .residuals()
            .filter(|r| {
                r.is_active()
                    && window
                        .get(r.target)
                        .map(|f| r.energy > f.energy_threshold)
                        .unwrap_or(false)
            })
            .map(|r| r.id)
            .collect();

        let num_outliers = flagged.len();
        for rid in flagged {
            if let Some(residual) = window.residual_mut(rid) {
                residual.state = ResidualState::Outlier;
            }
            window.remove_residual(rid);
        }

        // A point that lost most of its observations contributed little;
        // drop it outright rather than marginalizing. While the window is
        // still small, a point cannot have more edges than other frames.
        let required = self
            .settings
            .points
            .min_residuals
            .min(window.len().saturating_sub(1));
        let newest = window.newest_id();
        let starved: Vec<_> = window
            .points()
            .filter(|p| p.residuals.len() < required)
            .filter(|p| Some(p.host) != newest)
            .map(|p| p.id)
            .collect();
        let num_dropped = starved.len();
        for pid in starved {
            self.backend.drop_point(pid);
            window.remove_point(pid, PointStatus::Dropped);
        }

        if num_outliers > 0 || num_dropped > 0 {
            debug!(
                "[Mapper] removed {num_outliers} outlier residuals, dropped {num_dropped} points"
            );
        }
        (num_outliers, num_dropped)
    }

    /// Build and publish the tracking reference snapshot for `kf_id`.
    fn swap_reference(&self, window: &Window, kf_id: KeyframeId) {
        let frame = window.get(kf_id).expect("reference frame active");
        let active: Vec<f64> = frame
            .points
            .values()
            .filter(|p| p.is_active())
            .map(|p| p.idepth)
            .collect();
        let mean_idepth = if active.is_empty() {
            1.0
        } else {
            active.iter().sum::<f64>() / active.len() as f64
        };
        self.shared.swap_reference(Arc::new(TrackingReference {
            keyframe: kf_id,
            shell: frame.shell,
            cam_to_world: frame.cam_to_world.clone(),
            image: frame.image.clone(),
            mean_idepth,
            num_points: active.len(),
        }));
    }

    /// Snapshot the window for the output sinks.
    fn build_update(&self, window: &Window) -> WindowUpdate {
        let poses = window
            .frames()
            .map(|f| WindowPose {
                keyframe: f.id,
                shell: f.shell,
                timestamp_ns: f.image.timestamp_ns,
                cam_to_world: f.cam_to_world.clone(),
                affine: f.affine,
            })
            .collect();

        let points = window
            .frames()
            .flat_map(|f| {
                f.points.values().filter(|p| p.is_active()).map(|p| {
                    let p_cam = self.camera.unproject(p.u as f64, p.v as f64, p.idepth.max(1e-6));
                    CloudPoint {
                        position: f.cam_to_world.transform_point(&p_cam),
                        idepth_confidence: p.idepth_confidence,
                        host: f.id,
                    }
                })
            })
            .collect();

        WindowUpdate { poses, points }
    }

    /// Sinks are also handed the final trajectory at shutdown.
    pub fn publish_trajectory(&mut self) {
        let history = self.shared.history.read();
        let entries = crate::io::trajectory::collect(
            &history,
            &crate::io::trajectory::ExportOptions::default(),
        );
        drop(history);
        if entries.is_empty() {
            return;
        }
        for sink in &mut self.sinks {
            sink.publish_trajectory(&entries);
        }
    }
}

impl Drop for Mapper {
    fn drop(&mut self) {
        self.publish_trajectory();
        let stats = self.shared.stats.lock().clone();
        if stats.frames_mapped > 0 {
            info!(
                "[Mapper] session: {} frames, {} keyframes ({} forced), {} points activated, {} marginalized frames",
                stats.frames_mapped,
                stats.keyframes,
                stats.forced_keyframes,
                stats.points_activated,
                stats.frames_marginalized
            );
        }
    }
}
