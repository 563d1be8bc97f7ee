//! Tracking front-end: consumes one image per call on the caller's thread,
//! estimates its pose against the current reference, decides on keyframe
//! promotion, and hands the frame to the mapping queue.
//!
//! The front-end never touches window contents; its only shared writes are
//! shell appends under the history lock and queue submissions.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{debug, info, warn};

use crate::config::TrackingSettings;
use crate::geometry::SE3;
use crate::imu::{GravityInitializer, ImuSample};
use crate::system::messages::TrackedFrame;
use crate::system::pipeline::FramePipeline;
use crate::system::shared_state::SharedState;
use crate::tracking::bootstrap::{BootstrapProgress, Bootstrapper};
use crate::tracking::coarse::CoarseTracker;
use crate::tracking::frame::ImageFrame;
use crate::tracking::keyframe_decision::KeyframeSelector;
use crate::tracking::result::TrackingSnapshot;
use crate::tracking::state::TrackingState;

/// Blend factor for the running coarse RMSE (higher = slower to adapt).
const RMSE_BLEND: f64 = 0.7;

/// The tracking stage.
pub struct Tracker {
    settings: TrackingSettings,
    shared: Arc<SharedState>,
    pipeline: Arc<FramePipeline>,

    coarse: Box<dyn CoarseTracker>,
    bootstrapper: Box<dyn Bootstrapper>,
    gravity: Box<dyn GravityInitializer>,

    selector: KeyframeSelector,

    /// Samples accumulated since startup, fed to the gravity initializer
    /// until it produces an estimate.
    startup_imu: Vec<ImuSample>,

    /// Gravity-aligned pose of the first frame; identity until the
    /// initializer reports.
    first_pose: SE3,
    gravity_done: bool,

    /// Running coarse RMSE used by the tracking-loss gate.
    last_rmse: f64,

    pub state: TrackingState,
}

impl Tracker {
    pub fn new(
        settings: TrackingSettings,
        shared: Arc<SharedState>,
        pipeline: Arc<FramePipeline>,
        coarse: Box<dyn CoarseTracker>,
        bootstrapper: Box<dyn Bootstrapper>,
        gravity: Box<dyn GravityInitializer>,
    ) -> Self {
        let selector = KeyframeSelector::new(&settings);
        Self {
            settings,
            shared,
            pipeline,
            coarse,
            bootstrapper,
            gravity,
            selector,
            startup_imu: Vec::new(),
            first_pose: SE3::identity(),
            gravity_done: false,
            last_rmse: 0.0,
            state: TrackingState::NotInitialized,
        }
    }

    /// Process one incoming image. Appends the shell, runs bootstrap or
    /// coarse tracking, and submits the frame for mapping.
    pub fn process_frame(
        &mut self,
        image: ImageFrame,
        incoming_id: i64,
        imu_samples: &[ImuSample],
    ) -> Result<TrackingSnapshot> {
        if self.shared.is_lost() {
            warn!("[Tracker] frame {incoming_id} ignored: tracking is lost");
            self.state = TrackingState::Lost;
            return Ok(TrackingSnapshot {
                state: TrackingState::Lost,
                frame: self
                    .shared
                    .history
                    .read()
                    .last()
                    .map(|s| s.id)
                    .unwrap_or(crate::window::FrameId(0)),
                cam_to_world: SE3::identity(),
                needs_keyframe: false,
                coarse_rmse: f64::INFINITY,
            });
        }

        let timestamp_ns = image.timestamp_ns;
        let shell = self.shared.history.write().push(incoming_id, timestamp_ns);

        if !self.shared.is_initialized() {
            return self.bootstrap_frame(shell, image, imu_samples);
        }

        let reference = match self.shared.reference() {
            Some(reference) => reference,
            None => {
                // The init keyframe is still in the mapping queue; this can
                // only happen right after bootstrap in pipelined mode.
                self.pipeline.wait_until_idle();
                match self.shared.reference() {
                    Some(reference) => reference,
                    None => bail!("no tracking reference after initialization"),
                }
            }
        };

        let result = match self.coarse.track(&reference, &image, None) {
            Some(result) => result,
            None => {
                warn!("[Tracker] coarse alignment failed on frame {incoming_id}; lost");
                self.declare_lost();
                return Ok(self.lost_snapshot(shell));
            }
        };

        let rmse = result.finest_residual();
        if !rmse.is_finite()
            || (self.last_rmse > 0.0 && rmse > self.settings.lost_chi2_factor * self.last_rmse)
        {
            warn!(
                "[Tracker] residual {rmse:.3} vs running {:.3} on frame {incoming_id}; lost",
                self.last_rmse
            );
            self.declare_lost();
            return Ok(self.lost_snapshot(shell));
        }
        self.last_rmse = if self.last_rmse > 0.0 {
            RMSE_BLEND * self.last_rmse + (1.0 - RMSE_BLEND) * rmse
        } else {
            rmse
        };

        let cam_to_ref = result.frame_to_ref.clone();
        let cam_to_world = reference.cam_to_world.compose(&cam_to_ref);
        {
            let mut history = self.shared.history.write();
            let entry = history.get_mut(shell).expect("shell just appended");
            entry.cam_to_ref = cam_to_ref;
            entry.cam_to_world = cam_to_world.clone();
            entry.tracking_ref = Some(reference.shell);
        }

        let needs_keyframe = self.selector.should_promote(&result);
        debug!(
            "[Tracker] frame {incoming_id}: rmse {rmse:.3}, flow {:.2}, kf={}",
            result.flow, needs_keyframe
        );

        self.pipeline.submit(TrackedFrame {
            shell,
            image,
            cam_to_world: cam_to_world.clone(),
            needs_keyframe,
            imu_samples: imu_samples.to_vec(),
            bootstrap: None,
        });

        self.state = TrackingState::Ok;
        Ok(TrackingSnapshot {
            state: TrackingState::Ok,
            frame: shell,
            cam_to_world,
            needs_keyframe,
            coarse_rmse: rmse,
        })
    }

    /// Feed the bootstrap stage until it produces an initial map or fails.
    fn bootstrap_frame(
        &mut self,
        shell: crate::window::FrameId,
        image: ImageFrame,
        imu_samples: &[ImuSample],
    ) -> Result<TrackingSnapshot> {
        if !self.gravity_done {
            self.startup_imu.extend_from_slice(imu_samples);
            if let Some(estimate) = self.gravity.estimate(&self.startup_imu) {
                info!(
                    "[Tracker] gravity initialized, scale {:.3}",
                    estimate.scale
                );
                self.first_pose = estimate.world_from_first;
                self.gravity_done = true;
                self.startup_imu.clear();
            }
        }

        match self.bootstrapper.feed(&image) {
            BootstrapProgress::NeedMoreFrames => Ok(TrackingSnapshot {
                state: TrackingState::NotInitialized,
                frame: shell,
                cam_to_world: self.first_pose.clone(),
                needs_keyframe: false,
                coarse_rmse: 0.0,
            }),
            BootstrapProgress::Failed => {
                warn!("[Tracker] bootstrap gave up; init failed");
                self.shared.set_init_failed();
                Ok(TrackingSnapshot {
                    state: TrackingState::NotInitialized,
                    frame: shell,
                    cam_to_world: self.first_pose.clone(),
                    needs_keyframe: false,
                    coarse_rmse: 0.0,
                })
            }
            BootstrapProgress::Ready(result) => {
                let cam_to_world = self.first_pose.compose(&result.cam_to_world);
                {
                    let mut history = self.shared.history.write();
                    let entry = history.get_mut(shell).expect("shell just appended");
                    entry.cam_to_world = cam_to_world.clone();
                }
                info!(
                    "[Tracker] bootstrap ready with {} seeds; promoting frame {shell}",
                    result.seeds.len()
                );

                self.pipeline.submit(TrackedFrame {
                    shell,
                    image,
                    cam_to_world: cam_to_world.clone(),
                    needs_keyframe: true,
                    imu_samples: imu_samples.to_vec(),
                    bootstrap: Some(*result),
                });

                self.shared.set_initialized();
                self.selector.reset();
                self.state = TrackingState::Ok;
                Ok(TrackingSnapshot {
                    state: TrackingState::Ok,
                    frame: shell,
                    cam_to_world,
                    needs_keyframe: true,
                    coarse_rmse: 0.0,
                })
            }
        }
    }

    fn declare_lost(&mut self) {
        self.shared.set_lost();
        self.state = TrackingState::Lost;
    }

    fn lost_snapshot(&self, shell: crate::window::FrameId) -> TrackingSnapshot {
        TrackingSnapshot {
            state: TrackingState::Lost,
            frame: shell,
            cam_to_world: SE3::identity(),
            needs_keyframe: false,
            coarse_rmse: f64::INFINITY,
        }
    }
}
