//! FramePipeline - the tracking→mapping queue.
//!
//! A bounded channel keeps the latency-critical tracking path decoupled
//! from mapping while preserving strict submission order. Backpressure is
//! explicit: once the backlog reaches the catch-up threshold, a latch
//! forces the next dequeued frame to keyframe status so mapping can shed
//! drift instead of queueing it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::config::PipelineSettings;

use super::messages::TrackedFrame;

/// Result of one mapping-side dequeue attempt.
pub enum Drained {
    Frame(Box<TrackedFrame>),
    Timeout,
    Closed,
}

/// Bounded frame queue with catch-up backpressure and idle tracking.
pub struct FramePipeline {
    sender: Sender<Box<TrackedFrame>>,
    receiver: Receiver<Box<TrackedFrame>>,

    /// Set when the backlog reached the catch-up threshold; consumed by the
    /// mapper on its next dequeue.
    force_keyframe: AtomicBool,

    /// Frames submitted but not yet fully mapped (queued + in cycle).
    in_flight: AtomicUsize,

    force_threshold: usize,
}

impl FramePipeline {
    pub fn new(settings: &PipelineSettings) -> Self {
        let (sender, receiver) = bounded(settings.max_backlog);
        Self {
            sender,
            receiver,
            force_keyframe: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            force_threshold: settings.force_keyframe_backlog,
        }
    }

    /// Enqueue a tracked frame. Blocks only while the bounded queue is at
    /// capacity (mapping is draining it). Latches the catch-up override
    /// when the backlog reaches the threshold.
    pub fn submit(&self, frame: TrackedFrame) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.sender
            .send(Box::new(frame))
            .expect("mapping side dropped the queue");

        if self.receiver.len() >= self.force_threshold
            && !self.force_keyframe.swap(true, Ordering::SeqCst)
        {
            debug!(
                "[Pipeline] backlog {} >= {}, forcing next frame to keyframe",
                self.receiver.len(),
                self.force_threshold
            );
        }
    }

    /// Mapping-side dequeue with timeout so the worker can poll shutdown.
    /// Frames come out strictly in submission order.
    pub fn drain(&self, timeout: Duration) -> Drained {
        match self.receiver.recv_timeout(timeout) {
            Ok(frame) => Drained::Frame(frame),
            Err(RecvTimeoutError::Timeout) => Drained::Timeout,
            Err(RecvTimeoutError::Disconnected) => Drained::Closed,
        }
    }

    /// Consume the catch-up latch. Returns true at most once per latch.
    pub fn take_forced_keyframe(&self) -> bool {
        self.force_keyframe.swap(false, Ordering::SeqCst)
    }

    /// Called by the mapper after fully finishing one frame.
    pub fn mark_done(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "mark_done without matching submit");
    }

    /// Current queue length (excludes the frame being processed).
    pub fn backlog(&self) -> usize {
        self.receiver.len()
    }

    /// Block until the queue is empty and no frame is mid-cycle. Used to
    /// force synchronous operation when pipelining is disabled.
    pub fn wait_until_idle(&self) {
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SE3;
    use crate::tracking::frame::ImageFrame;
    use crate::window::FrameId;

    fn test_frame(id: u64) -> TrackedFrame {
        TrackedFrame {
            shell: FrameId(id),
            image: ImageFrame::new(2, 2, vec![0.0; 4], id * 1000, 1.0),
            cam_to_world: SE3::identity(),
            needs_keyframe: false,
            imu_samples: Vec::new(),
            bootstrap: None,
        }
    }

    fn settings(max_backlog: usize, force_at: usize) -> PipelineSettings {
        PipelineSettings {
            max_backlog,
            force_keyframe_backlog: force_at,
            pipelined: true,
        }
    }

    #[test]
    fn test_preserves_submission_order() {
        let pipeline = FramePipeline::new(&settings(16, 16));
        for i in 0..10 {
            pipeline.submit(test_frame(i));
        }
        for i in 0..10 {
            match pipeline.drain(Duration::from_millis(10)) {
                Drained::Frame(f) => assert_eq!(f.shell, FrameId(i)),
                _ => panic!("expected frame {i}"),
            }
            pipeline.mark_done();
        }
        assert!(matches!(
            pipeline.drain(Duration::from_millis(1)),
            Drained::Timeout
        ));
    }

    #[test]
    fn test_backlog_bounded_by_capacity() {
        let pipeline = FramePipeline::new(&settings(4, 3));
        for i in 0..4 {
            pipeline.submit(test_frame(i));
        }
        assert_eq!(pipeline.backlog(), 4);
        // A fifth submit would block; the bounded channel is the cap.
        assert!(pipeline.sender.is_full());
    }

    #[test]
    fn test_catch_up_latch_fires_at_threshold() {
        let pipeline = FramePipeline::new(&settings(8, 3));
        pipeline.submit(test_frame(0));
        pipeline.submit(test_frame(1));
        assert!(!pipeline.take_forced_keyframe());

        pipeline.submit(test_frame(2));
        assert!(pipeline.take_forced_keyframe());
        // Latch is consumed, not sticky.
        assert!(!pipeline.take_forced_keyframe());
    }

    #[test]
    fn test_wait_until_idle_blocks_until_done() {
        use std::sync::Arc;

        let pipeline = Arc::new(FramePipeline::new(&settings(8, 8)));
        pipeline.submit(test_frame(0));
        pipeline.submit(test_frame(1));

        let worker = {
            let pipeline = Arc::clone(&pipeline);
            std::thread::spawn(move || {
                while let Drained::Frame(_) = pipeline.drain(Duration::from_millis(50)) {
                    std::thread::sleep(Duration::from_millis(5));
                    pipeline.mark_done();
                }
            })
        };

        pipeline.wait_until_idle();
        assert_eq!(pipeline.backlog(), 0);
        worker.join().unwrap();
    }
}
