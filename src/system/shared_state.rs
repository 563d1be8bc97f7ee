//! Shared state between the tracking front-end and the mapping worker.
//!
//! Locking discipline:
//! - `window` is the single mapping-side lock; only the mapping worker
//!   takes it for writing, everyone else reads briefly.
//! - `history` is the tracking-side lock; shells are appended under it and
//!   become visible to readers on release.
//! - `reference` is the dedicated swap lock: mapping publishes a whole new
//!   `Arc<TrackingReference>` under it, the tracker clones the `Arc` out.
//!   Neither side ever observes a half-updated reference.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::mapping::report::SessionStats;
use crate::tracking::coarse::TrackingReference;
use crate::window::{FrameHistory, Window};

/// State accessible by both stages.
pub struct SharedState {
    /// The active window. Mapping-side lock.
    pub window: RwLock<Window>,

    /// Append-only frame history. Tracking-side lock.
    pub history: RwLock<FrameHistory>,

    /// Swap lock for the coarse tracker's reference snapshot.
    reference: Mutex<Option<Arc<TrackingReference>>>,

    /// Session statistics, accumulated by the mapping worker.
    pub stats: Mutex<SessionStats>,

    initialized: AtomicBool,
    is_lost: AtomicBool,
    init_failed: AtomicBool,
    shutdown_requested: AtomicBool,
}

impl SharedState {
    pub fn new(window_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            window: RwLock::new(Window::new(window_capacity)),
            history: RwLock::new(FrameHistory::new()),
            reference: Mutex::new(None),
            stats: Mutex::new(SessionStats::default()),
            initialized: AtomicBool::new(false),
            is_lost: AtomicBool::new(false),
            init_failed: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
        })
    }

    /// Current tracking reference; `None` until the first keyframe maps.
    pub fn reference(&self) -> Option<Arc<TrackingReference>> {
        self.reference.lock().clone()
    }

    /// Atomically replace the tracking reference.
    pub fn swap_reference(&self, reference: Arc<TrackingReference>) {
        *self.reference.lock() = Some(reference);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn set_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn is_lost(&self) -> bool {
        self.is_lost.load(Ordering::SeqCst)
    }

    /// Latch tracking loss; terminal for the session.
    pub fn set_lost(&self) {
        self.is_lost.store(true, Ordering::SeqCst);
    }

    pub fn init_failed(&self) -> bool {
        self.init_failed.load(Ordering::SeqCst)
    }

    pub fn set_init_failed(&self) {
        self.init_failed.store(true, Ordering::SeqCst);
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }
}
