//! FrameViewer - display side of playback

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

use contracts::FrameSet;
use tracing::{debug, info};

use crate::control::PlayerControl;

/// Display of frame sets
///
/// `run` owns the designated display thread and returns when the viewer
/// closes or `stop` is called. `show` is called from the processing thread.
pub trait FrameViewer: Send + Sync {
    /// Display the frame set at `index`
    fn show(&self, index: usize, set: &FrameSet);

    /// Render loop; input handling maps onto `control`
    fn run(&self, control: &PlayerControl);

    /// Make `run` return
    fn stop(&self);
}

/// Viewer without a display: logs each frame set, `run` blocks until stopped
#[derive(Debug, Default)]
pub struct HeadlessViewer {
    stopped: Mutex<bool>,
    cv: Condvar,
    shown: AtomicU64,
    last: Mutex<Option<usize>>,
}

impl HeadlessViewer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame sets shown so far
    pub fn shown(&self) -> u64 {
        self.shown.load(Ordering::Relaxed)
    }

    /// Index of the last frame set shown
    pub fn last_index(&self) -> Option<usize> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrameViewer for HeadlessViewer {
    fn show(&self, index: usize, set: &FrameSet) {
        self.shown.fetch_add(1, Ordering::Relaxed);
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(index);
        debug!(index, ts = ?set.timestamp(), filled = set.filled(), "frame set shown");
    }

    fn run(&self, _control: &PlayerControl) {
        let stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let _stopped = self
            .cv
            .wait_while(stopped, |s| !*s)
            .unwrap_or_else(PoisonError::into_inner);
        info!(shown = self.shown(), "headless viewer stopped");
    }

    fn stop(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cv.notify_all();
    }
}
