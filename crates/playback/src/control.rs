//! Playback control state shared between the viewer and the processing thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

/// Preset playback rates; `0.0` plays as fast as possible
pub const PLAYBACK_RATES: [f64; 10] = [0.25, 0.5, 0.75, 1.0, 1.5, 2.0, 3.0, 4.0, 8.0, 0.0];

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PlaybackState {
    pub paused: bool,
    /// Pending relative step, consumed by the processing thread
    pub step: isize,
    pub rate_index: usize,
    pub pause_at: Option<usize>,
    pub quit: bool,
}

/// Pause / step / rate / quit controls
///
/// Every mutation notifies the processing thread. The shutdown flag is also
/// readable without taking the lock.
#[derive(Debug)]
pub struct PlayerControl {
    state: Mutex<PlaybackState>,
    cv: Condvar,
    shutdown: AtomicBool,
}

impl PlayerControl {
    /// `rate` is snapped to the closest preset
    pub fn new(rate: f64, paused: bool, pause_at: Option<usize>) -> Self {
        Self {
            state: Mutex::new(PlaybackState {
                paused,
                step: 0,
                rate_index: rate_index(rate),
                pause_at,
                quit: false,
            }),
            cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PlaybackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn toggle_pause(&self) {
        let mut state = self.lock();
        state.paused = !state.paused;
        debug!(paused = state.paused, "toggle pause");
        self.cv.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Pause and step `n` frame sets forward (or back when negative)
    pub fn seek_relative(&self, n: isize) {
        let mut state = self.lock();
        state.paused = true;
        state.step = n;
        self.cv.notify_all();
    }

    /// Move `amount` presets up or down, clamped to the preset list
    pub fn modify_rate(&self, amount: isize) {
        let mut state = self.lock();
        let last = PLAYBACK_RATES.len() as isize - 1;
        state.rate_index = (state.rate_index as isize + amount).clamp(0, last) as usize;
        debug!(rate = PLAYBACK_RATES[state.rate_index], "playback rate");
    }

    /// Current rate, `0.0` for unpaced
    pub fn rate(&self) -> f64 {
        PLAYBACK_RATES[self.lock().rate_index]
    }

    /// Pause automatically once the frame set at `index` is shown
    pub fn pause_at(&self, index: Option<usize>) {
        self.lock().pause_at = index;
    }

    /// Ask every thread to stop
    pub fn quit(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.lock().quit = true;
        self.cv.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Block while paused with no pending step; returns the state to act on
    pub(crate) fn wait_runnable(&self) -> MutexGuard<'_, PlaybackState> {
        let guard = self.lock();
        self.cv
            .wait_while(guard, |s| s.paused && s.step == 0 && !s.quit)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep up to `timeout`, returning early on quit
    pub(crate) fn sleep(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        while !guard.quit {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            guard = self
                .cv
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub(crate) fn notify(&self) {
        self.cv.notify_all();
    }
}

impl Default for PlayerControl {
    fn default() -> Self {
        Self::new(1.0, false, None)
    }
}

fn rate_index(rate: f64) -> usize {
    if rate <= 0.0 || !rate.is_finite() {
        return PLAYBACK_RATES.len() - 1;
    }
    PLAYBACK_RATES
        .iter()
        .enumerate()
        .filter(|(_, r)| **r > 0.0)
        .min_by(|a, b| (a.1 - rate).abs().total_cmp(&(b.1 - rate).abs()))
        .map(|(i, _)| i)
        .unwrap_or(3)
}
