//! Player - drives a frame set stream through a Seekable buffer
//!
//! Two threads: the caller's thread runs the viewer's render loop, a
//! processing thread pulls frame sets, paces them and hands them to the
//! viewer. Either side can end playback; the source is closed and the
//! processing thread joined before `run` returns.

use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{FrameSet, FrameSetIter, MultiScanSource, Result, ScanError, SensorDescriptor};
use dispatcher::Dispatcher;
use serde::{Deserialize, Serialize};
use sync_engine::{SeekOutcome, Seekable};
use tracing::{debug, error, info, instrument, warn};

use crate::control::{PlayerControl, PLAYBACK_RATES};
use crate::viewer::FrameViewer;

const DEFAULT_FRAME_PERIOD: Duration = Duration::from_millis(100);

/// Player options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Initial rate, snapped to the closest preset; `0` plays unpaced
    pub rate: f64,
    pub paused: bool,
    pub pause_at: Option<usize>,
    /// Frame sets kept for stepping back
    pub buffer_len: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            rate: 1.0,
            paused: false,
            pause_at: None,
            buffer_len: 50,
        }
    }
}

/// Counters of one playback run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackSummary {
    /// Frame sets handed to the viewer, replays included
    pub shown: u64,
    /// Newly produced frame sets forwarded to the dispatcher
    pub dispatched: u64,
    pub last_index: Option<usize>,
}

pub struct Player {
    control: Arc<PlayerControl>,
    buffer_len: usize,
    dispatcher: Option<Dispatcher>,
}

impl Player {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            control: Arc::new(PlayerControl::new(config.rate, config.paused, config.pause_at)),
            buffer_len: config.buffer_len,
            dispatcher: None,
        }
    }

    /// Forward newly produced frame sets to `dispatcher`
    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Shared controls, for key handlers and other threads
    pub fn control(&self) -> &Arc<PlayerControl> {
        &self.control
    }

    /// Play `source` until it ends or the viewer closes
    ///
    /// Must be called on the thread that may run the viewer. Closes the
    /// source and shuts the dispatcher down before returning.
    #[instrument(name = "player_run", skip_all, fields(sensors = source.sensor_count()))]
    pub fn run(self, source: &dyn MultiScanSource, viewer: &dyn FrameViewer) -> Result<PlaybackSummary> {
        let Player {
            control,
            buffer_len,
            dispatcher,
        } = self;
        let period = base_period(source.metadata());

        let outcome = std::thread::scope(|scope| -> Result<PlaybackSummary> {
            let worker = std::thread::Builder::new()
                .name("playback".into())
                .spawn_scoped(scope, || {
                    let result = process(source, viewer, &control, buffer_len, period, dispatcher.as_ref());
                    viewer.stop();
                    result
                })?;

            info!("starting render loop");
            viewer.run(&control);
            debug!("render loop done");

            // the processing thread may be blocked on a read
            source.close();
            control.quit();
            worker
                .join()
                .unwrap_or_else(|_| Err(ScanError::Other("playback thread panicked".into())))
        });

        if let Some(d) = dispatcher {
            d.shutdown();
        }
        if let Ok(summary) = &outcome {
            info!(shown = summary.shown, dispatched = summary.dispatched, "playback finished");
        }
        outcome
    }
}

/// Fastest nominal frame period among the sensors
fn base_period(sensors: &[SensorDescriptor]) -> Duration {
    sensors
        .iter()
        .map(SensorDescriptor::frame_period)
        .filter(|p| !p.is_zero())
        .min()
        .unwrap_or(DEFAULT_FRAME_PERIOD)
}

fn frame_delay(period: Duration, rate: f64, paused: bool) -> Duration {
    if rate > 0.0 && !paused {
        period.div_f64(rate)
    } else {
        Duration::ZERO
    }
}

/// Frame sets of a source iterator; skips timeouts, keeps the first hard error
struct SetStream<'a> {
    inner: FrameSetIter<'a>,
    control: &'a PlayerControl,
    error: Option<ScanError>,
}

impl Iterator for SetStream<'_> {
    type Item = Arc<FrameSet>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.error.is_none() && !self.control.is_shutdown() {
            match self.inner.next()? {
                Ok(set) => return Some(Arc::new(set)),
                Err(e) if e.is_timeout() => warn!(error = %e, "no data, still waiting"),
                Err(e) => self.error = Some(e),
            }
        }
        None
    }
}

fn process(
    source: &dyn MultiScanSource,
    viewer: &dyn FrameViewer,
    control: &PlayerControl,
    buffer_len: usize,
    period: Duration,
    dispatcher: Option<&Dispatcher>,
) -> Result<PlaybackSummary> {
    let mut sets = SetStream {
        inner: source.iter()?,
        control,
        error: None,
    };
    let mut seekable = Seekable::new(sets.by_ref(), buffer_len);
    let mut summary = PlaybackSummary::default();
    let mut last_shown: Option<Instant> = None;
    // first index never shown before
    let mut fresh_from = 0usize;

    loop {
        let delay = {
            let mut state = control.wait_runnable();
            if state.quit {
                break;
            }
            if state.step != 0 {
                let target = seekable.next_index() as isize + state.step - 1;
                state.step = 0;
                let outcome = match usize::try_from(target) {
                    Ok(target) => seekable.seek(target),
                    Err(_) => SeekOutcome::Evicted,
                };
                observability::record_seek(outcome.as_str());
                match outcome {
                    SeekOutcome::Ready => {}
                    SeekOutcome::Evicted => {
                        debug!(target, "cannot step back that far");
                        continue;
                    }
                    SeekOutcome::Exhausted => break,
                }
            }
            frame_delay(period, PLAYBACK_RATES[state.rate_index], state.paused)
        };

        let index = seekable.next_index();
        let Some(set) = seekable.advance() else {
            break;
        };
        viewer.show(index, &set);
        summary.shown += 1;
        summary.last_index = Some(index);

        if index >= fresh_from {
            fresh_from = index + 1;
            if let Some(d) = dispatcher {
                d.dispatch(Arc::clone(&set));
                summary.dispatched += 1;
            }
        }

        {
            let mut state = control.lock();
            if state.pause_at == Some(index) {
                state.paused = true;
                debug!(index, "auto pause");
            }
        }

        if let Some(prev) = last_shown {
            control.sleep(delay.saturating_sub(prev.elapsed()));
        }
        last_shown = Some(Instant::now());
    }

    drop(seekable);
    if let Some(e) = sets.error.take() {
        error!(error = %e, "playback aborted");
        control.quit();
        return Err(e);
    }
    control.notify();
    Ok(summary)
}
