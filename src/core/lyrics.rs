//! Time-synced lyrics (LRC).
//!
//! [`LyricsTimeline::parse`] turns LRC text into cues sorted by start time.
//! A line may carry several tags (`[00:12.30][01:40.00]chorus`), producing one
//! cue per tag with the same text. Metadata tags (`[ti:...]`, `[ar:...]`) and
//! lines without text are skipped.
//!
//! Playback sync is split in two:
//! - [`LyricsSync`]: pure state, reports when the active cue changes
//! - [`LyricsTicker`]: thread that polls a [`PlaybackClock`] and sends
//!   [`CueEvent`]s until stopped
//!
//! Each ticker carries a generation number. The owner bumps its generation on
//! every track change and ignores events from older generations; stopping a
//! ticker joins its thread, so nothing is sent after `stop()` returns.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, trace, warn};
use regex::Regex;

/// Default clock poll interval
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

static TIME_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d+):(\d{2})(?:\.(\d{1,3}))?\]").expect("time tag pattern is valid")
});

/// One lyric line with its start time in seconds
#[derive(Debug, Clone, PartialEq)]
pub struct LyricsCue {
    pub time: f64,
    pub text: String,
}

/// Cues sorted ascending by time (stable for equal times)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LyricsTimeline {
    cues: Vec<LyricsCue>,
}

impl LyricsTimeline {
    pub fn parse(raw: &str) -> Self {
        let mut cues = Vec::new();

        for line in raw.lines() {
            let times: Vec<f64> = TIME_TAG
                .captures_iter(line)
                .filter_map(|caps| {
                    let minutes: f64 = caps.get(1)?.as_str().parse().ok()?;
                    let seconds: f64 = caps.get(2)?.as_str().parse().ok()?;
                    let millis = caps.get(3).map_or(0.0, |m| fraction_millis(m.as_str()));
                    Some(minutes * 60.0 + seconds + millis / 1000.0)
                })
                .collect();
            if times.is_empty() {
                continue;
            }

            let text = TIME_TAG.replace_all(line, "");
            let text = text.trim();
            if text.is_empty() {
                continue;
            }

            cues.extend(times.into_iter().map(|time| LyricsCue {
                time,
                text: text.to_string(),
            }));
        }

        // Vec::sort_by is stable
        cues.sort_by(|a, b| a.time.total_cmp(&b.time));
        trace!("Parsed {} lyric cues", cues.len());
        Self { cues }
    }

    pub fn cues(&self) -> &[LyricsCue] {
        &self.cues
    }

    pub fn get(&self, index: usize) -> Option<&LyricsCue> {
        self.cues.get(index)
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// Index of the last cue starting at or before `position`
    pub fn active_cue_index(&self, position: f64) -> Option<usize> {
        if position.is_nan() {
            return None;
        }
        self.cues.iter().rposition(|cue| cue.time <= position)
    }
}

/// "5" -> 500 ms, "05" -> 50 ms, "050" -> 50 ms
fn fraction_millis(digits: &str) -> f64 {
    let padded = format!("{:0<3}", digits);
    padded.parse().unwrap_or(0.0)
}

/// Tracks the active cue and reports changes only
#[derive(Debug, Clone)]
pub struct LyricsSync {
    timeline: Arc<LyricsTimeline>,
    active: Option<usize>,
}

impl LyricsSync {
    pub fn new(timeline: Arc<LyricsTimeline>) -> Self {
        Self { timeline, active: None }
    }

    pub fn timeline(&self) -> &LyricsTimeline {
        &self.timeline
    }

    pub fn active(&self) -> Option<usize> {
        self.active
    }

    pub fn active_cue(&self) -> Option<&LyricsCue> {
        self.active.and_then(|i| self.timeline.get(i))
    }

    /// Feed a clock position; true when the active cue changed
    pub fn update(&mut self, position: f64) -> bool {
        let index = self.timeline.active_cue_index(position);
        if index == self.active {
            return false;
        }
        self.active = index;
        true
    }
}

/// Source of the current playback position
pub trait PlaybackClock: Send + Sync {
    /// Seconds since the start of the track
    fn position(&self) -> f64;
}

/// Externally driven clock (audio backend callbacks, tests)
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, position: f64) {
        self.bits.store(position.to_bits(), Ordering::Release);
    }
}

impl PlaybackClock for ManualClock {
    fn position(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

#[derive(Debug)]
struct WallState {
    started: Option<Instant>,
    offset: f64,
}

/// Monotonic clock that can be paused and seeked
#[derive(Debug)]
pub struct WallClock {
    state: Mutex<WallState>,
}

impl WallClock {
    /// Paused clock at position 0
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WallState { started: None, offset: 0.0 }),
        }
    }

    /// Clock already running from position 0
    pub fn started() -> Self {
        let clock = Self::new();
        clock.resume();
        clock
    }

    pub fn resume(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.started.is_none() {
            state.started = Some(Instant::now());
        }
    }

    pub fn pause(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(started) = state.started.take() {
            state.offset += started.elapsed().as_secs_f64();
        }
    }

    pub fn seek(&self, position: f64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.offset = position.max(0.0);
        if state.started.is_some() {
            state.started = Some(Instant::now());
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).started.is_some()
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for WallClock {
    fn position(&self) -> f64 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.offset + state.started.map_or(0.0, |s| s.elapsed().as_secs_f64())
    }
}

/// Message from a running ticker
#[derive(Debug, Clone, PartialEq)]
pub enum CueEvent {
    Changed {
        generation: u64,
        index: Option<usize>,
        time: f64,
        text: Option<String>,
    },
}

impl CueEvent {
    pub fn generation(&self) -> u64 {
        match self {
            CueEvent::Changed { generation, .. } => *generation,
        }
    }
}

/// Background poller bound to one track
pub struct LyricsTicker {
    generation: u64,
    stop_tx: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl LyricsTicker {
    pub fn spawn(
        timeline: Arc<LyricsTimeline>,
        clock: Arc<dyn PlaybackClock>,
        generation: u64,
        interval: Duration,
        events: Sender<CueEvent>,
    ) -> Self {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let running = Arc::new(AtomicBool::new(true));

        let spawned = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name(format!("tunehub-lyrics-{}", generation))
                .spawn(move || {
                    run_ticker(LyricsSync::new(timeline), clock, generation, interval, stop_rx, events);
                    running.store(false, Ordering::Release);
                })
        };

        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Lyrics ticker not started: {}", e);
                running.store(false, Ordering::Release);
                None
            }
        };

        debug!("Lyrics ticker {} started", generation);
        Self {
            generation,
            stop_tx: Some(stop_tx),
            handle,
            running,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop polling and wait for the thread; idempotent
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the channel and wakes the thread
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!("Lyrics ticker {} stopped", self.generation);
        }
    }
}

impl Drop for LyricsTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_ticker(
    mut sync: LyricsSync,
    clock: Arc<dyn PlaybackClock>,
    generation: u64,
    interval: Duration,
    stop: Receiver<()>,
    events: Sender<CueEvent>,
) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        let position = clock.position();
        if !sync.update(position) {
            continue;
        }

        let event = CueEvent::Changed {
            generation,
            index: sync.active(),
            time: position,
            text: sync.active_cue().map(|cue| cue.text.clone()),
        };
        if events.send(event).is_err() {
            // Receiver gone, nobody is listening
            break;
        }
    }
}
