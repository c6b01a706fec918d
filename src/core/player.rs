//! Playback controller: queue, cache, history and lyrics wired together.
//!
//! The player owns the [`PlaybackQueue`] and is driven through `&mut self`,
//! so queue state never needs locking. Shared stores (cache, history,
//! preferences) are `Arc`s and do their own synchronization.
//!
//! # Loading a track
//!
//! 1. [`on_load_start`](Player::on_load_start): stop the lyrics ticker, bump
//!    the generation and the worker epoch (stale prefetches are skipped)
//! 2. resolve metadata, fetch audio through the cache (blocking)
//! 3. fetch lyrics (failures are non-fatal)
//! 4. commit: move the queue pointer, record history, start the ticker
//! 5. queue the cover download on the worker pool
//!
//! Nothing in step 4 happens if step 2 fails, so a failed next/previous
//! leaves the pointer where it was and the track can be retried.
//!
//! # Audio backend hooks
//!
//! There is no decoder here. Whatever plays the file reports through
//! [`on_pause`](Player::on_pause), [`on_resume`](Player::on_resume) and
//! [`on_ended`](Player::on_ended), and exposes its position as a
//! [`PlaybackClock`].

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};

use crate::core::assets;
use crate::core::error::{CoreError, Result};
use crate::core::history::HistoryLedger;
use crate::core::lyrics::{CueEvent, LyricsTicker, LyricsTimeline, PlaybackClock, TICK_INTERVAL};
use crate::core::media_cache::{CacheKey, MediaCacheStore};
use crate::core::prefs::Preferences;
use crate::core::queue::{PlayMode, PlaybackQueue};
use crate::core::resolver::ContentResolver;
use crate::core::track::{Quality, TrackInfo, TrackRef};
use crate::core::workers::Workers;

/// Player construction options
#[derive(Debug, Clone, Copy)]
pub struct PlayerConfig {
    pub quality: Quality,
    pub tick_interval: Duration,
    pub worker_threads: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            quality: Quality::HiRes,
            tick_interval: TICK_INTERVAL,
            worker_threads: 2,
        }
    }
}

/// The loaded track
#[derive(Debug, Clone)]
pub struct NowPlaying {
    /// Queue position; `None` once the entry is removed from the queue
    pub index: Option<usize>,
    pub info: TrackInfo,
    pub audio: PathBuf,
    pub lyrics: Option<Arc<LyricsTimeline>>,
    pub generation: u64,
}

impl NowPlaying {
    pub fn key(&self) -> CacheKey {
        CacheKey::from_info(&self.info)
    }
}

/// Shared collaborators the player is built from
#[derive(Clone)]
pub struct PlayerDeps {
    pub resolver: Arc<dyn ContentResolver>,
    pub cache: Arc<MediaCacheStore>,
    pub history: Arc<HistoryLedger>,
    pub prefs: Arc<Preferences>,
    pub clock: Arc<dyn PlaybackClock>,
}

pub struct Player {
    deps: PlayerDeps,
    config: PlayerConfig,
    queue: PlaybackQueue,
    workers: Workers,
    now_playing: Option<NowPlaying>,
    ticker: Option<LyricsTicker>,
    generation: u64,
    cue_tx: Sender<CueEvent>,
    cue_rx: Receiver<CueEvent>,
}

impl Player {
    pub fn new(deps: PlayerDeps, config: PlayerConfig) -> Self {
        let mode = deps.prefs.mode();
        let workers = Workers::new(config.worker_threads, Arc::new(AtomicU64::new(0)));
        let (cue_tx, cue_rx) = crossbeam_channel::unbounded();
        info!("Player initialized (mode {}, quality {})", mode, config.quality);

        Self {
            deps,
            config,
            queue: PlaybackQueue::new(mode),
            workers,
            now_playing: None,
            ticker: None,
            generation: 0,
            cue_tx,
            cue_rx,
        }
    }

    pub fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    pub fn now_playing(&self) -> Option<&NowPlaying> {
        self.now_playing.as_ref()
    }

    pub fn quality(&self) -> Quality {
        self.config.quality
    }

    /// Switch quality and reload the loaded track's audio through the cache.
    ///
    /// Lyrics, generation and the playback clock are untouched, so the
    /// backend can resume at the same position. On failure the previous
    /// quality and audio stay in effect.
    pub fn set_quality(&mut self, quality: Quality) -> Result<Option<&NowPlaying>> {
        let Some(playing) = self.now_playing.as_ref() else {
            self.config.quality = quality;
            return Ok(None);
        };
        if quality == self.config.quality {
            return Ok(self.now_playing.as_ref());
        }

        info!("Quality {} -> {} for {}", self.config.quality, quality, playing.info.track);
        let audio = assets::fetch_audio(self.deps.resolver.as_ref(), &self.deps.cache, &playing.info, quality)?;
        self.config.quality = quality;

        let playing = self
            .now_playing
            .as_mut()
            .ok_or_else(|| CoreError::InvalidInput("nothing loaded".to_string()))?;
        playing.audio = audio;
        Ok(Some(&*playing))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Lyric cue changes; events from older generations should be ignored
    pub fn cue_events(&self) -> &Receiver<CueEvent> {
        &self.cue_rx
    }

    pub fn is_current(&self, event: &CueEvent) -> bool {
        event.generation() == self.generation && self.ticker.is_some()
    }

    pub fn lyrics_running(&self) -> bool {
        self.ticker.as_ref().is_some_and(LyricsTicker::is_running)
    }

    // --- search & queue ---

    /// Search and remember the keyword
    pub fn search(&self, keyword: &str, platform: Option<&str>) -> Result<Vec<TrackRef>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(CoreError::InvalidInput("empty search keyword".to_string()));
        }
        if let Err(e) = self.deps.prefs.add_search(keyword) {
            warn!("Search history not saved: {}", e);
        }
        self.deps.resolver.search(keyword, platform)
    }

    pub fn enqueue(&mut self, track: TrackRef) -> bool {
        self.queue.append(track)
    }

    pub fn remove_at(&mut self, index: usize) -> Option<TrackRef> {
        let removed = self.queue.remove_at(index)?;
        if let Some(playing) = self.now_playing.as_mut() {
            if playing.info.track.same_track(&removed) {
                debug!("Removed the playing track; pointer now {:?}", self.queue.current());
            }
            playing.index = self.queue.position_of(&playing.info.track.platform, &playing.info.track.id);
        }
        Some(removed)
    }

    pub fn reorder(&mut self, from: usize, to: usize) {
        self.queue.reorder(from, to);
        if let Some(playing) = self.now_playing.as_mut() {
            playing.index = self.queue.position_of(&playing.info.track.platform, &playing.info.track.id);
        }
    }

    /// Empty the queue and stop lyrics
    pub fn clear_queue(&mut self) {
        self.stop_ticker();
        self.queue.clear();
        self.now_playing = None;
    }

    /// Advance the play mode and persist it
    pub fn cycle_mode(&mut self) -> Result<PlayMode> {
        let mode = self.queue.cycle_mode();
        self.deps.prefs.set_mode(mode)?;
        Ok(mode)
    }

    pub fn set_mode(&mut self, mode: PlayMode) -> Result<()> {
        self.queue.set_mode(mode);
        self.deps.prefs.set_mode(mode)
    }

    // --- playback ---

    /// Play a track picked from search results, queueing it if needed
    pub fn play_track(&mut self, track: TrackRef) -> Result<&NowPlaying> {
        let index = match self.queue.position_of(&track.platform, &track.id) {
            Some(index) => index,
            None => {
                self.queue.append(track);
                self.queue.len() - 1
            }
        };
        self.play_at(index)
    }

    /// Load and start the queue entry at `index`
    pub fn play_at(&mut self, index: usize) -> Result<&NowPlaying> {
        let track = self
            .queue
            .get(index)
            .cloned()
            .ok_or_else(|| CoreError::InvalidInput(format!("queue index {} out of range", index)))?;

        self.on_load_start();
        info!("Loading {}", track);

        let info = assets::resolve_info(self.deps.resolver.as_ref(), &track)?;
        let audio = assets::fetch_audio(
            self.deps.resolver.as_ref(),
            &self.deps.cache,
            &info,
            self.config.quality,
        )?;
        let lyrics = assets::fetch_lyrics_lenient(self.deps.resolver.as_ref(), &self.deps.cache, &info)
            .map(|text| Arc::new(LyricsTimeline::parse(&text)))
            .filter(|timeline| !timeline.is_empty());

        // Commit
        self.queue.set_current(index);
        if let Err(e) = self.deps.history.record(&info.track) {
            warn!("History not recorded for {}: {}", info.track, e);
        }
        self.prefetch_cover(&info);

        self.now_playing = Some(NowPlaying {
            index: Some(index),
            info,
            audio,
            lyrics,
            generation: self.generation,
        });
        self.start_ticker();

        self.now_playing
            .as_ref()
            .ok_or_else(|| CoreError::InvalidInput("nothing loaded".to_string()))
    }

    /// Next entry per play mode; `Ok(None)` when playback should stop
    pub fn play_next(&mut self) -> Result<Option<&NowPlaying>> {
        match self.queue.select_next() {
            Some(index) => self.play_at(index).map(Some),
            None => {
                debug!("End of queue ({})", self.queue.mode());
                Ok(None)
            }
        }
    }

    /// Previous entry per play mode; `Ok(None)` at the start
    pub fn play_previous(&mut self) -> Result<Option<&NowPlaying>> {
        match self.queue.select_previous() {
            Some(index) => self.play_at(index).map(Some),
            None => Ok(None),
        }
    }

    // --- audio backend hooks ---

    /// A new source is about to load: silence the old track immediately
    pub fn on_load_start(&mut self) {
        self.stop_ticker();
        self.generation += 1;
        self.workers.bump_epoch();
    }

    pub fn on_pause(&mut self) {
        self.stop_ticker();
    }

    pub fn on_resume(&mut self) {
        if self.ticker.is_none() {
            self.start_ticker();
        }
    }

    /// Track finished: stop lyrics, then continue per play mode
    pub fn on_ended(&mut self) -> Result<Option<&NowPlaying>> {
        self.stop_ticker();
        self.play_next()
    }

    fn start_ticker(&mut self) {
        let Some(timeline) = self.now_playing.as_ref().and_then(|p| p.lyrics.clone()) else {
            return;
        };
        self.ticker = Some(LyricsTicker::spawn(
            timeline,
            Arc::clone(&self.deps.clock),
            self.generation,
            self.config.tick_interval,
            self.cue_tx.clone(),
        ));
    }

    fn stop_ticker(&mut self) {
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
    }

    fn prefetch_cover(&self, info: &TrackInfo) {
        if info.cover_url.is_none() {
            return;
        }
        let cache = Arc::clone(&self.deps.cache);
        let info = info.clone();
        self.workers.execute_with_epoch(self.workers.current_epoch(), move || {
            if let Err(e) = assets::fetch_cover(&cache, &info) {
                warn!("Cover prefetch failed for {}: {}", info.track, e);
            }
        });
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}
