//! TuneHub - music search, playback queue and local media cache.
//!
//! Re-exports all modules for use by the binary target.

// Core engine (cache, history, queue, lyrics, player)
pub mod core;

// App modules
pub mod cli;
pub mod config;

pub use core::{
    CoreError, HistoryLedger, LyricsTimeline, MediaCacheStore, PlayMode, PlaybackQueue, Player,
    Preferences, Quality, TrackRef,
};
