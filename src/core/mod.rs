//! Core engine: media cache, history, queue, lyrics and the player.
//!
//! Nothing here prints or parses arguments; the binary wires it up.

pub mod assets;
pub mod batch;
pub mod error;
pub mod history;
pub mod http;
pub mod lyrics;
pub mod media_cache;
pub mod persist;
pub mod player;
pub mod prefs;
pub mod queue;
pub mod resolver;
pub mod track;
pub mod workers;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{CoreError, Result};
pub use history::{HistoryEntry, HistoryLedger};
pub use lyrics::{CueEvent, LyricsCue, LyricsTimeline, ManualClock, PlaybackClock, WallClock};
pub use media_cache::{AssetKind, CacheKey, MediaCacheStore};
pub use player::{NowPlaying, Player, PlayerConfig, PlayerDeps};
pub use prefs::Preferences;
pub use queue::{PlayMode, PlaybackQueue};
pub use resolver::{ContentResolver, HttpResolver, Toplist};
pub use track::{Quality, TrackInfo, TrackRef};
pub use workers::Workers;
