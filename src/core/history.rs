//! Play history: a bounded, most-recent-first ledger persisted as JSON.
//!
//! File format (compatible with older builds):
//!
//! ```json
//! [ { "platform": "netease", "id": "42", "name": "Song", "artist": "A", "timestamp": 1718000000000 } ]
//! ```
//!
//! - At most [`MAX_HISTORY`] entries, newest first.
//! - `(platform, id)` appears at most once; replaying moves it to the front.
//! - A missing or unparsable file reads as empty and is rewritten as `[]`.
//!
//! All mutations go through one mutex (read-modify-write), and each write
//! is atomic via [`persist::write_json`].

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::core::persist;
use crate::core::track::TrackRef;

pub const MAX_HISTORY: usize = 100;

/// One played track with its last play time (ms since epoch)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub platform: String,
    pub id: String,
    #[serde(rename = "name", alias = "title", default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    pub timestamp: u64,
}

impl HistoryEntry {
    pub fn from_track(track: &TrackRef, timestamp: u64) -> Self {
        Self {
            platform: track.platform.clone(),
            id: track.id.clone(),
            title: track.title.clone(),
            artist: track.artist.clone(),
            timestamp,
        }
    }

    pub fn track(&self) -> TrackRef {
        TrackRef::new(&self.platform, &self.id, &self.title, &self.artist)
    }

    pub fn is(&self, platform: &str, id: &str) -> bool {
        self.platform == platform && self.id == id
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// How long ago `timestamp` was, relative to `now` (both ms since epoch)
pub fn played_ago(timestamp: u64, now: u64) -> String {
    const MINUTE: u64 = 60_000;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    let diff = now.saturating_sub(timestamp);
    match diff {
        d if d < MINUTE => "刚刚播放".to_string(),
        d if d < HOUR => format!("{}分钟前", d / MINUTE),
        d if d < DAY => format!("{}小时前", d / HOUR),
        d => format!("{}天前", d / DAY),
    }
}

/// File-backed play history
pub struct HistoryLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl HistoryLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries newest first; empty if the file is missing or corrupt
    pub fn list(&self) -> Vec<HistoryEntry> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.load()
    }

    /// Record a play now
    pub fn record(&self, track: &TrackRef) -> Result<()> {
        self.record_at(track, now_millis())
    }

    /// Record a play at an explicit timestamp
    pub fn record_at(&self, track: &TrackRef, timestamp: u64) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.load();

        entries.retain(|e| !e.is(&track.platform, &track.id));
        entries.insert(0, HistoryEntry::from_track(track, timestamp));
        entries.truncate(MAX_HISTORY);

        debug!("History: recorded {} ({} entries)", track, entries.len());
        persist::write_json(&self.path, &entries)
    }

    /// Remove one entry; unknown ids are a no-op
    pub fn remove(&self, platform: &str, id: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.load();
        let before = entries.len();
        entries.retain(|e| !e.is(platform, id));

        if entries.len() == before {
            debug!("History: {}:{} not present", platform, id);
            return Ok(());
        }
        persist::write_json(&self.path, &entries)
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        info!("History cleared");
        persist::write_json(&self.path, &Vec::<HistoryEntry>::new())
    }

    /// Caller must hold `lock`
    fn load(&self) -> Vec<HistoryEntry> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.reset();
                return Vec::new();
            }
            Err(e) => {
                warn!("History unreadable ({}): {}", self.path.display(), e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<HistoryEntry>>(&text) {
            Ok(entries) => normalize(entries),
            Err(e) => {
                warn!("History corrupt ({}), resetting: {}", self.path.display(), e);
                self.reset();
                Vec::new()
            }
        }
    }

    /// Rewrite the file as an empty list; caller must hold `lock`
    fn reset(&self) {
        if let Err(e) = persist::write_json(&self.path, &Vec::<HistoryEntry>::new()) {
            warn!("History reset failed: {}", e);
        }
    }
}

/// First occurrence of each `(platform, id)` wins, capped at [`MAX_HISTORY`]
fn normalize(entries: Vec<HistoryEntry>) -> Vec<HistoryEntry> {
    let before = entries.len();
    let mut seen = HashSet::new();
    let mut entries: Vec<HistoryEntry> = entries
        .into_iter()
        .filter(|e| seen.insert((e.platform.clone(), e.id.clone())))
        .collect();
    entries.truncate(MAX_HISTORY);

    if entries.len() != before {
        debug!("History: normalized {} -> {} entries", before, entries.len());
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use uuid::Uuid;

    fn scratch_ledger() -> (HistoryLedger, PathBuf) {
        let dir = std::env::temp_dir().join(format!("tunehub_history_{}", Uuid::new_v4().simple()));
        (HistoryLedger::new(dir.join("play_history.json")), dir)
    }

    fn track(id: usize) -> TrackRef {
        TrackRef::new("netease", id.to_string(), format!("Song {}", id), "Artist")
    }

    #[test]
    fn test_missing_file_is_created_empty() {
        let (ledger, dir) = scratch_ledger();
        assert!(ledger.list().is_empty());
        assert_eq!(fs::read_to_string(ledger.path()).unwrap().trim(), "[]");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_cap_keeps_newest() {
        let (ledger, dir) = scratch_ledger();
        for i in 0..=MAX_HISTORY {
            ledger.record_at(&track(i), 1_000 + i as u64).unwrap();
        }

        let entries = ledger.list();
        assert_eq!(entries.len(), MAX_HISTORY);
        assert_eq!(entries[0].id, MAX_HISTORY.to_string());
        // Oldest (id 0) evicted
        assert!(entries.iter().all(|e| e.id != "0"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_replay_moves_to_front_once() {
        let (ledger, dir) = scratch_ledger();
        ledger.record_at(&track(1), 10).unwrap();
        ledger.record_at(&track(2), 20).unwrap();
        ledger.record_at(&track(1), 30).unwrap();

        let entries = ledger.list();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "1");
        assert_eq!(entries[0].timestamp, 30);
        assert_eq!(entries[1].id, "2");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_remove_and_clear() {
        let (ledger, dir) = scratch_ledger();
        ledger.record_at(&track(1), 10).unwrap();
        ledger.record_at(&track(2), 20).unwrap();

        ledger.remove("netease", "1").unwrap();
        ledger.remove("netease", "404").unwrap();
        assert_eq!(ledger.list().len(), 1);

        ledger.clear().unwrap();
        assert!(ledger.list().is_empty());
        assert_eq!(fs::read_to_string(ledger.path()).unwrap().trim(), "[]");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corrupt_file_self_heals() {
        let (ledger, dir) = scratch_ledger();
        fs::create_dir_all(&dir).unwrap();
        fs::write(ledger.path(), "{ not json").unwrap();

        assert!(ledger.list().is_empty());
        assert_eq!(fs::read_to_string(ledger.path()).unwrap().trim(), "[]");

        ledger.record_at(&track(5), 50).unwrap();
        assert_eq!(ledger.list().len(), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_legacy_file_format() {
        let (ledger, dir) = scratch_ledger();
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            ledger.path(),
            r#"[{"platform":"qq","id":"9","name":"Old","artist":"B","timestamp":1718000000000}]"#,
        )
        .unwrap();

        let entries = ledger.list();
        assert_eq!(entries[0].title, "Old");
        assert_eq!(entries[0].track(), TrackRef::new("qq", "9", "Old", "B"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_concurrent_records_lose_nothing() {
        let (ledger, dir) = scratch_ledger();
        let ledger = Arc::new(ledger);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || ledger.record_at(&track(i), i as u64).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ledger.list().len(), 16);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_oversized_file_with_duplicates_is_normalized() {
        let (ledger, dir) = scratch_ledger();
        fs::create_dir_all(&dir).unwrap();
        let entries: Vec<HistoryEntry> = (0..150)
            .map(|i| HistoryEntry::from_track(&track(i % 120), 10_000 - i as u64))
            .collect();
        fs::write(ledger.path(), serde_json::to_string(&entries).unwrap()).unwrap();

        let listed = ledger.list();
        assert_eq!(listed.len(), MAX_HISTORY);
        let unique: HashSet<_> = listed.iter().map(|e| (e.platform.clone(), e.id.clone())).collect();
        assert_eq!(unique.len(), listed.len());
        // First occurrence kept
        assert_eq!(listed[0].id, "0");
        assert_eq!(listed[0].timestamp, 10_000);

        // The next write persists the normalized list
        ledger.record_at(&track(500), 20_000).unwrap();
        let on_disk: Vec<HistoryEntry> = serde_json::from_str(&fs::read_to_string(ledger.path()).unwrap()).unwrap();
        assert_eq!(on_disk.len(), MAX_HISTORY);
        assert_eq!(on_disk[0].id, "500");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_played_ago() {
        let now = 10 * 86_400_000;
        assert_eq!(played_ago(now - 30_000, now), "刚刚播放");
        assert_eq!(played_ago(now - 5 * 60_000, now), "5分钟前");
        assert_eq!(played_ago(now - 3 * 3_600_000 - 1, now), "3小时前");
        assert_eq!(played_ago(now - 2 * 86_400_000, now), "2天前");
        // Clock skew reads as just now
        assert_eq!(played_ago(now + 5_000, now), "刚刚播放");
    }
}
