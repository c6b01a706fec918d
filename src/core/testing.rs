//! In-memory doubles for resolver and byte transport.

use std::collections::{BTreeMap, HashSet};
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use uuid::Uuid;

use crate::core::error::{CoreError, Result};
use crate::core::media_cache::ByteSource;
use crate::core::resolver::ContentResolver;
use crate::core::track::{Quality, TrackInfo, TrackRef};

pub fn scratch_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tunehub_{}_{}", prefix, Uuid::new_v4().simple()))
}

/// Serves every `mem://` URL with its own bytes; URLs can be made to fail
#[derive(Default)]
pub struct MemorySource {
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl MemorySource {
    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn heal(&self, url: &str) {
        self.failing.lock().unwrap().remove(url);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ByteSource for MemorySource {
    fn open(&self, url: &str, _timeout: Duration) -> Result<Box<dyn Read + Send>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(url) {
            return Err(CoreError::FetchFailed(format!("{}: timed out", url)));
        }
        if !url.starts_with("mem://") {
            return Err(CoreError::NotFound(url.to_string()));
        }
        Ok(Box::new(Cursor::new(url.as_bytes().to_vec())))
    }
}

struct FakeTrack {
    info: TrackInfo,
    lyrics: Option<String>,
}

/// Resolver over a fixed catalogue
#[derive(Default)]
pub struct FakeResolver {
    tracks: BTreeMap<(String, String), FakeTrack>,
    info_calls: AtomicUsize,
}

impl FakeResolver {
    pub fn with_track(mut self, platform: &str, id: &str, title: &str, lyrics: Option<&str>) -> Self {
        let info = TrackInfo {
            track: TrackRef::new(platform, id, title, "Artist"),
            album: Some("Album".to_string()),
            cover_url: Some(cover_url(platform, id)),
        };
        self.tracks.insert(
            (platform.to_string(), id.to_string()),
            FakeTrack { info, lyrics: lyrics.map(str::to_string) },
        );
        self
    }

    pub fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    fn find(&self, platform: &str, id: &str) -> Result<&FakeTrack> {
        self.tracks
            .get(&(platform.to_string(), id.to_string()))
            .ok_or_else(|| CoreError::NotFound(format!("{}:{}", platform, id)))
    }
}

pub fn stream_url(platform: &str, id: &str, quality: Quality) -> String {
    format!("mem://audio/{}/{}/{}", platform, id, quality)
}

pub fn cover_url(platform: &str, id: &str) -> String {
    format!("mem://cover/{}/{}", platform, id)
}

impl ContentResolver for FakeResolver {
    fn search(&self, keyword: &str, platform: Option<&str>) -> Result<Vec<TrackRef>> {
        if keyword.trim().is_empty() {
            return Err(CoreError::InvalidInput("empty search keyword".to_string()));
        }
        Ok(self
            .tracks
            .values()
            .map(|t| &t.info.track)
            .filter(|t| platform.is_none_or(|p| t.platform == p))
            .filter(|t| t.title.contains(keyword.trim()))
            .cloned()
            .collect())
    }

    fn resolve_info(&self, platform: &str, id: &str) -> Result<TrackInfo> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.find(platform, id)?.info.clone())
    }

    fn resolve_stream_url(&self, platform: &str, id: &str, quality: Quality) -> Result<String> {
        self.find(platform, id)?;
        Ok(stream_url(platform, id, quality))
    }

    fn resolve_lyrics_text(&self, platform: &str, id: &str) -> Result<Option<String>> {
        Ok(self.find(platform, id)?.lyrics.clone())
    }

    fn resolve_cover_url(&self, platform: &str, id: &str) -> Result<Option<String>> {
        Ok(self.find(platform, id)?.info.cover_url.clone())
    }

    fn resolve_playlist(&self, platform: &str, _id: &str) -> Result<Vec<TrackRef>> {
        Ok(self
            .tracks
            .values()
            .map(|t| t.info.track.clone())
            .filter(|t| t.platform == platform)
            .collect())
    }
}
