//! Durable media cache: audio, lyrics and cover art on local disk.
//!
//! Layout: `<root>/<platform>/<artist>/<album>/<title>/{song.mp3|song.flac, lyrics.lrc, cover.jpg}`
//!
//! Every path segment comes from untrusted metadata and is sanitized on its
//! own. Sanitization is lossy on purpose: two tracks whose metadata sanitizes
//! to the same strings share one directory. The tree stays human-browsable.
//!
//! # Guarantees
//!
//! - **Idempotent**: an existing final path is a cache hit, no network call.
//! - **Atomic publish**: bytes stream into a hidden `.part` sibling, which is
//!   fsynced and renamed onto the final path only after the body completed.
//!   Failed or timed-out transfers delete the `.part` file.
//! - **Single-flight**: concurrent requests for one path share a single
//!   transfer and all receive its result. Distinct paths never block each
//!   other.
//!
//! Entries are never evicted.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::core::error::{CoreError, Result};
use crate::core::http;
use crate::core::persist;
use crate::core::track::{Quality, TrackInfo};

/// Characters rejected by Windows or Unix filesystems
const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const PLACEHOLDER_PLATFORM: &str = "未知平台";
const PLACEHOLDER_ARTIST: &str = "未知歌手";
const PLACEHOLDER_ALBUM: &str = "未知专辑";
const PLACEHOLDER_TITLE: &str = "未知歌曲";

const COPY_CHUNK: usize = 64 * 1024;

/// Make one path segment filesystem-safe.
///
/// Illegal and control characters become `_`, surrounding whitespace is
/// trimmed, and an empty result falls back to `placeholder`. Segments made
/// only of dots are replaced so they cannot walk out of the cache root.
pub fn sanitize_segment(value: &str, placeholder: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|c| if ILLEGAL_CHARS.contains(&c) || (c as u32) < 0x20 { '_' } else { c })
        .collect();
    let trimmed = replaced.trim();

    if trimmed.is_empty() {
        placeholder.to_string()
    } else if trimmed.chars().all(|c| c == '.') {
        "_".repeat(trimmed.len())
    } else {
        trimmed.to_string()
    }
}

/// Sanitized directory key for one track
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    platform: String,
    artist: String,
    album: String,
    title: String,
}

impl CacheKey {
    pub fn new(platform: &str, artist: &str, album: &str, title: &str) -> Self {
        Self {
            platform: sanitize_segment(platform, PLACEHOLDER_PLATFORM),
            artist: sanitize_segment(artist, PLACEHOLDER_ARTIST),
            album: sanitize_segment(album, PLACEHOLDER_ALBUM),
            title: sanitize_segment(title, PLACEHOLDER_TITLE),
        }
    }

    pub fn from_info(info: &TrackInfo) -> Self {
        Self::new(
            &info.track.platform,
            &info.track.artist,
            info.album.as_deref().unwrap_or_default(),
            &info.track.title,
        )
    }

    /// `platform/artist/album/title` relative to the cache root
    pub fn relative_dir(&self) -> PathBuf {
        [&self.platform, &self.artist, &self.album, &self.title]
            .iter()
            .collect()
    }
}

/// Kind of artifact stored under a [`CacheKey`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// Audio stream; quality only changes the extension
    Audio(Quality),
    Lyrics,
    Cover,
}

impl AssetKind {
    pub fn file_name(&self) -> String {
        match self {
            AssetKind::Audio(quality) => format!("song.{}", quality.extension()),
            AssetKind::Lyrics => "lyrics.lrc".to_string(),
            AssetKind::Cover => "cover.jpg".to_string(),
        }
    }
}

/// Transfer timeouts per artifact kind
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub audio_timeout: Duration,
    pub image_timeout: Duration,
    pub text_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            audio_timeout: Duration::from_secs(60),
            image_timeout: Duration::from_secs(30),
            text_timeout: Duration::from_secs(30),
        }
    }
}

impl CacheConfig {
    pub fn timeout_for(&self, kind: AssetKind) -> Duration {
        match kind {
            AssetKind::Audio(_) => self.audio_timeout,
            AssetKind::Cover => self.image_timeout,
            AssetKind::Lyrics => self.text_timeout,
        }
    }
}

/// Byte transport used to fill the cache.
///
/// Read errors on the returned stream are treated as network failures.
pub trait ByteSource: Send + Sync {
    fn open(&self, url: &str, timeout: Duration) -> Result<Box<dyn Read + Send>>;
}

/// HTTP(S) transport
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpSource;

impl ByteSource for HttpSource {
    fn open(&self, url: &str, timeout: Duration) -> Result<Box<dyn Read + Send>> {
        http::open_stream(url, timeout)
    }
}

/// Cache counters for monitoring and tests
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    downloads: AtomicU64,
    failures: AtomicU64,
    coalesced: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Transfers actually started against the byte source
    pub fn downloads(&self) -> u64 {
        self.downloads.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Callers that joined somebody else's in-flight transfer
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.downloads();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }
}

/// One in-flight operation; followers block until the leader completes it
#[derive(Default)]
struct Flight {
    result: Mutex<Option<Result<PathBuf>>>,
    done: Condvar,
}

impl Flight {
    fn complete(&self, result: Result<PathBuf>) {
        let mut slot = self.result.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(result);
        self.done.notify_all();
    }

    fn wait(&self) -> Result<PathBuf> {
        let mut slot = self.result.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            slot = self.done.wait(slot).unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Leader-side cleanup: unregisters the flight and wakes followers even if
/// the transfer panicked.
struct FlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<PathBuf, Arc<Flight>>>,
    path: &'a Path,
    flight: Arc<Flight>,
    result: Option<Result<PathBuf>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(self.path);
        let result = self
            .result
            .take()
            .unwrap_or_else(|| Err(CoreError::StorageFailed("transfer aborted".to_string())));
        self.flight.complete(result);
    }
}

/// Local media cache rooted at a storage directory
pub struct MediaCacheStore {
    root: PathBuf,
    source: Arc<dyn ByteSource>,
    config: CacheConfig,
    in_flight: Mutex<HashMap<PathBuf, Arc<Flight>>>,
    stats: CacheStats,
}

impl MediaCacheStore {
    /// Create a store rooted at `root`. Nothing is created on disk until
    /// the first artifact is written.
    ///
    /// # Arguments
    ///
    /// * `root` - Storage directory; artifacts land in `<root>/<platform>/<artist>/<album>/<title>/`
    /// * `source` - Byte transport used on cache misses
    /// * `config` - Per-kind transfer timeouts (60 s audio, 30 s artwork by default)
    ///
    /// # Example
    /// ```ignore
    /// let store = MediaCacheStore::new(paths.storage_dir(), Arc::new(HttpSource), CacheConfig::default());
    /// let key = CacheKey::from_info(&info);
    /// let path = store.resolve_path(&key, AssetKind::Audio(Quality::Lossless));
    /// let audio = store.fetch_or_download(&path, &url, AssetKind::Audio(Quality::Lossless))?;
    /// ```
    pub fn new(root: impl Into<PathBuf>, source: Arc<dyn ByteSource>, config: CacheConfig) -> Self {
        let root = root.into();
        info!("MediaCacheStore at {}", root.display());
        Self {
            root,
            source,
            config,
            in_flight: Mutex::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }

    /// Store backed by HTTP with default timeouts
    pub fn with_http(root: impl Into<PathBuf>) -> Self {
        Self::new(root, Arc::new(HttpSource), CacheConfig::default())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Derive the final path of an artifact. Pure: never touches the disk.
    pub fn resolve_path(&self, key: &CacheKey, kind: AssetKind) -> PathBuf {
        self.root.join(key.relative_dir()).join(kind.file_name())
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Path of an already cached artifact, if any
    pub fn local_path(&self, key: &CacheKey, kind: AssetKind) -> Option<PathBuf> {
        let path = self.resolve_path(key, kind);
        self.exists(&path).then_some(path)
    }

    /// Return `path` if cached, otherwise download `source_url` into it.
    ///
    /// Concurrent calls for the same `path` share one transfer.
    pub fn fetch_or_download(&self, path: &Path, source_url: &str, kind: AssetKind) -> Result<PathBuf> {
        self.fetch_with(path, kind, || Ok(source_url.to_string()))
    }

    /// Like [`fetch_or_download`](Self::fetch_or_download), but the URL is only
    /// resolved when the artifact is missing.
    pub fn fetch_with<F>(&self, path: &Path, kind: AssetKind, source_url: F) -> Result<PathBuf>
    where
        F: FnOnce() -> Result<String>,
    {
        let timeout = self.config.timeout_for(kind);
        self.single_flight(path, |target| {
            let url = source_url()?;
            self.download(&url, target, timeout)
        })
    }

    /// Write text content unless `path` already exists.
    pub fn save_text(&self, path: &Path, content: &str) -> Result<PathBuf> {
        self.single_flight(path, |target| persist::write_atomic(target, content.as_bytes()))
    }

    pub fn read_text(&self, path: &Path) -> Option<String> {
        match fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Cached lyrics text for `key`
    pub fn read_lyrics(&self, key: &CacheKey) -> Option<String> {
        self.read_text(&self.resolve_path(key, AssetKind::Lyrics))
    }

    fn single_flight<F>(&self, path: &Path, publish: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        if self.exists(path) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            trace!("Cache hit: {}", path.display());
            return Ok(path.to_path_buf());
        }

        let (flight, leader) = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match in_flight.get(path) {
                Some(flight) => (Arc::clone(flight), false),
                None => {
                    let flight = Arc::new(Flight::default());
                    in_flight.insert(path.to_path_buf(), Arc::clone(&flight));
                    (flight, true)
                }
            }
        };

        if !leader {
            self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!("Joining in-flight transfer: {}", path.display());
            return flight.wait();
        }

        let mut guard = FlightGuard {
            in_flight: &self.in_flight,
            path,
            flight,
            result: None,
        };

        // A previous leader may have published between our first check and registration
        let result = if self.exists(path) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            Ok(path.to_path_buf())
        } else {
            match publish(path) {
                Ok(()) => Ok(path.to_path_buf()),
                Err(e) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Cache fill failed for {}: {}", path.display(), e);
                    Err(e)
                }
            }
        };

        guard.result = Some(result.clone());
        result
    }

    fn download(&self, url: &str, target: &Path, timeout: Duration) -> Result<()> {
        persist::ensure_parent(target)?;
        self.stats.downloads.fetch_add(1, Ordering::Relaxed);
        debug!("Downloading {} -> {}", url, target.display());

        let mut reader = self.source.open(url, timeout)?;
        let temp = persist::temp_sibling(target, "part");

        match stream_to_file(&mut reader, &temp) {
            Ok(0) => {
                let _ = fs::remove_file(&temp);
                Err(CoreError::FetchFailed(format!("{}: empty response", url)))
            }
            Ok(bytes) => {
                persist::publish(&temp, target)?;
                info!("Cached {} ({} bytes)", target.display(), bytes);
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&temp);
                Err(e)
            }
        }
    }
}

/// Copy the stream into `temp`, telling network and disk failures apart
fn stream_to_file(reader: &mut dyn Read, temp: &Path) -> Result<u64> {
    let mut file = File::create(temp)?;
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CoreError::FetchFailed(format!("stream interrupted: {}", e))),
        };
        file.write_all(&buf[..n])?;
        total += n as u64;
    }

    file.sync_all()?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use uuid::Uuid;

    fn scratch_root() -> PathBuf {
        std::env::temp_dir().join(format!("tunehub_cache_{}", Uuid::new_v4().simple()))
    }

    /// In-memory source that counts transfers and records their timeouts
    struct FakeSource {
        body: Vec<u8>,
        calls: AtomicUsize,
        timeouts: Mutex<Vec<Duration>>,
        delay: Duration,
        fail: bool,
    }

    impl FakeSource {
        fn new(body: &[u8]) -> Self {
            Self {
                body: body.to_vec(),
                calls: AtomicUsize::new(0),
                timeouts: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
                fail: false,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn timeouts(&self) -> Vec<Duration> {
            self.timeouts.lock().unwrap().clone()
        }
    }

    impl ByteSource for FakeSource {
        fn open(&self, url: &str, timeout: Duration) -> Result<Box<dyn Read + Send>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.timeouts.lock().unwrap().push(timeout);
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            if self.fail {
                return Err(CoreError::FetchFailed(format!("{}: timed out", url)));
            }
            Ok(Box::new(Cursor::new(self.body.clone())))
        }
    }

    /// Yields the first chunk, then blocks until released; errors if told to
    struct GatedReader {
        first: Option<Vec<u8>>,
        rest: Option<Vec<u8>>,
        gate: crossbeam_channel::Receiver<bool>,
    }

    impl Read for GatedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if let Some(first) = self.first.take() {
                buf[..first.len()].copy_from_slice(&first);
                return Ok(first.len());
            }
            if let Some(rest) = self.rest.take() {
                let ok = self.gate.recv().unwrap_or(false);
                if !ok {
                    return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"));
                }
                buf[..rest.len()].copy_from_slice(&rest);
                return Ok(rest.len());
            }
            Ok(0)
        }
    }

    struct GatedSource {
        gate: Mutex<Option<crossbeam_channel::Receiver<bool>>>,
    }

    impl ByteSource for GatedSource {
        fn open(&self, _url: &str, _timeout: Duration) -> Result<Box<dyn Read + Send>> {
            let gate = self.gate.lock().unwrap().take().expect("single use");
            Ok(Box::new(GatedReader {
                first: Some(b"ID3-head".to_vec()),
                rest: Some(b"-tail".to_vec()),
                gate,
            }))
        }
    }

    fn store_with(root: &Path, source: Arc<dyn ByteSource>) -> MediaCacheStore {
        MediaCacheStore::new(root, source, CacheConfig::default())
    }

    #[test]
    fn test_sanitize_segment() {
        assert_eq!(sanitize_segment("AC/DC", "x"), "AC_DC");
        assert_eq!(sanitize_segment("  What?  ", "x"), "What_");
        assert_eq!(sanitize_segment("a\tb\u{1}c", "x"), "a_b_c");
        assert_eq!(sanitize_segment("   ", "未知歌手"), "未知歌手");
        assert_eq!(sanitize_segment("", "未知专辑"), "未知专辑");
        assert_eq!(sanitize_segment("..", "x"), "__");
        assert_eq!(sanitize_segment("...And Justice", "x"), "...And Justice");
    }

    #[test]
    fn test_resolve_path_layout_and_placeholders() {
        let root = scratch_root();
        let store = store_with(&root, Arc::new(FakeSource::new(b"x")));

        let key = CacheKey::new("netease", "周杰伦", "", "晴天");
        let path = store.resolve_path(&key, AssetKind::Audio(Quality::HiRes));
        assert_eq!(
            path,
            root.join("netease").join("周杰伦").join("未知专辑").join("晴天").join("song.flac")
        );
        assert_eq!(
            store.resolve_path(&key, AssetKind::Audio(Quality::High)).file_name().unwrap(),
            "song.mp3"
        );
        assert_eq!(store.resolve_path(&key, AssetKind::Lyrics).file_name().unwrap(), "lyrics.lrc");
        assert_eq!(store.resolve_path(&key, AssetKind::Cover).file_name().unwrap(), "cover.jpg");

        // Pure: nothing created on disk
        assert!(!root.exists());
    }

    #[test]
    fn test_sanitized_collision_shares_path() {
        let store = store_with(&scratch_root(), Arc::new(FakeSource::new(b"x")));
        let a = CacheKey::new("qq", "A/B", "Album", "Song?");
        let b = CacheKey::new("qq", "A:B", " Album ", "Song*");
        assert_eq!(a, b);
        assert_eq!(
            store.resolve_path(&a, AssetKind::Lyrics),
            store.resolve_path(&b, AssetKind::Lyrics)
        );
    }

    #[test]
    fn test_dot_segments_stay_inside_root() {
        let root = scratch_root();
        let store = store_with(&root, Arc::new(FakeSource::new(b"x")));
        let key = CacheKey::new("..", "..", "..", "..");
        let path = store.resolve_path(&key, AssetKind::Cover);
        assert!(path.starts_with(&root));
        assert!(path.components().all(|c| c != std::path::Component::ParentDir));
    }

    #[test]
    fn test_second_fetch_is_cache_hit() {
        let root = scratch_root();
        let source = Arc::new(FakeSource::new(b"audio-bytes"));
        let store = store_with(&root, source.clone());
        let key = CacheKey::new("kuwo", "Artist", "Album", "Title");
        let path = store.resolve_path(&key, AssetKind::Audio(Quality::High));

        let first = store.fetch_or_download(&path, "http://cdn/a.mp3", AssetKind::Audio(Quality::High)).unwrap();
        let second = store.fetch_or_download(&path, "http://cdn/a.mp3", AssetKind::Audio(Quality::High)).unwrap();

        assert_eq!(first, second);
        assert_eq!(source.calls(), 1);
        assert_eq!(store.stats().downloads(), 1);
        assert_eq!(store.stats().hits(), 1);
        assert_eq!(fs::read(&path).unwrap(), b"audio-bytes");
        assert_eq!(store.local_path(&key, AssetKind::Audio(Quality::High)), Some(path));

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_transfer_timeout_follows_asset_kind() {
        let defaults = CacheConfig::default();
        assert_eq!(defaults.audio_timeout, Duration::from_secs(60));
        assert_eq!(defaults.image_timeout, Duration::from_secs(30));

        let root = scratch_root();
        let source = Arc::new(FakeSource::new(b"bytes"));
        let config = CacheConfig {
            audio_timeout: Duration::from_secs(7),
            image_timeout: Duration::from_secs(3),
            text_timeout: Duration::from_secs(1),
        };
        let store = MediaCacheStore::new(&root, source.clone(), config);
        let key = CacheKey::new("kuwo", "Artist", "Album", "Title");

        let audio = store.resolve_path(&key, AssetKind::Audio(Quality::Lossless));
        store.fetch_or_download(&audio, "http://cdn/a.flac", AssetKind::Audio(Quality::Lossless)).unwrap();
        let cover = store.resolve_path(&key, AssetKind::Cover);
        store.fetch_or_download(&cover, "http://cdn/c.jpg", AssetKind::Cover).unwrap();
        // Hits never reach the source
        store.fetch_or_download(&cover, "http://cdn/c.jpg", AssetKind::Cover).unwrap();

        assert_eq!(source.timeouts(), vec![Duration::from_secs(7), Duration::from_secs(3)]);

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_failed_fetch_leaves_no_entry_and_retries() {
        let root = scratch_root();
        let failing = Arc::new(FakeSource { fail: true, ..FakeSource::new(b"") });
        let store = store_with(&root, failing.clone());
        let key = CacheKey::new("kuwo", "A", "B", "C");
        let path = store.resolve_path(&key, AssetKind::Cover);

        let err = store.fetch_or_download(&path, "http://cdn/c.jpg", AssetKind::Cover).unwrap_err();
        assert!(matches!(err, CoreError::FetchFailed(_)));
        assert!(!path.exists());

        // Retry goes to the network again
        let _ = store.fetch_or_download(&path, "http://cdn/c.jpg", AssetKind::Cover);
        assert_eq!(failing.calls(), 2);
        assert_eq!(store.stats().failures(), 2);

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_empty_body_is_not_cached() {
        let root = scratch_root();
        let store = store_with(&root, Arc::new(FakeSource::new(b"")));
        let path = store.resolve_path(&CacheKey::new("p", "a", "b", "c"), AssetKind::Cover);
        assert!(store.fetch_or_download(&path, "http://cdn/empty", AssetKind::Cover).is_err());
        assert!(!path.exists());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_partial_download_never_visible() {
        let root = scratch_root();
        let (release, gate) = crossbeam_channel::bounded(1);
        let store = Arc::new(store_with(
            &root,
            Arc::new(GatedSource { gate: Mutex::new(Some(gate)) }),
        ));
        let path = store.resolve_path(&CacheKey::new("p", "a", "b", "c"), AssetKind::Audio(Quality::High));

        let worker = {
            let store = Arc::clone(&store);
            let path = path.clone();
            thread::spawn(move || store.fetch_or_download(&path, "http://cdn/x", AssetKind::Audio(Quality::High)))
        };

        // Wait for the first chunk to land in the temp file
        let dir = path.parent().unwrap().to_path_buf();
        for _ in 0..500 {
            let has_part = fs::read_dir(&dir)
                .map(|rd| rd.filter_map(|e| e.ok()).any(|e| e.file_name().to_string_lossy().ends_with(".part")))
                .unwrap_or(false);
            if has_part {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(!path.exists(), "final path visible mid-transfer");

        release.send(true).unwrap();
        worker.join().unwrap().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"ID3-head-tail");

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_interrupted_stream_discards_temp() {
        let root = scratch_root();
        let (release, gate) = crossbeam_channel::bounded(1);
        let store = store_with(&root, Arc::new(GatedSource { gate: Mutex::new(Some(gate)) }));
        let path = store.resolve_path(&CacheKey::new("p", "a", "b", "c"), AssetKind::Audio(Quality::High));

        release.send(false).unwrap();
        let err = store.fetch_or_download(&path, "http://cdn/x", AssetKind::Audio(Quality::High)).unwrap_err();
        assert!(matches!(err, CoreError::FetchFailed(_)));
        assert!(!path.exists());
        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 0);

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_concurrent_requests_share_one_download() {
        let root = scratch_root();
        let source = Arc::new(FakeSource {
            delay: Duration::from_millis(100),
            ..FakeSource::new(b"shared")
        });
        let store = Arc::new(store_with(&root, source.clone()));
        let path = store.resolve_path(&CacheKey::new("p", "a", "b", "c"), AssetKind::Cover);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let path = path.clone();
                thread::spawn(move || store.fetch_or_download(&path, "http://cdn/c.jpg", AssetKind::Cover))
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), path);
        }
        assert_eq!(source.calls(), 1);
        assert_eq!(fs::read(&path).unwrap(), b"shared");

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_save_text_is_idempotent() {
        let root = scratch_root();
        let store = store_with(&root, Arc::new(FakeSource::new(b"")));
        let key = CacheKey::new("netease", "A", "B", "C");
        let path = store.resolve_path(&key, AssetKind::Lyrics);

        assert_eq!(store.read_text(&path), None);
        store.save_text(&path, "[00:01.00]first").unwrap();
        store.save_text(&path, "[00:01.00]second").unwrap();
        assert_eq!(store.read_lyrics(&key).as_deref(), Some("[00:01.00]first"));

        let _ = fs::remove_dir_all(&root);
    }
}
