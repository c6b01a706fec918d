//! Save many tracks into the cache at once (playlist "save all").
//!
//! Each track is one job on the [`Workers`] pool. Audio is required; lyrics
//! and cover are best effort. Results stream back over a channel as jobs
//! finish and are returned in input order.

use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::Sender;
use log::{info, warn};

use crate::core::assets;
use crate::core::error::Result;
use crate::core::media_cache::{AssetKind, CacheKey, MediaCacheStore};
use crate::core::resolver::ContentResolver;
use crate::core::track::{Quality, TrackRef};
use crate::core::workers::Workers;

/// Cached files for one track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedTrack {
    pub audio: PathBuf,
    pub lyrics: Option<PathBuf>,
    pub cover: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub track: TrackRef,
    pub result: Result<SavedTrack>,
}

/// Sent once per finished track
#[derive(Debug, Clone)]
pub struct SaveProgress {
    pub done: usize,
    pub total: usize,
    pub outcome: SaveOutcome,
}

#[derive(Debug, Default)]
pub struct SaveReport {
    pub outcomes: Vec<SaveOutcome>,
}

impl SaveReport {
    pub fn success(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.success()
    }
}

/// Cache audio, lyrics and cover for one track
pub fn save_track(
    resolver: &dyn ContentResolver,
    cache: &MediaCacheStore,
    track: &TrackRef,
    quality: Quality,
) -> Result<SavedTrack> {
    let info = assets::resolve_info(resolver, track)?;
    let audio = assets::fetch_audio(resolver, cache, &info, quality)?;

    assets::fetch_lyrics_lenient(resolver, cache, &info);
    let lyrics = cache.local_path(&CacheKey::from_info(&info), AssetKind::Lyrics);

    let cover = assets::fetch_cover(cache, &info).unwrap_or_else(|e| {
        warn!("Cover not saved for {}: {}", info.track, e);
        None
    });

    Ok(SavedTrack { audio, lyrics, cover })
}

/// Save every track on the pool; blocks until all jobs reported
pub fn save_all(
    resolver: Arc<dyn ContentResolver>,
    cache: Arc<MediaCacheStore>,
    workers: &Workers,
    tracks: Vec<TrackRef>,
    quality: Quality,
    progress: Option<Sender<SaveProgress>>,
) -> SaveReport {
    let total = tracks.len();
    info!("Saving {} tracks ({})", total, quality);

    let (tx, rx) = crossbeam_channel::unbounded::<(usize, SaveOutcome)>();
    for (index, track) in tracks.into_iter().enumerate() {
        let resolver = Arc::clone(&resolver);
        let cache = Arc::clone(&cache);
        let tx = tx.clone();
        workers.execute(move || {
            let result = save_track(resolver.as_ref(), &cache, &track, quality);
            let _ = tx.send((index, SaveOutcome { track, result }));
        });
    }
    drop(tx);

    let mut indexed = Vec::with_capacity(total);
    for (index, outcome) in rx.iter() {
        if let Some(progress) = progress.as_ref() {
            let _ = progress.send(SaveProgress {
                done: indexed.len() + 1,
                total,
                outcome: outcome.clone(),
            });
        }
        indexed.push((index, outcome));
    }
    indexed.sort_by_key(|(index, _)| *index);

    let report = SaveReport {
        outcomes: indexed.into_iter().map(|(_, outcome)| outcome).collect(),
    };
    info!("Saved {} tracks, {} failed", report.success(), report.failed());
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::media_cache::CacheConfig;
    use crate::core::testing::{FakeResolver, MemorySource, cover_url, scratch_dir, stream_url};
    use std::fs;
    use std::sync::atomic::AtomicU64;

    fn setup() -> (Arc<FakeResolver>, Arc<MemorySource>, Arc<MediaCacheStore>, PathBuf) {
        let dir = scratch_dir("batch");
        let resolver = Arc::new(
            FakeResolver::default()
                .with_track("kuwo", "1", "One", Some("[00:01.00]la"))
                .with_track("kuwo", "2", "Two", None)
                .with_track("kuwo", "3", "Three", None),
        );
        let source = Arc::new(MemorySource::default());
        let cache = Arc::new(MediaCacheStore::new(dir.join("storage"), source.clone(), CacheConfig::default()));
        (resolver, source, cache, dir)
    }

    #[test]
    fn test_save_track_writes_all_assets() {
        let (resolver, _source, cache, dir) = setup();
        let saved = save_track(resolver.as_ref(), &cache, &TrackRef::new("kuwo", "1", "", ""), Quality::Lossless).unwrap();

        assert!(saved.audio.ends_with("song.flac"));
        assert_eq!(fs::read_to_string(saved.lyrics.unwrap()).unwrap(), "[00:01.00]la");
        assert_eq!(fs::read(saved.cover.unwrap()).unwrap(), cover_url("kuwo", "1").as_bytes());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_save_all_reports_in_order_with_failures() {
        let (resolver, source, cache, dir) = setup();
        source.fail(&stream_url("kuwo", "2", Quality::High));
        let workers = Workers::new(2, Arc::new(AtomicU64::new(0)));
        let (tx, rx) = crossbeam_channel::unbounded();

        let tracks = resolver.resolve_playlist("kuwo", "any").unwrap();
        let report = save_all(resolver.clone(), cache.clone(), &workers, tracks, Quality::High, Some(tx));

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.success(), 2);
        assert_eq!(report.failed(), 1);
        let ids: Vec<&str> = report.outcomes.iter().map(|o| o.track.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
        assert!(report.outcomes[1].result.is_err());

        let progress: Vec<SaveProgress> = rx.try_iter().collect();
        assert_eq!(progress.len(), 3);
        assert_eq!(progress.last().unwrap().done, 3);
        assert!(progress.iter().all(|p| p.total == 3));

        // Second run hits the cache for everything that already succeeded
        let downloads = cache.stats().downloads();
        source.heal(&stream_url("kuwo", "2", Quality::High));
        let tracks = resolver.resolve_playlist("kuwo", "any").unwrap();
        let report = save_all(resolver, cache.clone(), &workers, tracks, Quality::High, None);
        assert_eq!(report.success(), 3);
        // Only track 2's audio and cover were still missing
        assert_eq!(cache.stats().downloads(), downloads + 2);

        let _ = fs::remove_dir_all(&dir);
    }
}
