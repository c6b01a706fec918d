//! Resolve-then-cache steps for one track's audio, lyrics and cover.
//!
//! Every step checks the cache first and only asks the resolver for a URL
//! on a miss, so replaying a cached track costs one metadata call.

use std::path::PathBuf;

use log::{debug, warn};

use crate::core::error::Result;
use crate::core::media_cache::{AssetKind, CacheKey, MediaCacheStore};
use crate::core::resolver::ContentResolver;
use crate::core::track::{Quality, TrackInfo, TrackRef};

/// Metadata merged from the caller's ref and the resolver's answer.
///
/// Non-empty title/artist from the queue entry win, matching what the user
/// picked from search results.
pub fn resolve_info(resolver: &dyn ContentResolver, track: &TrackRef) -> Result<TrackInfo> {
    let mut info = resolver.resolve_info(&track.platform, &track.id)?;
    if !track.title.trim().is_empty() {
        info.track.title = track.title.clone();
    }
    if !track.artist.trim().is_empty() {
        info.track.artist = track.artist.clone();
    }
    Ok(info)
}

/// Cached audio path, downloading on a miss
pub fn fetch_audio(
    resolver: &dyn ContentResolver,
    cache: &MediaCacheStore,
    info: &TrackInfo,
    quality: Quality,
) -> Result<PathBuf> {
    let kind = AssetKind::Audio(quality);
    let path = cache.resolve_path(&CacheKey::from_info(info), kind);
    cache.fetch_with(&path, kind, || {
        resolver.resolve_stream_url(&info.track.platform, &info.track.id, quality)
    })
}

/// Lyrics text from cache or resolver; `None` if the track has none
pub fn fetch_lyrics(
    resolver: &dyn ContentResolver,
    cache: &MediaCacheStore,
    info: &TrackInfo,
) -> Result<Option<String>> {
    let key = CacheKey::from_info(info);
    if let Some(text) = cache.read_lyrics(&key) {
        return Ok(Some(text));
    }

    let Some(text) = resolver.resolve_lyrics_text(&info.track.platform, &info.track.id)? else {
        debug!("No lyrics for {}", info.track);
        return Ok(None);
    };
    cache.save_text(&cache.resolve_path(&key, AssetKind::Lyrics), &text)?;
    Ok(Some(text))
}

/// Cached cover path; `None` if the track has no artwork
pub fn fetch_cover(cache: &MediaCacheStore, info: &TrackInfo) -> Result<Option<PathBuf>> {
    let key = CacheKey::from_info(info);
    if let Some(path) = cache.local_path(&key, AssetKind::Cover) {
        return Ok(Some(path));
    }
    let Some(url) = info.cover_url.as_deref() else {
        return Ok(None);
    };
    let path = cache.resolve_path(&key, AssetKind::Cover);
    cache.fetch_or_download(&path, url, AssetKind::Cover).map(Some)
}

/// Lyrics are optional: failures are logged and read as "no lyrics"
pub fn fetch_lyrics_lenient(
    resolver: &dyn ContentResolver,
    cache: &MediaCacheStore,
    info: &TrackInfo,
) -> Option<String> {
    match fetch_lyrics(resolver, cache, info) {
        Ok(text) => text,
        Err(e) => {
            warn!("Lyrics unavailable for {}: {}", info.track, e);
            None
        }
    }
}
