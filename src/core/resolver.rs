//! Content resolver: search, metadata and media URLs from a platform proxy.
//!
//! [`ContentResolver`] is the seam between the player and whatever serves
//! music. [`HttpResolver`] talks to a TuneHub-style proxy:
//!
//! | call                  | endpoint                                          |
//! |-----------------------|---------------------------------------------------|
//! | search (one platform) | `/api/proxy/search?source=&keyword=&limit=20`     |
//! | search (all)          | `/api/proxy/aggregateSearch?keyword=`             |
//! | info                  | `/api/proxy/info?source=&id=`                     |
//! | stream                | `/api/proxy/url?source=&id=&br=`                  |
//! | lyrics                | `/api/proxy/lrc?source=&id=`                      |
//! | cover                 | `/api/proxy/pic?source=&id=`                      |
//! | playlist              | `/api/proxy/playlist?source=&id=`                 |
//! | charts                | `/api/proxy/toplists?source=`                     |
//! | chart tracks          | `/api/proxy/toplist?source=&id=`                  |
//!
//! JSON responses use the envelope `{ "code": 200, "data": ..., "message": "..." }`.
//! Stream and cover endpoints redirect to the media itself, so their URLs are
//! built locally and handed to the cache store.

use std::time::Duration;

use log::{debug, trace};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::core::error::{CoreError, Result};
use crate::core::http;
use crate::core::track::{Quality, TrackInfo, TrackRef};

pub const SEARCH_LIMIT: usize = 20;
const DEFAULT_PLATFORM: &str = "netease";

/// Source of track metadata and media locations
pub trait ContentResolver: Send + Sync {
    /// Search one platform, or every platform when `platform` is `None`
    fn search(&self, keyword: &str, platform: Option<&str>) -> Result<Vec<TrackRef>>;

    fn resolve_info(&self, platform: &str, id: &str) -> Result<TrackInfo>;

    fn resolve_stream_url(&self, platform: &str, id: &str, quality: Quality) -> Result<String>;

    /// LRC text, `None` when the track has no lyrics
    fn resolve_lyrics_text(&self, platform: &str, id: &str) -> Result<Option<String>>;

    fn resolve_cover_url(&self, platform: &str, id: &str) -> Result<Option<String>>;

    /// Tracks of a platform playlist
    fn resolve_playlist(&self, platform: &str, id: &str) -> Result<Vec<TrackRef>> {
        Err(CoreError::NotFound(format!("playlists unsupported ({}:{})", platform, id)))
    }

    /// Charts a platform publishes
    fn resolve_toplists(&self, platform: &str) -> Result<Vec<Toplist>> {
        Err(CoreError::NotFound(format!("charts unsupported ({})", platform)))
    }

    /// Tracks of one chart
    fn resolve_toplist(&self, platform: &str, id: &str) -> Result<Vec<TrackRef>> {
        Err(CoreError::NotFound(format!("charts unsupported ({}:{})", platform, id)))
    }
}

/// A platform chart ("toplist")
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toplist {
    pub platform: String,
    pub id: String,
    pub name: String,
    /// Free-form text such as "每天更新"
    pub update_frequency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    message: Option<String>,
}

/// Unwrap the `{code, data, message}` envelope
fn unwrap_envelope(body: &str, what: &str) -> Result<Value> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| CoreError::FetchFailed(format!("{}: malformed response: {}", what, e)))?;

    match envelope.code {
        200 => Ok(envelope.data),
        404 => Err(CoreError::NotFound(what.to_string())),
        code => Err(CoreError::FetchFailed(format!(
            "{}: code {}: {}",
            what,
            code,
            envelope.message.unwrap_or_default()
        ))),
    }
}

/// Ids come back as numbers or strings depending on the platform
fn value_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn track_from_value(item: &Value, platform: Option<&str>) -> Option<TrackRef> {
    let id = value_string(item.get("id"))?;
    let platform = value_string(item.get("platform"))
        .or_else(|| platform.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_PLATFORM.to_string());
    Some(TrackRef::new(
        platform,
        id,
        value_string(item.get("name")).unwrap_or_default(),
        value_string(item.get("artist")).unwrap_or_default(),
    ))
}

/// `data.results` of a search response
pub fn parse_search(body: &str, platform: Option<&str>) -> Result<Vec<TrackRef>> {
    let data = unwrap_envelope(body, "search")?;
    let results = data
        .get("results")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|item| track_from_value(item, platform)).collect())
        .unwrap_or_default();
    Ok(results)
}

fn track_list(body: &str, what: &str, platform: &str) -> Result<Vec<TrackRef>> {
    let data = unwrap_envelope(body, what)?;
    Ok(data
        .get("list")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|item| track_from_value(item, Some(platform))).collect())
        .unwrap_or_default())
}

/// `data.list` of a playlist response
pub fn parse_playlist(body: &str, platform: &str) -> Result<Vec<TrackRef>> {
    track_list(body, "playlist", platform)
}

/// `data.list` of a chart response; charts carry no artist
pub fn parse_toplist(body: &str, platform: &str) -> Result<Vec<TrackRef>> {
    track_list(body, "toplist", platform)
}

/// `data.list` of a chart index; entries without an id are skipped
pub fn parse_toplists(body: &str, platform: &str) -> Result<Vec<Toplist>> {
    let data = unwrap_envelope(body, "toplists")?;
    let Some(items) = data.get("list").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    Ok(items
        .iter()
        .filter_map(|item| {
            Some(Toplist {
                platform: platform.to_string(),
                id: value_string(item.get("id"))?,
                name: value_string(item.get("name")).unwrap_or_default(),
                update_frequency: value_string(item.get("updateFrequency")),
            })
        })
        .collect())
}

/// Info response; the track's platform always wins over what the body says
pub fn parse_info(body: &str, platform: &str, id: &str) -> Result<TrackInfo> {
    let data = unwrap_envelope(body, &format!("{}:{}", platform, id))?;
    if !data.is_object() {
        return Err(CoreError::NotFound(format!("{}:{}", platform, id)));
    }
    Ok(TrackInfo {
        track: TrackRef::new(
            platform,
            id,
            value_string(data.get("name")).unwrap_or_default(),
            value_string(data.get("artist")).unwrap_or_default(),
        ),
        album: value_string(data.get("album")),
        cover_url: value_string(data.get("pic")),
    })
}

/// Lyrics come back as plain LRC or wrapped in the JSON envelope
pub fn parse_lyrics(body: &str) -> Option<String> {
    let text = match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) if envelope.code == 200 => match envelope.data {
            Value::String(s) => s,
            other => other.get("lrc").and_then(Value::as_str).unwrap_or_default().to_string(),
        },
        Ok(_) => return None,
        Err(_) => body.to_string(),
    };
    (!text.trim().is_empty()).then_some(text)
}

/// HTTP resolver for a TuneHub proxy
#[derive(Debug, Clone)]
pub struct HttpResolver {
    base: String,
    timeout: Duration,
}

impl HttpResolver {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        debug!("HttpResolver at {}", base);
        Self { base, timeout }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn endpoint(&self, name: &str, query: &[(&str, &str)]) -> Result<String> {
        let path = format!("{}/api/proxy/{}", self.base, name);
        Url::parse_with_params(&path, query)
            .map(String::from)
            .map_err(|e| CoreError::InvalidInput(format!("bad proxy URL {}: {}", path, e)))
    }

    fn get(&self, url: &str) -> Result<String> {
        trace!("Resolver GET {}", url);
        http::get_text(url, self.timeout)
    }
}

impl ContentResolver for HttpResolver {
    fn search(&self, keyword: &str, platform: Option<&str>) -> Result<Vec<TrackRef>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(CoreError::InvalidInput("empty search keyword".to_string()));
        }

        let limit = SEARCH_LIMIT.to_string();
        let url = match platform {
            Some(source) => self.endpoint(
                "search",
                &[("source", source), ("keyword", keyword), ("limit", &limit)],
            )?,
            None => self.endpoint("aggregateSearch", &[("keyword", keyword)])?,
        };
        parse_search(&self.get(&url)?, platform)
    }

    fn resolve_info(&self, platform: &str, id: &str) -> Result<TrackInfo> {
        let url = self.endpoint("info", &[("source", platform), ("id", id)])?;
        let mut info = parse_info(&self.get(&url)?, platform, id)?;
        // Serve artwork through the proxy like the stream
        if info.cover_url.is_some() {
            info.cover_url = Some(self.endpoint("pic", &[("source", platform), ("id", id)])?);
        }
        Ok(info)
    }

    fn resolve_stream_url(&self, platform: &str, id: &str, quality: Quality) -> Result<String> {
        self.endpoint("url", &[("source", platform), ("id", id), ("br", quality.as_str())])
    }

    fn resolve_lyrics_text(&self, platform: &str, id: &str) -> Result<Option<String>> {
        let url = self.endpoint("lrc", &[("source", platform), ("id", id)])?;
        match self.get(&url) {
            Ok(body) => Ok(parse_lyrics(&body)),
            Err(CoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn resolve_cover_url(&self, platform: &str, id: &str) -> Result<Option<String>> {
        Ok(self.resolve_info(platform, id)?.cover_url)
    }

    fn resolve_playlist(&self, platform: &str, id: &str) -> Result<Vec<TrackRef>> {
        let url = self.endpoint("playlist", &[("source", platform), ("id", id)])?;
        parse_playlist(&self.get(&url)?, platform)
    }

    fn resolve_toplists(&self, platform: &str) -> Result<Vec<Toplist>> {
        let url = self.endpoint("toplists", &[("source", platform)])?;
        parse_toplists(&self.get(&url)?, platform)
    }

    fn resolve_toplist(&self, platform: &str, id: &str) -> Result<Vec<TrackRef>> {
        let url = self.endpoint("toplist", &[("source", platform), ("id", id)])?;
        parse_toplist(&self.get(&url)?, platform)
    }
}
