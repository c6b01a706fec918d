//! Track identity and metadata types.
//!
//! A track is identified by `(platform, id)`; title and artist are display
//! data only. [`TrackInfo`] adds the album and cover that cache paths need.

use serde::{Deserialize, Serialize};

/// Reference to a track on some platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRef {
    pub platform: String,
    pub id: String,
    /// Older history files store this as `name`
    #[serde(alias = "name", default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
}

impl TrackRef {
    pub fn new(
        platform: impl Into<String>,
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
        }
    }

    /// True if both refer to the same `(platform, id)`
    pub fn same_track(&self, other: &TrackRef) -> bool {
        self.is(&other.platform, &other.id)
    }

    pub fn is(&self, platform: &str, id: &str) -> bool {
        self.platform == platform && self.id == id
    }
}

impl std::fmt::Display for TrackRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.artist.is_empty() {
            write!(f, "{} [{}:{}]", self.title, self.platform, self.id)
        } else {
            write!(f, "{} - {} [{}:{}]", self.artist, self.title, self.platform, self.id)
        }
    }
}

/// Full metadata for a single track as returned by the resolver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub track: TrackRef,
    pub album: Option<String>,
    pub cover_url: Option<String>,
}

/// Requested audio quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "128k")]
    Standard,
    #[default]
    #[serde(rename = "320k")]
    High,
    #[serde(rename = "flac")]
    Lossless,
    #[serde(rename = "flac24bit")]
    HiRes,
}

impl Quality {
    pub const ALL: [Quality; 4] = [Quality::Standard, Quality::High, Quality::Lossless, Quality::HiRes];

    /// Bitrate parameter understood by the proxy (`br=`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Standard => "128k",
            Quality::High => "320k",
            Quality::Lossless => "flac",
            Quality::HiRes => "flac24bit",
        }
    }

    pub fn is_lossless(&self) -> bool {
        matches!(self, Quality::Lossless | Quality::HiRes)
    }

    /// File extension for cached audio of this tier
    pub fn extension(&self) -> &'static str {
        if self.is_lossless() { "flac" } else { "mp3" }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quality::ALL
            .into_iter()
            .find(|q| q.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown quality '{}' (expected 128k, 320k, flac, flac24bit)", s))
    }
}
