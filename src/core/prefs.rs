//! Persisted user settings in a single JSON object (`tunehub.json`).
//!
//! Keys are independent: a bad `volume` falls back to its default without
//! touching `play_mode` or `search_history`, and writes merge one key into
//! the existing object instead of rewriting everything from defaults.
//!
//! ```json
//! { "volume": 0.5, "last_volume": 0.8, "play_mode": "loop", "search_history": ["jay chou"] }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::core::error::{CoreError, Result};
use crate::core::persist;
use crate::core::queue::PlayMode;

pub const DEFAULT_VOLUME: f32 = 0.5;
pub const VOLUME_STEP: f32 = 0.1;
pub const MAX_SEARCH_HISTORY: usize = 10;

const KEY_VOLUME: &str = "volume";
const KEY_LAST_VOLUME: &str = "last_volume";
const KEY_MODE: &str = "play_mode";
const KEY_SEARCH: &str = "search_history";

/// Round to two decimals so repeated steps do not drift
fn normalize_volume(value: f32) -> f32 {
    (value.clamp(0.0, 1.0) * 100.0).round() / 100.0
}

/// File-backed settings store
pub struct Preferences {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Preferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // --- volume ---

    pub fn volume(&self) -> f32 {
        self.get_or(KEY_VOLUME, DEFAULT_VOLUME, |v: &f32| (0.0..=1.0).contains(v))
    }

    /// Store a volume clamped to `[0, 1]`; returns the stored value
    pub fn set_volume(&self, value: f32) -> Result<f32> {
        if value.is_nan() {
            return Err(CoreError::InvalidInput("volume is NaN".to_string()));
        }
        let volume = normalize_volume(value);
        self.put(KEY_VOLUME, &volume)?;
        Ok(volume)
    }

    /// Nudge the volume by `delta` (arrow keys use ±[`VOLUME_STEP`])
    pub fn step_volume(&self, delta: f32) -> Result<f32> {
        self.set_volume(self.volume() + delta)
    }

    pub fn is_muted(&self) -> bool {
        self.volume() == 0.0
    }

    /// Mute, remembering the current volume, or restore it (or the default)
    pub fn toggle_mute(&self) -> Result<f32> {
        let volume = self.volume();
        if volume > 0.0 {
            self.put(KEY_LAST_VOLUME, &volume)?;
            self.set_volume(0.0)
        } else {
            let restored = self.get_or(KEY_LAST_VOLUME, DEFAULT_VOLUME, |v: &f32| *v > 0.0 && *v <= 1.0);
            self.set_volume(restored)
        }
    }

    // --- play mode ---

    pub fn mode(&self) -> PlayMode {
        self.get_or(KEY_MODE, PlayMode::default(), |_| true)
    }

    pub fn set_mode(&self, mode: PlayMode) -> Result<()> {
        self.put(KEY_MODE, &mode)
    }

    // --- search history ---

    /// Recent keywords, newest first
    pub fn search_history(&self) -> Vec<String> {
        self.get_or(KEY_SEARCH, Vec::new(), |_| true)
    }

    /// Push a keyword to the front, dropping case-insensitive duplicates
    pub fn add_search(&self, keyword: &str) -> Result<Vec<String>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(self.search_history());
        }

        let lower = keyword.to_lowercase();
        let mut history = self.search_history();
        history.retain(|k| k.to_lowercase() != lower);
        history.insert(0, keyword.to_string());
        history.truncate(MAX_SEARCH_HISTORY);

        self.put(KEY_SEARCH, &history)?;
        Ok(history)
    }

    pub fn clear_search_history(&self) -> Result<()> {
        self.put(KEY_SEARCH, &Vec::<String>::new())
    }

    // --- storage ---

    fn get_or<T, F>(&self, key: &str, default: T, valid: F) -> T
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let Some(raw) = self.load().remove(key) else {
            return default;
        };

        match serde_json::from_value::<T>(raw) {
            Ok(value) if valid(&value) => value,
            Ok(_) => {
                warn!("Preference '{}' out of range, using default", key);
                default
            }
            Err(e) => {
                warn!("Preference '{}' unreadable, using default: {}", key, e);
                default
            }
        }
    }

    fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.load();
        map.insert(key.to_string(), serde_json::to_value(value)?);
        debug!("Preference '{}' saved", key);
        persist::write_json(&self.path, &map)
    }

    /// Caller must hold `lock`
    fn load(&self) -> Map<String, Value> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Map::new(),
            Err(e) => {
                warn!("Preferences unreadable ({}): {}", self.path.display(), e);
                return Map::new();
            }
        };

        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                warn!("Preferences corrupt ({}), starting fresh", self.path.display());
                Map::new()
            }
        }
    }
}
