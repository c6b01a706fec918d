//! Playback queue: ordered entries plus a "now playing" pointer.
//!
//! The pointer always denotes the same logical entry across mutations, with
//! one deliberate exception: removing the current entry moves the pointer to
//! its predecessor (or clears it when the first entry was playing).
//!
//! Navigation depends on [`PlayMode`]:
//!
//! | mode     | next at end | previous at start | otherwise      |
//! |----------|-------------|-------------------|----------------|
//! | Sequence | stop        | stop              | step           |
//! | Loop     | wrap to 0   | wrap to last      | step           |
//! | Random   | uniform     | uniform           | uniform        |
//! | Single   | same entry  | stop              | same / step    |
//!
//! Single only repeats forward; previous steps back like Sequence.

use log::{debug, trace};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::track::TrackRef;

/// Playback mode policy for next/previous
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayMode {
    #[default]
    Sequence,
    Loop,
    Random,
    Single,
}

impl PlayMode {
    /// Sequence -> Loop -> Random -> Single -> Sequence
    pub fn next(self) -> Self {
        match self {
            PlayMode::Sequence => PlayMode::Loop,
            PlayMode::Loop => PlayMode::Random,
            PlayMode::Random => PlayMode::Single,
            PlayMode::Single => PlayMode::Sequence,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlayMode::Sequence => "sequence",
            PlayMode::Loop => "loop",
            PlayMode::Random => "random",
            PlayMode::Single => "single",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlayMode::Sequence => "顺序播放",
            PlayMode::Loop => "列表循环",
            PlayMode::Random => "随机播放",
            PlayMode::Single => "单曲循环",
        }
    }
}

impl std::fmt::Display for PlayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequence" => Ok(PlayMode::Sequence),
            "loop" => Ok(PlayMode::Loop),
            "random" => Ok(PlayMode::Random),
            "single" => Ok(PlayMode::Single),
            other => Err(format!("unknown play mode '{}'", other)),
        }
    }
}

/// Ordered play list with a current-entry pointer
#[derive(Debug, Clone, Default)]
pub struct PlaybackQueue {
    entries: Vec<TrackRef>,
    current: Option<usize>,
    mode: PlayMode,
}

impl PlaybackQueue {
    pub fn new(mode: PlayMode) -> Self {
        Self {
            entries: Vec::new(),
            current: None,
            mode,
        }
    }

    pub fn entries(&self) -> &[TrackRef] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TrackRef> {
        self.entries.get(index)
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn current_track(&self) -> Option<&TrackRef> {
        self.current.and_then(|i| self.entries.get(i))
    }

    pub fn mode(&self) -> PlayMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PlayMode) {
        self.mode = mode;
    }

    /// Advance the mode cycle and return the new mode
    pub fn cycle_mode(&mut self) -> PlayMode {
        self.mode = self.mode.next();
        debug!("Play mode -> {}", self.mode);
        self.mode
    }

    pub fn position_of(&self, platform: &str, id: &str) -> Option<usize> {
        self.entries.iter().position(|t| t.is(platform, id))
    }

    /// Point at `index`; out of range clears nothing and returns false
    pub fn set_current(&mut self, index: usize) -> bool {
        if index >= self.entries.len() {
            return false;
        }
        self.current = Some(index);
        true
    }

    /// Append unless `(platform, id)` is already queued
    pub fn append(&mut self, track: TrackRef) -> bool {
        if self.position_of(&track.platform, &track.id).is_some() {
            trace!("Queue: {} already present", track);
            return false;
        }
        self.entries.push(track);
        true
    }

    /// Remove one entry; a pointer at or after `index` moves back by one
    pub fn remove_at(&mut self, index: usize) -> Option<TrackRef> {
        if index >= self.entries.len() {
            return None;
        }
        let removed = self.entries.remove(index);

        if let Some(current) = self.current {
            if current >= index {
                self.current = current.checked_sub(1);
            }
        }
        Some(removed)
    }

    /// Move entry `from` so that it ends up at position `to`
    pub fn reorder(&mut self, from: usize, to: usize) {
        let len = self.entries.len();
        if from >= len || to >= len || from == to {
            return;
        }

        let moved = self.entries.remove(from);
        self.entries.insert(to, moved);

        if let Some(current) = self.current {
            self.current = Some(if current == from {
                to
            } else if from < current && current <= to {
                current - 1
            } else if to <= current && current < from {
                current + 1
            } else {
                current
            });
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current = None;
    }

    pub fn select_next(&self) -> Option<usize> {
        self.select_next_with(&mut rand::thread_rng())
    }

    pub fn select_previous(&self) -> Option<usize> {
        self.select_previous_with(&mut rand::thread_rng())
    }

    /// Index to play after the current one, without moving the pointer
    pub fn select_next_with<R: Rng>(&self, rng: &mut R) -> Option<usize> {
        let len = self.entries.len();
        if len == 0 {
            return None;
        }

        match self.mode {
            PlayMode::Random => Some(rng.gen_range(0..len)),
            PlayMode::Single => self.current,
            PlayMode::Loop | PlayMode::Sequence => match self.current {
                None => Some(0),
                Some(current) if current + 1 >= len => {
                    (self.mode == PlayMode::Loop).then_some(0)
                }
                Some(current) => Some(current + 1),
            },
        }
    }

    /// Index to play before the current one, without moving the pointer
    pub fn select_previous_with<R: Rng>(&self, rng: &mut R) -> Option<usize> {
        let len = self.entries.len();
        if len == 0 {
            return None;
        }

        if self.mode == PlayMode::Random {
            return Some(rng.gen_range(0..len));
        }

        match self.current {
            None | Some(0) => (self.mode == PlayMode::Loop).then_some(len - 1),
            Some(current) => Some(current - 1),
        }
    }
}
