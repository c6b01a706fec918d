use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::core::{PlayMode, Quality};

// Build version with target info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "HTTP:   ureq 3 (blocking)\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

pub const DEFAULT_API: &str = "http://localhost:3000";

/// Music search, playback queue and local media cache
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging to file (default: tunehub.log in the data dir)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE", global = true)]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR", global = true)]
    pub config_dir: Option<PathBuf>,

    /// Base URL of the TuneHub proxy
    #[arg(long = "api", value_name = "URL", env = "TUNEHUB_API", default_value = DEFAULT_API, global = true)]
    pub api: String,

    /// Background worker threads (default: 3/4 of the cores)
    #[arg(long = "workers", value_name = "N", global = true)]
    pub workers: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search one platform or all of them; without a keyword, list recent searches
    Search {
        /// Words to search for
        keyword: Vec<String>,

        /// Platform to search (default: aggregate search)
        #[arg(short = 'p', long = "platform")]
        platform: Option<String>,

        /// Forget recent searches
        #[arg(long = "clear-recent", conflicts_with = "keyword")]
        clear_recent: bool,
    },

    /// Queue tracks and load the first one into the cache
    Play {
        platform: String,

        /// Track ids, queued in order
        #[arg(required = true)]
        ids: Vec<String>,

        #[command(flatten)]
        quality: QualityArg,

        /// Walk the whole queue following the play mode
        #[arg(long = "all")]
        all: bool,

        /// Print lyrics in real time for the loaded track
        #[arg(short = 'f', long = "follow")]
        follow: bool,
    },

    /// Save tracks (or a whole playlist) into the cache
    Save {
        platform: String,

        /// Track ids
        ids: Vec<String>,

        /// Platform playlist id to save entirely
        #[arg(long = "playlist", value_name = "ID")]
        playlist: Option<String>,

        #[command(flatten)]
        quality: QualityArg,
    },

    /// List a platform's charts, or the tracks of one chart
    Charts {
        platform: String,

        /// Chart id (from the chart list)
        id: Option<String>,
    },

    /// Show or edit the play history
    History {
        #[command(subcommand)]
        action: Option<HistoryAction>,
    },

    /// Parse an LRC file
    Lyrics {
        file: PathBuf,

        /// Show the cue active at this position (seconds)
        #[arg(long = "at", value_name = "SECS", conflicts_with = "follow")]
        at: Option<f64>,

        /// Print cues in real time
        #[arg(short = 'f', long = "follow")]
        follow: bool,
    },

    /// Show, set or cycle the play mode
    Mode {
        #[arg(value_enum)]
        set: Option<ModeArg>,

        /// Advance sequence -> loop -> random -> single
        #[arg(long = "cycle", conflicts_with = "set")]
        cycle: bool,
    },

    /// Show or change the volume
    Volume {
        /// New volume in [0, 1]
        value: Option<f32>,

        /// Toggle mute
        #[arg(short = 'm', long = "mute", conflicts_with_all = ["value", "up", "down"])]
        mute: bool,

        #[arg(long = "up", conflicts_with_all = ["value", "down"])]
        up: bool,

        #[arg(long = "down", conflicts_with = "value")]
        down: bool,
    },

    /// Print the cache path derived from track metadata
    Path {
        platform: String,
        artist: String,
        album: String,
        title: String,

        #[arg(short = 'k', long = "kind", value_enum, default_value = "audio")]
        kind: KindArg,

        #[command(flatten)]
        quality: QualityArg,
    },
}

#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    /// List entries, newest first (default)
    List,
    /// Remove one entry
    Remove { platform: String, id: String },
    /// Remove everything
    Clear,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct QualityArg {
    /// Audio quality: 128k, 320k, flac, flac24bit
    #[arg(short = 'q', long = "quality", default_value = "flac24bit")]
    pub quality: Quality,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Sequence,
    Loop,
    Random,
    Single,
}

impl From<ModeArg> for PlayMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Sequence => PlayMode::Sequence,
            ModeArg::Loop => PlayMode::Loop,
            ModeArg::Random => PlayMode::Random,
            ModeArg::Single => PlayMode::Single,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindArg {
    Audio,
    Lyrics,
    Cover,
}
