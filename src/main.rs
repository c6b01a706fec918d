use tunehub::cli::{Args, Command, HistoryAction, KindArg};
use tunehub::config::{self, PathConfig};
use tunehub::core::batch::{self, SaveProgress};
use tunehub::core::history;
use tunehub::core::lyrics::{LyricsTicker, TICK_INTERVAL};
use tunehub::core::media_cache::{AssetKind, CacheKey, MediaCacheStore};
use tunehub::core::prefs::VOLUME_STEP;
use tunehub::core::workers::{self, Workers};
use tunehub::core::{
    ContentResolver, CueEvent, HistoryLedger, HttpResolver, LyricsTimeline, NowPlaying, PlayMode,
    PlaybackClock, Player, PlayerConfig, PlayerDeps, Preferences, Quality, TrackRef, WallClock,
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::thread;
use std::time::Duration;

/// Resolver requests (search, info, lyrics)
const RESOLVER_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `--follow` keeps going after the last cue
const FOLLOW_TAIL: f64 = 3.0;

/// Long-lived stores shared by every command
struct App {
    paths: PathConfig,
    prefs: Arc<Preferences>,
    history: Arc<HistoryLedger>,
    cache: Arc<MediaCacheStore>,
    resolver: Arc<dyn ContentResolver>,
    worker_threads: usize,
}

impl App {
    fn new(args: &Args, paths: PathConfig) -> Self {
        let storage = paths.storage_dir();
        Self {
            prefs: Arc::new(Preferences::new(paths.prefs_file())),
            history: Arc::new(HistoryLedger::new(paths.history_file())),
            cache: Arc::new(MediaCacheStore::with_http(storage)),
            resolver: Arc::new(HttpResolver::new(args.api.clone(), RESOLVER_TIMEOUT)),
            worker_threads: args.workers.unwrap_or_else(workers::default_threads),
            paths,
        }
    }

    fn player(&self, quality: Quality, clock: Arc<dyn PlaybackClock>) -> Player {
        let deps = PlayerDeps {
            resolver: Arc::clone(&self.resolver),
            cache: Arc::clone(&self.cache),
            history: Arc::clone(&self.history),
            prefs: Arc::clone(&self.prefs),
            clock,
        };
        let config = PlayerConfig {
            quality,
            worker_threads: self.worker_threads.min(4),
            ..PlayerConfig::default()
        };
        Player::new(deps, config)
    }
}

fn init_logging(args: &Args, paths: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt.clone().unwrap_or_else(|| paths.log_file());
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .filter_module("ureq", log::LevelFilter::Info)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging respects RUST_LOG if set
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .filter_module("ureq", log::LevelFilter::Info)
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let paths = PathConfig::from_env_and_cli(args.config_dir.clone());

    if let Err(e) = config::ensure_dirs(&paths) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }
    init_logging(&args, &paths)?;

    info!("TuneHub starting...");
    debug!("Command-line args: {:?}", args);
    info!("Config path: {}", paths.prefs_file().display());
    info!("Storage path: {}", paths.storage_dir().display());

    let app = App::new(&args, paths);

    match args.command {
        Command::Search { keyword, platform, clear_recent } => {
            cmd_search(&app, &keyword.join(" "), platform.as_deref(), clear_recent)
        }
        Command::Play { platform, ids, quality, all, follow } => {
            cmd_play(&app, &platform, &ids, quality.quality, all, follow)
        }
        Command::Save { platform, ids, playlist, quality } => {
            cmd_save(&app, &platform, &ids, playlist.as_deref(), quality.quality)
        }
        Command::Charts { platform, id } => cmd_charts(&app, &platform, id.as_deref()),
        Command::History { action } => cmd_history(&app, action.unwrap_or(HistoryAction::List)),
        Command::Lyrics { file, at, follow } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read lyrics: {}", file.display()))?;
            cmd_lyrics(LyricsTimeline::parse(&text), at, follow)
        }
        Command::Mode { set, cycle } => cmd_mode(&app, set.map(PlayMode::from), cycle),
        Command::Volume { value, mute, up, down } => cmd_volume(&app, value, mute, up, down),
        Command::Path { platform, artist, album, title, kind, quality } => {
            let kind = match kind {
                KindArg::Audio => AssetKind::Audio(quality.quality),
                KindArg::Lyrics => AssetKind::Lyrics,
                KindArg::Cover => AssetKind::Cover,
            };
            let key = CacheKey::new(&platform, &artist, &album, &title);
            let path = app.cache.resolve_path(&key, kind);
            let state = if app.cache.exists(&path) { "cached" } else { "missing" };
            println!("{} ({})", path.display(), state);
            Ok(())
        }
    }
}

fn cmd_search(app: &App, keyword: &str, platform: Option<&str>, clear_recent: bool) -> Result<()> {
    if clear_recent {
        app.prefs.clear_search_history()?;
        println!("Recent searches cleared");
        return Ok(());
    }
    if keyword.trim().is_empty() {
        let recent = app.prefs.search_history();
        if recent.is_empty() {
            println!("No recent searches");
        }
        for (i, keyword) in recent.iter().enumerate() {
            println!("{:>2}. {}", i + 1, keyword);
        }
        return Ok(());
    }

    let player = app.player(Quality::default(), Arc::new(WallClock::new()));
    let results = player
        .search(keyword, platform)
        .with_context(|| format!("Search failed for '{}'", keyword.trim()))?;

    if results.is_empty() {
        println!("No results");
    }
    for (i, track) in results.iter().enumerate() {
        println!("{:>2}. {}", i + 1, track);
    }
    Ok(())
}

fn cmd_play(app: &App, platform: &str, ids: &[String], quality: Quality, all: bool, follow: bool) -> Result<()> {
    let clock = Arc::new(WallClock::new());
    let mut player = app.player(quality, clock.clone());

    for id in ids {
        if !player.enqueue(TrackRef::new(platform, id.as_str(), "", "")) {
            warn!("{}:{} already queued", platform, id);
        }
    }
    println!("Mode: {} ({})", player.queue().mode(), player.queue().mode().label());

    let playing = player.play_at(0).context("Failed to load the first track")?;
    print_loaded(playing);
    clock.resume();

    if follow {
        if let Some(timeline) = player.now_playing().and_then(|p| p.lyrics.clone()) {
            follow_cues(player.cue_events(), clock.as_ref(), &timeline, |e| player.is_current(e));
        } else {
            println!("(no lyrics)");
        }
    }

    if all {
        // Loop and Single never end on their own; one pass over the queue is enough
        for _ in 1..player.queue().len() {
            clock.seek(0.0);
            match player.on_ended() {
                Ok(Some(playing)) => print_loaded(playing),
                Ok(None) => break,
                Err(e) => {
                    eprintln!("Stopped: {}", e);
                    break;
                }
            }
        }
    }
    Ok(())
}

fn print_loaded(playing: &NowPlaying) {
    match playing.index {
        Some(index) => println!("[{}] {}", index + 1, playing.info.track),
        None => println!("[-] {}", playing.info.track),
    }
    println!("    {}", playing.audio.display());
}

fn cmd_charts(app: &App, platform: &str, id: Option<&str>) -> Result<()> {
    let Some(id) = id else {
        let charts = app
            .resolver
            .resolve_toplists(platform)
            .with_context(|| format!("Failed to load {} charts", platform))?;
        if charts.is_empty() {
            println!("No charts");
        }
        for chart in &charts {
            match &chart.update_frequency {
                Some(freq) => println!("{:>12}  {} ({})", chart.id, chart.name, freq),
                None => println!("{:>12}  {}", chart.id, chart.name),
            }
        }
        return Ok(());
    };

    let tracks = app
        .resolver
        .resolve_toplist(platform, id)
        .with_context(|| format!("Failed to load chart {}", id))?;
    if tracks.is_empty() {
        println!("Chart is empty");
    }
    for (i, track) in tracks.iter().enumerate() {
        println!("{:>3}. {}", i + 1, track);
    }
    Ok(())
}

fn cmd_save(app: &App, platform: &str, ids: &[String], playlist: Option<&str>, quality: Quality) -> Result<()> {
    let mut tracks: Vec<TrackRef> = ids
        .iter()
        .map(|id| TrackRef::new(platform, id.as_str(), "", ""))
        .collect();
    if let Some(playlist) = playlist {
        let listed = app
            .resolver
            .resolve_playlist(platform, playlist)
            .with_context(|| format!("Failed to load playlist {}", playlist))?;
        tracks.extend(listed);
    }
    if tracks.is_empty() {
        bail!("Nothing to save: pass track ids or --playlist");
    }

    let workers = Workers::new(app.worker_threads, Arc::new(AtomicU64::new(0)));
    let (tx, rx) = crossbeam_channel::unbounded::<SaveProgress>();

    let report = thread::scope(|scope| {
        scope.spawn(move || {
            for p in rx.iter() {
                match &p.outcome.result {
                    Ok(saved) => println!("[{}/{}] {} -> {}", p.done, p.total, p.outcome.track, saved.audio.display()),
                    Err(e) => println!("[{}/{}] {} failed: {}", p.done, p.total, p.outcome.track, e),
                }
            }
        });
        batch::save_all(
            Arc::clone(&app.resolver),
            Arc::clone(&app.cache),
            &workers,
            tracks,
            quality,
            Some(tx),
        )
    });

    println!("Saved: {}, failed: {}", report.success(), report.failed());
    Ok(())
}

fn cmd_history(app: &App, action: HistoryAction) -> Result<()> {
    match action {
        HistoryAction::List => {
            let entries = app.history.list();
            if entries.is_empty() {
                println!("History is empty");
            }
            let now = history::now_millis();
            for (i, entry) in entries.iter().enumerate() {
                println!("{:>3}. {} ({})", i + 1, entry.track(), history::played_ago(entry.timestamp, now));
            }
        }
        HistoryAction::Remove { platform, id } => {
            app.history.remove(&platform, &id)?;
            println!("Removed {}:{}", platform, id);
        }
        HistoryAction::Clear => {
            app.history.clear()?;
            println!("History cleared ({})", app.history.path().display());
        }
    }
    Ok(())
}

fn cmd_lyrics(timeline: LyricsTimeline, at: Option<f64>, follow: bool) -> Result<()> {
    if timeline.is_empty() {
        bail!("No timed lyrics found");
    }

    if let Some(position) = at {
        match timeline.active_cue_index(position).and_then(|i| timeline.get(i)) {
            Some(cue) => println!("[{}] {}", format_time(cue.time), cue.text),
            None => println!("(before first line)"),
        }
        return Ok(());
    }

    if follow {
        let timeline = Arc::new(timeline);
        let clock = Arc::new(WallClock::started());
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut ticker = LyricsTicker::spawn(Arc::clone(&timeline), clock.clone(), 1, TICK_INTERVAL, tx);
        follow_cues(&rx, clock.as_ref(), &timeline, |_| true);
        ticker.stop();
        return Ok(());
    }

    for cue in timeline.cues() {
        println!("[{}] {}", format_time(cue.time), cue.text);
    }
    Ok(())
}

/// Print cue changes until the clock passes the last cue
fn follow_cues<F>(events: &Receiver<CueEvent>, clock: &dyn PlaybackClock, timeline: &LyricsTimeline, is_current: F)
where
    F: Fn(&CueEvent) -> bool,
{
    let end = timeline.cues().last().map_or(0.0, |c| c.time) + FOLLOW_TAIL;
    while clock.position() < end {
        let Ok(event) = events.recv_timeout(Duration::from_millis(200)) else {
            continue;
        };
        if !is_current(&event) {
            continue;
        }
        let CueEvent::Changed { time, text, .. } = event;
        if let Some(text) = text {
            println!("[{}] {}", format_time(time), text);
        }
    }
}

fn cmd_mode(app: &App, set: Option<PlayMode>, cycle: bool) -> Result<()> {
    let mode = match (set, cycle) {
        (Some(mode), _) => mode,
        (None, true) => app.prefs.mode().next(),
        (None, false) => app.prefs.mode(),
    };
    if set.is_some() || cycle {
        app.prefs.set_mode(mode)?;
    }
    println!("{} ({})", mode, mode.label());
    Ok(())
}

fn cmd_volume(app: &App, value: Option<f32>, mute: bool, up: bool, down: bool) -> Result<()> {
    let volume = if mute {
        app.prefs.toggle_mute()?
    } else if up {
        app.prefs.step_volume(VOLUME_STEP)?
    } else if down {
        app.prefs.step_volume(-VOLUME_STEP)?
    } else if let Some(value) = value {
        app.prefs.set_volume(value)?
    } else {
        app.prefs.volume()
    };

    let suffix = if volume == 0.0 { " (muted)" } else { "" };
    println!("Volume: {:.0}%{}", volume * 100.0, suffix);
    debug!("Preferences: {}", app.paths.prefs_file().display());
    Ok(())
}

/// 83.5 -> "01:23.50"
fn format_time(seconds: f64) -> String {
    let centis = (seconds.max(0.0) * 100.0).round() as u64;
    format!("{:02}:{:02}.{:02}", centis / 6000, (centis / 100) % 60, centis % 100)
}
