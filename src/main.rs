mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cli::{Cli, Command};
use haptibeat::audio::{BeatDetector, BeatProfile, FileSourceProvider, SourceIdentity};
use haptibeat::batch::{BatchJob, BatchOptions, BatchOrchestrator};
use haptibeat::cancel::CancelToken;
use haptibeat::config::{self, Config};
use haptibeat::playback::{run_ticks, DeviceAssignment, LogActuator, SyncEngine, WallClockPlayer};
use haptibeat::resource::ResourceSlot;
use haptibeat::squeeze::{CpalProbe, SqueezeDetector, SqueezeEvent};
use haptibeat::timeline::{BeatTimeline, TimelineStore};

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "wav", "m4a", "aac"];

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(dir) = cli.timeline_dir {
        config.store.dir = Some(dir);
    }
    let store = TimelineStore::new(config.timeline_dir());
    log::debug!("Timelines in {}", store.root().display());

    match cli.command {
        Command::Analyze { input, profiles, force } => {
            if !input.is_file() {
                anyhow::bail!("Input file not found: {}", input.display());
            }
            analyze(&config, store, vec![input], profiles.resolve(), force)
        }
        Command::Batch { inputs, profiles, force } => {
            let files = collect_audio_files(&inputs)?;
            analyze(&config, store, files, profiles.resolve(), force)
        }
        Command::Show { input, profiles } => show(&store, &input, &profiles.resolve()),
        Command::Play {
            input,
            profiles,
            sync_offset,
            intensity,
            start,
        } => {
            if let Some(offset) = sync_offset {
                config.playback.sync_offset_ms = offset;
            }
            if let Some(intensity) = intensity {
                config.playback.master_intensity = intensity;
            }
            config.validate().context("Invalid playback settings")?;
            play(&config, &store, &input, &profiles.resolve(), start)
        }
        Command::Squeeze { seconds, threshold } => {
            if let Some(threshold) = threshold {
                config.squeeze.threshold_percent = threshold;
            }
            config.validate().context("Invalid squeeze settings")?;
            squeeze(&config, Duration::from_secs(seconds))
        }
    }
}

/// Explicit `--config`, else `./haptibeat.toml`, else the user config dirs.
fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = explicit.map(Path::to_path_buf).or_else(|| {
        let local = PathBuf::from("haptibeat.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(home) = dirs::home_dir() {
            let xdg = home.join(".config").join("haptibeat").join("config.toml");
            if xdg.exists() {
                return Some(xdg);
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("haptibeat").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    });

    let Some(path) = path else {
        return Ok(Config::default());
    };
    let config = config::load_config(&path).with_context(|| format!("Failed to load config from {}", path.display()))?;
    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

fn collect_audio_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("Cannot read folder {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && is_audio(path))
                .collect();
            found.sort();
            log::info!("{}: {} audio files", input.display(), found.len());
            files.extend(found);
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            log::warn!("Skipping {}: not found", input.display());
        }
    }
    if files.is_empty() {
        anyhow::bail!("No audio files found");
    }
    Ok(files)
}

fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn analyze(config: &Config, store: TimelineStore, files: Vec<PathBuf>, profiles: Vec<BeatProfile>, force: bool) -> Result<()> {
    let identities: Vec<SourceIdentity> = files.iter().map(|f| SourceIdentity::from_path(f)).collect();
    let jobs = BatchJob::cross(&identities, &profiles);
    let total = jobs.len();

    let orchestrator = Arc::new(BatchOrchestrator::new(
        Arc::new(FileSourceProvider),
        store,
        BeatDetector::new(config.analysis.clone()),
    ));
    let session = orchestrator.start(jobs, BatchOptions { force });

    let pb = ProgressBar::new(1000);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {msg} ({eta} remaining)")
            .context("Invalid progress bar template")?
            .progress_chars("=>-"),
    );
    for progress in session.progress().iter() {
        pb.set_position((progress.overall() * 1000.0) as u64);
        pb.set_message(format!("{}/{} pairs", progress.pairs_completed.min(total), total));
    }
    let report = session.wait();
    pb.finish_and_clear();

    println!(
        "Analyzed {}, skipped {}, empty {}, failed {}",
        report.analyzed, report.skipped, report.empty, report.failed
    );
    if report.cancelled {
        log::warn!("Batch was cancelled before finishing");
    }
    Ok(())
}

fn show(store: &TimelineStore, input: &Path, profiles: &[BeatProfile]) -> Result<()> {
    let identity = SourceIdentity::from_path(input);
    println!("{}", identity);
    for &profile in profiles {
        let Some(timeline) = store.load(&identity, profile)? else {
            println!("  {:<10} not analyzed", profile.name());
            continue;
        };
        let summary = timeline.summary();
        let span = match (summary.first_ms, summary.last_ms) {
            (Some(first), Some(last)) => format!("{:.1}s-{:.1}s", first as f64 / 1000.0, last as f64 / 1000.0),
            _ => "-".to_string(),
        };
        let tempo = summary
            .tempo_bpm
            .map(|bpm| format!("~{:.0} BPM", bpm))
            .unwrap_or_else(|| "tempo unknown".to_string());
        println!("  {:<10} {:>6} beats  {:<16} {}", profile.name(), summary.beats, span, tempo);
    }
    Ok(())
}

fn play(config: &Config, store: &TimelineStore, input: &Path, profiles: &[BeatProfile], start_ms: i64) -> Result<()> {
    let identity = SourceIdentity::from_path(input);
    let mut timelines: Vec<BeatTimeline> = Vec::new();
    for &profile in profiles {
        if let Some(timeline) = store.load(&identity, profile)? {
            timelines.push(timeline);
        }
    }
    if timelines.is_empty() {
        anyhow::bail!("No timelines for {}; run `haptibeat analyze` first", input.display());
    }

    let end_ms = timelines
        .iter()
        .flat_map(|t| t.beats().iter().map(|b| b.end_ms()))
        .max()
        .unwrap_or(0);

    let slot = ResourceSlot::new("haptic actuator");
    let mut engine = SyncEngine::new(
        config.playback.clone(),
        DeviceAssignment::new(config.devices()),
        LogActuator::new(),
        &slot,
    )?;
    engine.load(identity, timelines)?;
    engine.seek(start_ms);

    log::info!("Playing from {}ms to {}ms", start_ms, end_ms);
    let mut player = WallClockPlayer::new(start_ms, end_ms + 500);
    let stats = run_ticks(&mut engine, &mut player, &CancelToken::new());
    log::info!(
        "{} ticks, {} over budget, slowest {:?}",
        stats.ticks,
        stats.over_budget,
        stats.slowest
    );
    Ok(())
}

fn squeeze(config: &Config, listen: Duration) -> Result<()> {
    let probe = Arc::new(CpalProbe::new(config.squeeze.buffer_ms));
    let mut detector = SqueezeDetector::new(config.squeeze.clone(), probe, ResourceSlot::new("audio hardware"));
    let (tx, rx) = crossbeam_channel::bounded(16);
    detector.start(tx).context("Failed to start squeeze detector")?;

    println!("Calibrating, keep the device still...");
    let deadline = Instant::now() + listen;
    let mut triggers = 0usize;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(remaining) {
            Ok(SqueezeEvent::CalibrationComplete { baseline }) => {
                println!("Ready (baseline {:.2}). Squeeze away.", baseline);
            }
            Ok(SqueezeEvent::Triggered { magnitude, baseline }) => {
                triggers += 1;
                println!("Squeeze #{} ({:.0}% of baseline)", triggers, magnitude / baseline * 100.0);
            }
            Ok(SqueezeEvent::Failed(reason)) => {
                detector.stop();
                anyhow::bail!("Squeeze detector failed: {}", reason);
            }
            Err(_) => break,
        }
    }

    detector.stop();
    println!("{} squeezes detected", triggers);
    Ok(())
}
