//! Headless driver: scan a folder and warm the thumbnail cache.
//!
//! Usage: `raw-viewer <folder> [--filter N] [--no-sweep]`

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use raw_viewer::{Config, Coordinator, ViewerEvent, ViewerState};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "mimalloc-allocator")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const PUMP_INTERVAL: Duration = Duration::from_millis(10);

struct Args {
    folder: Option<PathBuf>,
    filter: Option<u8>,
    sweep: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        folder: None,
        filter: None,
        sweep: true,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--no-sweep" => args.sweep = false,
            "--filter" => {
                let value = iter.next().ok_or("--filter needs a value")?;
                let level = value
                    .parse::<u8>()
                    .ok()
                    .filter(|l| *l <= raw_viewer::MAX_RATING)
                    .ok_or_else(|| format!("invalid filter level: {value}"))?;
                args.filter = Some(level);
            }
            "-h" | "--help" => return Err(String::new()),
            other if other.starts_with('-') => return Err(format!("unknown option: {other}")),
            other => args.folder = Some(PathBuf::from(other)),
        }
    }
    Ok(args)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("raw_viewer=info")))
        .with_target(false)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            if !message.is_empty() {
                eprintln!("{message}");
            }
            eprintln!("usage: raw-viewer <folder> [--filter N] [--no-sweep]");
            return ExitCode::from(2);
        }
    };

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "config unreadable, using defaults");
            Config::default()
        }
    };

    let (mut viewer, events) = match Coordinator::with_defaults(config) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("failed to start: {e}");
            return ExitCode::FAILURE;
        }
    };

    let Some(folder) = args.folder.or_else(|| viewer.recent_folders().into_iter().next()) else {
        eprintln!("no folder given and no recent folder to reopen");
        return ExitCode::from(2);
    };

    println!("Scanning {}...", folder.display());
    viewer.open_folder(&folder);

    let started = Instant::now();
    let mut filter_pending = args.filter;
    loop {
        viewer.pump();

        for event in events.try_iter() {
            match event {
                ViewerEvent::ScanProgress { current, total, .. } => {
                    tracing::debug!(current, total, "scanning");
                }
                ViewerEvent::FolderLoaded { count, .. } => {
                    println!("Found {count} RAW files");
                    if !args.sweep {
                        viewer.stop_sweep();
                    }
                }
                ViewerEvent::FolderEmpty { folder } => {
                    println!("No RAW files in {}", folder.display());
                    return ExitCode::SUCCESS;
                }
                ViewerEvent::ScanFailed { folder, message } => {
                    eprintln!("Cannot scan {}: {message}", folder.display());
                    return ExitCode::FAILURE;
                }
                ViewerEvent::FilterApplied { level, count } => {
                    println!("Filter {level}+: {count} photos");
                }
                ViewerEvent::CurrentPreviewFailed { index } => {
                    tracing::warn!(index, "no preview for current photo");
                }
                ViewerEvent::LoadingProgress { percent } => {
                    tracing::debug!(percent, "thumbnails");
                }
                _ => {}
            }
        }

        if matches!(viewer.state(), ViewerState::Ready { .. }) {
            if let Some(level) = filter_pending.take() {
                viewer.set_filter(level);
                if !args.sweep {
                    viewer.stop_sweep();
                }
            }
        }

        if filter_pending.is_none() && viewer.is_idle() {
            break;
        }
        std::thread::sleep(PUMP_INTERVAL);
    }

    println!(
        "{} photos, thumbnails {}% ready ({:.1}s)",
        viewer.len(),
        viewer.loading_percent(),
        started.elapsed().as_secs_f32()
    );
    ExitCode::SUCCESS
}
