//! # pixel_telescope_replay
//!
//! Part of the pixel_telescope crate family.
//!
//! Replays recorded runs onto the module streams, one stream per configured module, with
//! the recorded spacing between readouts. Point the monitor (or any other subscriber) at
//! the same configuration file to consume the streams.
//!
//! ## Use
//!
//! ```bash
//! pixel_telescope_replay -p config.yml
//! ```
//!
//! Use `pixel_telescope_replay new -p config.yml` to write a template configuration.
//! Every module needs a `raw_data_path`. With `loop_replay: true` the runs are replayed
//! until the process is stopped.
use clap::{Arg, ArgAction, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::path::PathBuf;
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::time::Duration;

use libpixel_telescope::clock::Shutdown;
use libpixel_telescope::config::Config;
use libpixel_telescope::replay::spawn_from_config;
use libpixel_telescope::stream_status::{StreamState, StreamStatus};

fn make_bar(pb_manager: &MultiProgress, name: &str) -> ProgressBar {
    let pb = pb_manager.add(ProgressBar::new(100));
    if let Ok(style) =
        ProgressStyle::with_template("{prefix:>12} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_prefix(name.to_string());
    pb
}

fn update_bar(pb: &ProgressBar, status: &StreamStatus) {
    pb.set_position((status.progress * 100.0) as u64);
    pb.set_message(format!(
        "pass {} | sent {} | dropped {}",
        status.pass, status.sent, status.dropped
    ));
    match status.state {
        StreamState::Finished | StreamState::Stopped => pb.finish(),
        _ => (),
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("pixel_telescope_replay")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the configuration file"),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .action(ArgAction::SetTrue)
                .help("Replay every run once, overriding loop_replay"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    if let Err(e) = LogWrapper::new(pb_manager.clone(), logger).try_init() {
        eprintln!("Could not create logging/progress: {e}");
        return;
    }

    let config_path = match matches.get_one::<String>("path") {
        Some(path) => PathBuf::from(path),
        None => {
            log::error!("A configuration path is required (-p/--path)");
            return;
        }
    };

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        match Config::default().write_config_file(&config_path) {
            Ok(()) => log::info!("Done."),
            Err(e) => log::error!("{e}"),
        }
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let mut config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    if matches.get_flag("once") {
        config.loop_replay = false;
    }
    log::info!("Config successfully loaded.");
    log::info!("Modules: {}", config.n_modules());
    log::info!("Loop replay: {}", config.loop_replay);

    let context = zmq::Context::new();
    let shutdown = Shutdown::new();
    let (tx, rx) = channel::<StreamStatus>();
    let handles = match spawn_from_config(&context, &config, &shutdown, &tx) {
        Ok(handles) => handles,
        Err(e) => {
            log::error!("Failed to start replay: {e}");
            return;
        }
    };
    // Only the streams hold senders now, so the channel closes once all of them are done
    drop(tx);

    let bars: Vec<ProgressBar> = config
        .modules
        .iter()
        .map(|module| make_bar(&pb_manager, &module.name))
        .collect();

    loop {
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(status) => {
                if let Some(pb) = bars.get(status.stream_id) {
                    update_bar(pb, &status);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                // Looping streams only end on error; take the rest down with them
                if config.loop_replay
                    && !shutdown.is_triggered()
                    && handles.iter().any(|h| h.is_finished())
                {
                    log::warn!("A replay stream ended early, stopping the others");
                    shutdown.trigger();
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    for handle in handles {
        let stream_id = handle.stream_id();
        match handle.join() {
            Ok(status) => log::info!(
                "Stream {stream_id} done after {} passes: {} sent, {} dropped",
                status.pass,
                status.sent,
                status.dropped
            ),
            Err(e) => log::error!("Stream {stream_id} failed with error: {e}"),
        }
    }

    for pb in bars {
        pb.finish();
    }

    log::info!("Done.");
}
