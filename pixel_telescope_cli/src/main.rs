//! # pixel_telescope_cli
//!
//! Part of the pixel_telescope crate family.
//!
//! A terminal monitor for the telescope. Subscribes to every configured module, polls
//! them at a fixed cadence and logs the combined hits and track candidates.
//!
//! ## Use
//!
//! ```bash
//! pixel_telescope_cli -p config.yml
//! ```
//!
//! Use `pixel_telescope_cli new -p config.yml` to write a template configuration. Run
//! `pixel_telescope_replay` against the same file to feed the monitor from recorded runs.
use clap::{Arg, Command};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use libpixel_telescope::aggregator::Aggregator;
use libpixel_telescope::config::Config;
use libpixel_telescope::track::{find_track, ReadoutAccumulator};

/// How often channel statistics are written to the log
const STATS_INTERVAL: Duration = Duration::from_secs(10);

fn main() {
    // Create a cli
    let matches = Command::new("pixel_telescope_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the configuration file"),
        )
        .arg(
            Arg::new("polls")
                .short('n')
                .long("polls")
                .value_parser(clap::value_parser!(u64))
                .help("Stop after this many polls (default: run until stopped)"),
        )
        .get_matches();

    // Initialize feedback
    if let Err(e) = simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    ) {
        eprintln!("Could not create logging: {e}");
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
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    for (idx, module) in config.modules.iter().enumerate() {
        log::info!("Module {idx}: {} at {}", module.name, module.address);
    }
    log::info!("Max hits: {}", config.max_hits);
    log::info!("Scan policy: {:?}", config.scan_policy);
    log::info!("Combine readouts: {}", config.combine_readouts);

    let context = zmq::Context::new();
    let mut aggregator = match Aggregator::connect(&context, &config) {
        Ok(a) => a,
        Err(e) => {
            log::error!("Failed to connect to the modules: {e}");
            return;
        }
    };
    let mut accumulator = ReadoutAccumulator::new(config.n_modules(), config.combine_readouts);
    let max_polls = matches.get_one::<u64>("polls").copied();
    let poll_interval = config.poll_interval();

    let mut polls: u64 = 0;
    let mut tracks: u64 = 0;
    let mut last_stats = Instant::now();
    loop {
        let tick = Instant::now();
        let module_hits = aggregator.poll_all();
        polls += 1;

        if let Some(combined) = accumulator.push(&module_hits) {
            let counts: Vec<usize> = combined
                .iter()
                .map(|hits| hits.as_ref().map_or(0, |h| h.len()))
                .collect();
            log::debug!("Combined hits per module: {counts:?}");
            if let Some(track) = find_track(&combined) {
                tracks += 1;
                log::info!(
                    "Track {tracks}: module {} ({}, {}) -> module {} ({}, {})",
                    track.first_module,
                    track.first_hit.column,
                    track.first_hit.row,
                    track.last_module,
                    track.last_hit.column,
                    track.last_hit.row
                );
            }
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            last_stats = Instant::now();
            for (name, stats) in aggregator.stats() {
                log::info!(
                    "{name}: {} readouts, {} control, {} errors",
                    stats.readouts,
                    stats.control_messages,
                    stats.total_errors()
                );
            }
        }

        if max_polls.is_some_and(|max| polls >= max) {
            break;
        }
        if let Some(rest) = poll_interval.checked_sub(tick.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    log::info!("Done after {polls} polls, {tracks} track candidates.");
}
