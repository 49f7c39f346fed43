//! # pixel_telescope
//!
//! pixel_telescope is a Rust library that ingests the live readout streams of a pixel
//! detector telescope. Every detector module publishes its readouts over ZeroMQ as a pair of
//! messages: a JSON metadata part followed by the raw payload. pixel_telescope subscribes
//! to every module, turns the raw front-end words into pixel hits, suppresses noisy
//! pixels and hands the consumer one hit list per module on every poll.
//!
//! A companion replay tool re-emits previously recorded runs onto the same streams, with
//! the recorded spacing between readouts, so the whole chain can be exercised without
//! hardware.
//!
//! ## Installation
//!
//! The only method of install is from source.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### HDF5 and ZeroMQ
//!
//! Recorded runs are HDF5 files and the streams are ZeroMQ sockets, so both libraries must
//! be installed before building. Typically these are installed using a package manager
//! (homebrew, apt, etc). If HDF5 lives in a custom location, write the following snippet
//! into the file `.cargo/config.toml` in the repository:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! ### Building & Install
//!
//! To build and install the monitor use `cargo install --path ./pixel_telescope_cli` and
//! for the replay tool `cargo install --path ./pixel_telescope_replay` from the top level
//! of the repository. Both take a configuration file with `-p/--path`; the `new`
//! subcommand writes a template to that path.
//!
//! ## Configuration
//!
//! The monitor and the replay tool share one YAML configuration file:
//!
//! ```yml
//! modules:
//! - name: module_0
//!   address: tcp://127.0.0.1:5678
//!   raw_data_path: unit_test_data_2.h5
//!   delay: 0.0
//! - name: module_1
//!   address: tcp://127.0.0.1:5679
//!   raw_data_path: unit_test_data_5.h5
//!   delay: 0.0
//! max_hits: 10
//! scan_policy: bounded_scan
//! payload_timeout_ms: 50
//! combine_readouts: 20
//! poll_interval_ms: 16
//! loop_replay: true
//! ```
//!
//! - modules: One entry per detector module. The order of the list is the module index
//! used in every result. `raw_data_path` and `delay` are only read by the replay tool.
//! - max_hits: Maximum number of hits kept per module per readout. Also the depth of the
//! noise history.
//! - scan_policy: `bounded_scan` only looks at the first 100 words of a readout,
//! `full_scan` looks at all of them.
//! - payload_timeout_ms: How long to wait for the payload once its metadata arrived.
//! - combine_readouts: Number of polls combined before the monitor looks for tracks.
//! - poll_interval_ms: Time between two polls of the monitor.
//! - loop_replay: Replay runs forever instead of once.
//!
//! ## Data Flow
//!
//! ```text
//! replay (one thread per module) -> ZeroMQ PUB -> ChannelReader -> Aggregator::poll_all
//!                                                       |
//!                              classify + extract hits -> noise filter -> Vec<ModuleHits>
//! ```
//!
//! ### Recorded Run Format
//!
//! ```text
//! run.h5
//! |---- raw_data(dset) - u32 words of all readouts back to back
//! |---- meta_data(dset) - index_start, index_stop, data_length, timestamp_start, timestamp_stop, error
//! ```
pub mod aggregator;
pub mod channel_reader;
pub mod clock;
pub mod config;
pub mod constants;
pub mod data_record;
pub mod error;
pub mod noise_filter;
pub mod raw_data_file;
pub mod readout;
pub mod replay;
pub mod stream_status;
pub mod track;
pub mod transport;
