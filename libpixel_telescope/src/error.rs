use std::path::PathBuf;
use thiserror::Error;

use super::stream_status::StreamStatus;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("Unknown element type {0:?} found in readout metadata")]
    UnknownDtype(String),
    #[error("Payload of {len} bytes is not a multiple of the element size {size}")]
    UnalignedPayload { len: usize, size: usize },
    #[error("Payload holds {elements} elements but shape {shape:?} requires {expected}")]
    ShapeMismatch {
        shape: Vec<usize>,
        elements: usize,
        expected: usize,
    },
    #[error("Element type {0} cannot hold raw data words")]
    NotRawWords(String),
    #[error("Metadata message is not valid JSON: {0}")]
    BadJson(String),
    #[error("Metadata message has no name tag")]
    MissingName,
    #[error("ReadoutData metadata is malformed: {0}")]
    BadReadoutHeader(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadJson(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("ZMQ socket failed: {0}")]
    Zmq(#[from] zmq::Error),
    #[error("Failed to bind publisher to {0}: {1}")]
    BindFailed(String, zmq::Error),
    #[error("Failed to connect subscriber to {0}: {1}")]
    ConnectFailed(String, zmq::Error),
    #[error("Transport endpoint is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("ReadoutData metadata arrived without its payload (waited up to {0} ms)")]
    MissingPayload(u64),
    #[error("Channel failed to decode readout: {0}")]
    Decode(#[from] DecodeError),
    #[error("Channel failed due to transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has no modules")]
    NoModules,
    #[error("Config max_hits must be at least 1")]
    BadMaxHits,
    #[error("Config combine_readouts must be at least 1")]
    BadCombineReadouts,
    #[error("Config lists address {0} for more than one module")]
    DuplicateAddress(String),
    #[error("Module {0} has no raw_data_path to replay")]
    NoRawDataPath(String),
}

#[derive(Debug, Error)]
pub enum RawDataFileError {
    #[error("Could not open raw data file because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Raw data file failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Readout {index} spans words {start}..{stop} but the raw data holds {len} words")]
    BadReadoutRange {
        index: usize,
        start: u64,
        stop: u64,
        len: usize,
    },
    #[error("Raw data file contains no readouts")]
    Empty,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Replay failed due to raw data file error: {0}")]
    RawDataError(#[from] RawDataFileError),
    #[error("Replay failed due to transport error: {0}")]
    TransportError(#[from] TransportError),
    #[error("Replay failed to encode metadata: {0}")]
    EncodeError(#[from] serde_json::Error),
    #[error("Replay failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Replay failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<StreamStatus>),
    #[error("Replay stream {0} panicked")]
    Panicked(usize),
}
