use hdf5::{File, H5Type};
use std::path::{Path, PathBuf};

use super::constants::{META_DATA_NAME, RAW_DATA_NAME};
use super::error::RawDataFileError;

/// One row of the `meta_data` table of a recorded run
#[derive(H5Type, Debug, Clone, Copy, PartialEq)]
#[repr(C)]
struct MetaDataRow {
    index_start: u32,
    index_stop: u32,
    data_length: u32,
    timestamp_start: f64,
    timestamp_stop: f64,
    error: u32,
}

/// Bookkeeping of one readout: where its words sit in the raw data and when it was taken
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadoutRecord {
    pub index_start: usize,
    pub index_stop: usize,
    pub timestamp_start: f64,
    pub timestamp_stop: f64,
    pub error: i64,
}

/// A readout borrowed from a recorded run
#[derive(Debug, Clone, Copy)]
pub struct Readout<'a> {
    pub words: &'a [u32],
    pub timestamp_start: f64,
    pub timestamp_stop: f64,
    pub error: i64,
}

/// RecordedRun holds a previously taken run in memory.
///
/// Runs are stored as HDF5 files with two datasets: `raw_data`, the concatenated words
/// of every readout, and `meta_data`, one row per readout with the word range and the
/// start/stop timestamps (seconds) and error flag of the readout.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRun {
    name: String,
    raw_data: Vec<u32>,
    readouts: Vec<ReadoutRecord>,
}

impl RecordedRun {
    /// Build a run from raw data and readout records, checking every word range
    pub fn new(
        name: &str,
        raw_data: Vec<u32>,
        readouts: Vec<ReadoutRecord>,
    ) -> Result<Self, RawDataFileError> {
        if readouts.is_empty() {
            return Err(RawDataFileError::Empty);
        }
        for (index, record) in readouts.iter().enumerate() {
            if record.index_start > record.index_stop || record.index_stop > raw_data.len() {
                return Err(RawDataFileError::BadReadoutRange {
                    index,
                    start: record.index_start as u64,
                    stop: record.index_stop as u64,
                    len: raw_data.len(),
                });
            }
        }
        Ok(Self {
            name: name.to_string(),
            raw_data,
            readouts,
        })
    }

    /// Build a run from separate word buffers, one per readout
    pub fn from_buffers(
        name: &str,
        buffers: Vec<(Vec<u32>, f64, f64, i64)>,
    ) -> Result<Self, RawDataFileError> {
        let mut raw_data = Vec::new();
        let mut readouts = Vec::with_capacity(buffers.len());
        for (words, timestamp_start, timestamp_stop, error) in buffers {
            let index_start = raw_data.len();
            raw_data.extend_from_slice(&words);
            readouts.push(ReadoutRecord {
                index_start,
                index_stop: raw_data.len(),
                timestamp_start,
                timestamp_stop,
                error,
            });
        }
        Self::new(name, raw_data, readouts)
    }

    /// Load a recorded run from an HDF5 file
    pub fn open(path: &Path) -> Result<Self, RawDataFileError> {
        if !path.exists() {
            return Err(RawDataFileError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let raw_data = file.dataset(RAW_DATA_NAME)?.read_raw::<u32>()?;
        let rows = file.dataset(META_DATA_NAME)?.read_raw::<MetaDataRow>()?;
        let readouts = rows
            .iter()
            .map(|row| ReadoutRecord {
                index_start: row.index_start as usize,
                index_stop: row.index_stop as usize,
                timestamp_start: row.timestamp_start,
                timestamp_stop: row.timestamp_stop,
                error: row.error as i64,
            })
            .collect();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::new(&name, raw_data, readouts)
    }

    /// Write the run in the recorded run layout
    pub fn write(&self, path: &Path) -> Result<PathBuf, RawDataFileError> {
        let file = File::create(path)?;
        let rows: Vec<MetaDataRow> = self
            .readouts
            .iter()
            .map(|record| MetaDataRow {
                index_start: record.index_start as u32,
                index_stop: record.index_stop as u32,
                data_length: (record.index_stop - record.index_start) as u32,
                timestamp_start: record.timestamp_start,
                timestamp_stop: record.timestamp_stop,
                error: record.error as u32,
            })
            .collect();
        file.new_dataset_builder()
            .with_data(self.raw_data.as_slice())
            .create(RAW_DATA_NAME)?;
        file.new_dataset_builder()
            .with_data(rows.as_slice())
            .create(META_DATA_NAME)?;
        file.close()?;
        Ok(path.to_path_buf())
    }

    /// File name of the run, sent as the run start notice
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.readouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readouts.is_empty()
    }

    /// Total size of the raw data in bytes
    pub fn size_bytes(&self) -> u64 {
        (self.raw_data.len() * std::mem::size_of::<u32>()) as u64
    }

    pub fn records(&self) -> &[ReadoutRecord] {
        &self.readouts
    }

    pub fn readout(&self, index: usize) -> Option<Readout<'_>> {
        let record = self.readouts.get(index)?;
        Some(Readout {
            words: &self.raw_data[record.index_start..record.index_stop],
            timestamp_start: record.timestamp_start,
            timestamp_stop: record.timestamp_stop,
            error: record.error,
        })
    }

    /// Readouts in recorded order
    pub fn iter(&self) -> impl Iterator<Item = Readout<'_>> {
        (0..self.readouts.len()).filter_map(|idx| self.readout(idx))
    }

    /// Recorded duration from the start of the first to the stop of the last readout
    pub fn duration_seconds(&self) -> f64 {
        match (self.readouts.first(), self.readouts.last()) {
            (Some(first), Some(last)) => last.timestamp_stop - first.timestamp_start,
            _ => 0.0,
        }
    }

    /// Recorded start of the run as a UTC date string
    pub fn start_time_string(&self) -> String {
        let start = self.readouts.first().map(|r| r.timestamp_start).unwrap_or(0.0);
        let format = time::macros::format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second] UTC"
        );
        time::OffsetDateTime::from_unix_timestamp_nanos((start * 1e9) as i128)
            .ok()
            .and_then(|t| t.format(&format).ok())
            .unwrap_or_else(|| format!("{start:.3} s"))
    }
}
