// Bit windows of an FE-I4 data record word
pub const HIGH_WINDOW_MASK: u32 = 0x00FE0000;
pub const LOW_WINDOW_MASK: u32 = 0x0001FF00;
pub const HIGH_WINDOW_MAX: u32 = 0x00A00000;
pub const LOW_WINDOW_MAX: u32 = 0x00015000;
pub const COLUMN_SHIFT: u32 = 17;
pub const ROW_SHIFT: u32 = 8;

/// Number of words classified per readout under the bounded scan policy
pub const BOUNDED_SCAN_WORDS: usize = 100;

// Wire protocol tags
pub const READOUT_DATA_NAME: &str = "ReadoutData";
pub const FILENAME_NAME: &str = "Filename";

// Recorded run layout
pub const RAW_DATA_NAME: &str = "raw_data";
pub const META_DATA_NAME: &str = "meta_data";

pub const DEFAULT_MAX_HITS: usize = 10;
pub const DEFAULT_COMBINE_READOUTS: usize = 20;
pub const DEFAULT_PAYLOAD_TIMEOUT_MS: u64 = 50;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 16;
pub const DEFAULT_SEND_HWM: i32 = 1000;
