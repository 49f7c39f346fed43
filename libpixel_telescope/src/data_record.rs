use bitvec::prelude::*;
use serde::{Deserialize, Serialize};

use super::constants::{
    BOUNDED_SCAN_WORDS, COLUMN_SHIFT, HIGH_WINDOW_MASK, HIGH_WINDOW_MAX, LOW_WINDOW_MASK,
    LOW_WINDOW_MAX, ROW_SHIFT,
};

/// A decoded pixel hit. Column comes from the high window of the data record, row from the
/// low window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hit {
    pub column: u16,
    pub row: u16,
}

impl Hit {
    pub fn new(column: u16, row: u16) -> Self {
        Self { column, row }
    }

    /// Decode the coordinates of a word. Only meaningful for words which pass
    /// [`is_data_record`].
    pub fn from_word(word: u32) -> Self {
        Self {
            column: ((word & HIGH_WINDOW_MASK) >> COLUMN_SHIFT) as u16,
            row: ((word & LOW_WINDOW_MASK) >> ROW_SHIFT) as u16,
        }
    }
}

/// How much of a readout buffer is classified when extracting hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPolicy {
    /// Classify only the first [`BOUNDED_SCAN_WORDS`] words and drop the remainder
    #[default]
    BoundedScan,
    /// Classify the whole buffer, then truncate the hit list
    FullScan,
}

impl ScanPolicy {
    fn scan_window<'a>(&self, words: &'a [u32]) -> &'a [u32] {
        match self {
            Self::BoundedScan => &words[..words.len().min(BOUNDED_SCAN_WORDS)],
            Self::FullScan => words,
        }
    }
}

/// Check if a raw front-end word is a data record (a genuine pixel hit).
///
/// Both bit windows must be non-zero and within range. The windows are compared masked,
/// not shifted.
pub fn is_data_record(word: u32) -> bool {
    let high = word & HIGH_WINDOW_MASK;
    let low = word & LOW_WINDOW_MASK;
    high != 0 && low != 0 && high <= HIGH_WINDOW_MAX && low <= LOW_WINDOW_MAX
}

/// Classify a whole buffer at once. Bit `i` of the mask is `is_data_record(words[i])`.
pub fn classify_words(words: &[u32]) -> BitVec {
    words.iter().map(|word| is_data_record(*word)).collect()
}

/// Decode the data records of a readout buffer into hits.
///
/// Non-hit words interleaved by the front-end are skipped before decoding. Order of the
/// qualifying words is preserved and at most `max_hits` hits are returned.
pub fn extract_hits(words: &[u32], max_hits: usize, policy: ScanPolicy) -> Vec<Hit> {
    let window = policy.scan_window(words);
    let mask = classify_words(window);
    mask.iter_ones()
        .take(max_hits)
        .map(|idx| Hit::from_word(window[idx]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(column: u32, row: u32) -> u32 {
        (column << COLUMN_SHIFT) | (row << ROW_SHIFT)
    }

    #[test]
    fn test_zero_window_is_not_record() {
        // high window in range, low window empty
        assert!(!is_data_record(0x00500000));
        // low window in range, high window empty
        assert!(!is_data_record(0x00005000));
        assert!(!is_data_record(0));
        // bits outside both windows do not matter
        assert!(!is_data_record(0xFF0000FF));
        for word in [0x0000_00FFu32, 0xFF00_00FF, 0x0100_0000, 0x0000_0001] {
            assert!(!is_data_record(word));
        }
    }

    #[test]
    fn test_valid_record() {
        let word = 0x00200000 | 0x00005000;
        assert!(is_data_record(word));
        let hit = Hit::from_word(word);
        assert_eq!(hit.column, (0x00200000u32 >> 17) as u16);
        assert_eq!(hit.row, (0x00005000u32 >> 8) as u16);
        assert_eq!(hit, Hit::new(16, 80));
    }

    #[test]
    fn test_window_limits() {
        assert!(is_data_record(HIGH_WINDOW_MAX | LOW_WINDOW_MAX));
        // One step past the high limit
        assert!(!is_data_record((HIGH_WINDOW_MAX + (1 << COLUMN_SHIFT)) | 0x100));
        // One step past the low limit
        assert!(!is_data_record((1 << COLUMN_SHIFT) | (LOW_WINDOW_MAX + (1 << ROW_SHIFT))));
        // Extra bits outside the windows do not change the outcome
        assert!(is_data_record(0xFF00_00FF | record(1, 1)));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let mut word: u32 = 0x1234_5678;
        for _ in 0..10_000 {
            word = word.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            assert_eq!(is_data_record(word), is_data_record(word));
            let high = word & HIGH_WINDOW_MASK;
            let low = word & LOW_WINDOW_MASK;
            if high == 0 || low == 0 {
                assert!(!is_data_record(word));
            }
        }
    }

    #[test]
    fn test_batch_matches_scalar() {
        let words: Vec<u32> = (0..500u32).map(|i| i.wrapping_mul(0x0003_3301)).collect();
        let mask = classify_words(&words);
        assert_eq!(mask.len(), words.len());
        for (word, bit) in words.iter().zip(mask.iter()) {
            assert_eq!(is_data_record(*word), *bit);
        }
    }

    #[test]
    fn test_extract_empty() {
        assert!(extract_hits(&[], 10, ScanPolicy::BoundedScan).is_empty());
        assert!(extract_hits(&[], 10, ScanPolicy::FullScan).is_empty());
    }

    #[test]
    fn test_extract_truncates_in_order() {
        let words: Vec<u32> = (1..=5).map(|i| record(i, i + 10)).collect();
        let hits = extract_hits(&words, 3, ScanPolicy::FullScan);
        assert_eq!(
            hits,
            vec![Hit::new(1, 11), Hit::new(2, 12), Hit::new(3, 13)]
        );
        let hits = extract_hits(&words, 3, ScanPolicy::BoundedScan);
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_extract_skips_control_words() {
        let words = vec![0x00E9_0000, record(4, 7), 0x0000_00AB, record(5, 8), 0];
        let hits = extract_hits(&words, 10, ScanPolicy::BoundedScan);
        assert_eq!(hits, vec![Hit::new(4, 7), Hit::new(5, 8)]);
    }

    #[test]
    fn test_bounded_scan_ignores_tail() {
        let mut words = vec![0u32; BOUNDED_SCAN_WORDS];
        words.push(record(7, 9));
        assert!(extract_hits(&words, 10, ScanPolicy::BoundedScan).is_empty());
        assert_eq!(
            extract_hits(&words, 10, ScanPolicy::FullScan),
            vec![Hit::new(7, 9)]
        );
    }
}
