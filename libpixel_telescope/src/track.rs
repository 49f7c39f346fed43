//! Caller side policies applied on top of the aggregated hit lists.
//!
//! Low rate sources deliver bursty readouts, so consumers usually combine several polls
//! before acting on them. Once a combined window has hits on every module, the simplest
//! possible track candidate is drawn through one hit of the first and one hit of the last
//! module.
use bit_set::BitSet;

use super::aggregator::ModuleHits;
use super::data_record::Hit;

/// Combines the hit lists of several consecutive polls, module by module.
///
/// Hits are copied into the accumulator, so the per-poll results stay untouched.
#[derive(Debug, Clone)]
pub struct ReadoutAccumulator {
    window: usize,
    polls: usize,
    combined: Vec<ModuleHits>,
}

impl ReadoutAccumulator {
    /// `window` polls are combined before a result is released. A window of 0 is treated
    /// as 1.
    pub fn new(n_modules: usize, window: usize) -> Self {
        Self {
            window: window.max(1),
            polls: 0,
            combined: vec![None; n_modules],
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Add the result of one poll. Returns the combined hits once the window is full and
    /// starts a new window.
    pub fn push(&mut self, module_hits: &[ModuleHits]) -> Option<Vec<ModuleHits>> {
        for (slot, hits) in self.combined.iter_mut().zip(module_hits.iter()) {
            if let Some(hits) = hits {
                if hits.is_empty() {
                    continue;
                }
                slot.get_or_insert_with(Vec::new).extend_from_slice(hits);
            }
        }
        self.polls += 1;
        if self.polls >= self.window {
            Some(self.flush())
        } else {
            None
        }
    }

    /// Release whatever has been combined so far and start a new window
    pub fn flush(&mut self) -> Vec<ModuleHits> {
        self.polls = 0;
        let n_modules = self.combined.len();
        std::mem::replace(&mut self.combined, vec![None; n_modules])
    }
}

/// A straight line candidate through two modules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Track {
    pub first_module: usize,
    pub first_hit: Hit,
    pub last_module: usize,
    pub last_hit: Hit,
}

/// Modules with at least one hit
pub fn hit_modules(module_hits: &[ModuleHits]) -> BitSet {
    module_hits
        .iter()
        .enumerate()
        .filter(|(_, hits)| hits.as_ref().is_some_and(|h| !h.is_empty()))
        .map(|(idx, _)| idx)
        .collect()
}

/// Form a track candidate if every module was hit.
///
/// Uses the most recent hit of the first and of the last module. Needs at least two
/// modules; only one candidate is returned even when more are possible.
pub fn find_track(module_hits: &[ModuleHits]) -> Option<Track> {
    let n_modules = module_hits.len();
    if n_modules < 2 || hit_modules(module_hits).len() != n_modules {
        return None;
    }
    let first_hit = *module_hits[0].as_ref()?.last()?;
    let last_hit = *module_hits[n_modules - 1].as_ref()?.last()?;
    Some(Track {
        first_module: 0,
        first_hit,
        last_module: n_modules - 1,
        last_hit,
    })
}
