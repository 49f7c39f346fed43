use fxhash::FxHashSet;

use super::data_record::Hit;

/// The most recently accepted hits of one module, newest first.
///
/// Used as an exclusion set so that a noisy pixel firing in consecutive readouts is only
/// reported once per appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleHistory {
    hits: Vec<Hit>,
}

impl ModuleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hit: &Hit) -> bool {
        self.hits.contains(hit)
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    pub fn clear(&mut self) {
        self.hits.clear()
    }

    /// Put the accepted hits in front of the history and keep at most `depth` entries
    fn prepend(&mut self, accepted: &[Hit], depth: usize) {
        let mut updated = Vec::with_capacity((accepted.len() + self.hits.len()).min(depth));
        updated.extend(accepted.iter().chain(self.hits.iter()).take(depth).copied());
        self.hits = updated;
    }
}

/// Drop hits already present in the history and record the survivors.
///
/// The returned hits keep their original order. They are then prepended to the history,
/// which is truncated to `max_hits`. An empty input leaves the history untouched.
pub fn filter_and_update(hits: &[Hit], history: &mut ModuleHistory, max_hits: usize) -> Vec<Hit> {
    if hits.is_empty() {
        return Vec::new();
    }
    let seen: FxHashSet<Hit> = history.hits.iter().copied().collect();
    let accepted: Vec<Hit> = hits.iter().filter(|hit| !seen.contains(*hit)).copied().collect();
    history.prepend(&accepted, max_hits);
    accepted
}
