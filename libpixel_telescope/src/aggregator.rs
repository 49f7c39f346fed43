use std::time::Duration;

use super::channel_reader::{ChannelEvent, ChannelReader, ChannelStats};
use super::config::Config;
use super::data_record::{extract_hits, Hit, ScanPolicy};
use super::error::{ChannelError, TransportError};
use super::noise_filter::filter_and_update;
use super::transport::{Subscriber, ZmqSubscriber};

/// Hits of one module for one poll. `None` means the module delivered no readout.
pub type ModuleHits = Option<Vec<Hit>>;

/// Aggregator polls every module once per call and turns new readouts into hit lists.
///
/// Intended to be driven from the consumer's update tick. A poll never waits on a module
/// that has nothing queued, and a failure on one module only blanks that module's slot.
#[derive(Debug)]
pub struct Aggregator<S: Subscriber> {
    readers: Vec<ChannelReader<S>>,
    max_hits: usize,
    policy: ScanPolicy,
}

impl Aggregator<ZmqSubscriber> {
    /// Connect one subscriber per configured module, in configuration order
    pub fn connect(context: &zmq::Context, config: &Config) -> Result<Self, TransportError> {
        let mut readers = Vec::with_capacity(config.n_modules());
        for module in config.modules.iter() {
            let subscriber = ZmqSubscriber::connect(context, &module.address)?;
            readers.push(ChannelReader::new(
                &module.name,
                subscriber,
                config.payload_timeout(),
            ));
        }
        Ok(Self::new(readers, config.max_hits, config.scan_policy))
    }
}

impl<S: Subscriber> Aggregator<S> {
    pub fn new(readers: Vec<ChannelReader<S>>, max_hits: usize, policy: ScanPolicy) -> Self {
        Self {
            readers,
            max_hits,
            policy,
        }
    }

    /// Build readers around already connected subscribers, named by index
    pub fn from_subscribers(
        subscribers: Vec<S>,
        payload_timeout: Duration,
        max_hits: usize,
        policy: ScanPolicy,
    ) -> Self {
        let readers = subscribers
            .into_iter()
            .enumerate()
            .map(|(idx, sub)| ChannelReader::new(&format!("module_{idx}"), sub, payload_timeout))
            .collect();
        Self::new(readers, max_hits, policy)
    }

    pub fn n_modules(&self) -> usize {
        self.readers.len()
    }

    pub fn readers(&self) -> &[ChannelReader<S>] {
        &self.readers
    }

    pub fn stats(&self) -> Vec<(&str, &ChannelStats)> {
        self.readers
            .iter()
            .map(|reader| (reader.name(), reader.stats()))
            .collect()
    }

    /// Poll every module once.
    ///
    /// Returns one slot per module, in configuration order. A slot holds the new
    /// (noise filtered) hits of a readout, at most `max_hits` of them, or `None` if the
    /// module had no readout this cycle or its readout could not be decoded.
    pub fn poll_all(&mut self) -> Vec<ModuleHits> {
        let max_hits = self.max_hits;
        let policy = self.policy;
        self.readers
            .iter_mut()
            .map(|reader| match poll_module(reader, max_hits, policy) {
                Ok(hits) => hits,
                Err(e) => {
                    log::warn!("Module {} skipped this cycle: {e}", reader.name());
                    None
                }
            })
            .collect()
    }
}

fn poll_module<S: Subscriber>(
    reader: &mut ChannelReader<S>,
    max_hits: usize,
    policy: ScanPolicy,
) -> Result<ModuleHits, ChannelError> {
    let frame = match reader.poll()? {
        ChannelEvent::Readout(frame) => frame,
        ChannelEvent::Idle | ChannelEvent::Control(_) => return Ok(None),
    };
    let words = match frame.words() {
        Ok(words) => words,
        Err(e) => {
            let error = ChannelError::from(e);
            reader.record_error(&error);
            return Err(error);
        }
    };
    let hits = extract_hits(&words, max_hits, policy);
    Ok(Some(filter_and_update(&hits, reader.history_mut(), max_hits)))
}
