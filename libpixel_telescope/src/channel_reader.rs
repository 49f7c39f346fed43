use std::time::Duration;

use super::error::ChannelError;
use super::noise_filter::ModuleHistory;
use super::readout::{ControlMessage, MetaMessage, ReadoutFrame};
use super::transport::Subscriber;

/// Outcome of one poll of a module's channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Nothing was waiting on the channel
    Idle,
    /// A complete readout (metadata and payload)
    Readout(ReadoutFrame),
    /// A control notice, such as the start of a run. Carries no hits.
    Control(ControlMessage),
}

/// Running counts of what a channel has seen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub readouts: u64,
    pub control_messages: u64,
    pub idle_polls: u64,
    pub decode_errors: u64,
    pub protocol_errors: u64,
    pub transport_errors: u64,
}

impl ChannelStats {
    pub fn record_error(&mut self, error: &ChannelError) {
        match error {
            ChannelError::MissingPayload(_) => self.protocol_errors += 1,
            ChannelError::Decode(_) => self.decode_errors += 1,
            ChannelError::Transport(_) => self.transport_errors += 1,
        }
    }

    pub fn total_errors(&self) -> u64 {
        self.decode_errors + self.protocol_errors + self.transport_errors
    }
}

/// ChannelReader owns the subscriber endpoint and noise history of one module.
///
/// Each poll performs the two-part receive protocol: a non-blocking receive of the
/// metadata part, then, for `ReadoutData` only, a bounded wait for the payload part which
/// the sender always publishes right behind it. Failures only affect the current poll;
/// the endpoint stays open for the next one.
#[derive(Debug)]
pub struct ChannelReader<S: Subscriber> {
    name: String,
    subscriber: S,
    history: ModuleHistory,
    payload_timeout: Duration,
    stats: ChannelStats,
}

impl<S: Subscriber> ChannelReader<S> {
    pub fn new(name: &str, subscriber: S, payload_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            subscriber,
            history: ModuleHistory::new(),
            payload_timeout,
            stats: ChannelStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn history(&self) -> &ModuleHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut ModuleHistory {
        &mut self.history
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// Count an error found while processing a readout this reader delivered
    pub fn record_error(&mut self, error: &ChannelError) {
        self.stats.record_error(error);
    }

    /// Poll the channel once. Never waits unless a readout header has already arrived.
    ///
    /// Consumes exactly one message, so a malformed or truncated message only costs the
    /// current poll.
    pub fn poll(&mut self) -> Result<ChannelEvent, ChannelError> {
        let result = self.receive();
        match &result {
            Ok(ChannelEvent::Idle) => self.stats.idle_polls += 1,
            Ok(ChannelEvent::Readout(_)) => self.stats.readouts += 1,
            Ok(ChannelEvent::Control(_)) => self.stats.control_messages += 1,
            Err(e) => self.stats.record_error(e),
        }
        result
    }

    fn receive(&mut self) -> Result<ChannelEvent, ChannelError> {
        let meta_bytes = match self.subscriber.try_receive()? {
            Some(bytes) => bytes,
            None => return Ok(ChannelEvent::Idle),
        };

        let result = self.handle_message(&meta_bytes);
        // Whatever happened, the next poll must start on a message boundary
        match self.subscriber.discard_message() {
            Ok(0) => (),
            Ok(n) => log::debug!("Module {} discarded {n} trailing message parts", self.name),
            Err(e) => log::warn!("Module {} failed to discard message parts: {e}", self.name),
        }
        result
    }

    fn handle_message(&mut self, meta_bytes: &[u8]) -> Result<ChannelEvent, ChannelError> {
        match MetaMessage::from_json(meta_bytes)? {
            MetaMessage::ReadoutData(header) => {
                let missing = ChannelError::MissingPayload(self.payload_timeout.as_millis() as u64);
                if !self.subscriber.more_parts() {
                    return Err(missing);
                }
                let payload = self
                    .subscriber
                    .receive_timeout(self.payload_timeout)?
                    .ok_or(missing)?;
                let frame = ReadoutFrame::from_parts(&self.name, header, payload)?;
                Ok(ChannelEvent::Readout(frame))
            }
            MetaMessage::RunStart(control) => {
                log::info!(
                    "Start run for module {}: {}",
                    self.name,
                    serde_json::Value::Object(control.fields.clone())
                );
                Ok(ChannelEvent::Control(control))
            }
            MetaMessage::Ignored(control) => {
                log::debug!(
                    "Module {} ignored control message {}",
                    self.name,
                    control.name
                );
                Ok(ChannelEvent::Control(control))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::transport::{memory_channel, MemoryPublisher, MemorySubscriber, Publisher};

    fn reader() -> (MemoryPublisher, ChannelReader<MemorySubscriber>) {
        let (publisher, subscriber) = memory_channel(64);
        (
            publisher,
            ChannelReader::new("module_0", subscriber, Duration::from_millis(10)),
        )
    }

    fn publish_frame(publisher: &MemoryPublisher, frame: &ReadoutFrame) {
        let meta = frame.metadata_json().unwrap();
        assert!(publisher.publish(&[meta.as_slice(), frame.raw_bytes.as_slice()]).unwrap());
    }

    #[test]
    fn test_idle_without_message() {
        let (_publisher, mut reader) = reader();
        assert_eq!(reader.poll().unwrap(), ChannelEvent::Idle);
        assert_eq!(reader.stats().idle_polls, 1);
    }

    #[test]
    fn test_readout_received() {
        let (publisher, mut reader) = reader();
        let frame = ReadoutFrame::from_words("module_0", &[0x0020_5000, 7], 1.0, 1.1, 0);
        publish_frame(&publisher, &frame);
        assert_eq!(reader.poll().unwrap(), ChannelEvent::Readout(frame));
        assert_eq!(reader.poll().unwrap(), ChannelEvent::Idle);
        assert_eq!(reader.stats().readouts, 1);
    }

    #[test]
    fn test_run_start_is_control() {
        let (publisher, mut reader) = reader();
        let meta = MetaMessage::RunStart(ControlMessage::run_start(serde_json::json!("run_12.h5")))
            .to_json()
            .unwrap();
        publisher.publish(&[meta.as_slice()]).unwrap();
        match reader.poll().unwrap() {
            ChannelEvent::Control(control) => {
                assert_eq!(control.name, "Filename");
                assert_eq!(control.fields["conf"], "run_12.h5");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(reader.stats().control_messages, 1);
    }

    #[test]
    fn test_missing_payload_is_protocol_error() {
        let (publisher, mut reader) = reader();
        let frame = ReadoutFrame::from_words("module_0", &[1, 2], 1.0, 1.1, 0);
        let meta = frame.metadata_json().unwrap();
        publisher.publish(&[meta.as_slice()]).unwrap();
        assert!(matches!(
            reader.poll(),
            Err(ChannelError::MissingPayload(10))
        ));
        assert_eq!(reader.stats().protocol_errors, 1);

        // The channel keeps working afterwards
        publish_frame(&publisher, &frame);
        assert_eq!(reader.poll().unwrap(), ChannelEvent::Readout(frame));
    }

    #[test]
    fn test_truncated_readout_does_not_eat_next_message() {
        let (publisher, mut reader) = reader();
        let frame = ReadoutFrame::from_words("module_0", &[0x0020_5000], 1.0, 1.1, 0);
        let meta = frame.metadata_json().unwrap();
        // Header without payload, with a complete readout already queued behind it
        publisher.publish(&[meta.as_slice()]).unwrap();
        publish_frame(&publisher, &frame);
        assert!(matches!(reader.poll(), Err(ChannelError::MissingPayload(_))));
        assert_eq!(reader.poll().unwrap(), ChannelEvent::Readout(frame));
        assert_eq!(reader.poll().unwrap(), ChannelEvent::Idle);
        assert_eq!(reader.stats().protocol_errors, 1);
        assert_eq!(reader.stats().decode_errors, 0);
    }

    #[test]
    fn test_malformed_header_skips_its_payload() {
        let (publisher, mut reader) = reader();
        let frame = ReadoutFrame::from_words("module_0", &[0x0020_5000], 1.0, 1.1, 0);
        publisher
            .publish(&[
                &br#"{"name": "ReadoutData", "dtype": "uint32"}"#[..],
                frame.raw_bytes.as_slice(),
            ])
            .unwrap();
        publish_frame(&publisher, &frame);
        assert!(matches!(
            reader.poll(),
            Err(ChannelError::Decode(DecodeError::BadReadoutHeader(_)))
        ));
        assert_eq!(reader.poll().unwrap(), ChannelEvent::Readout(frame));
        assert_eq!(reader.stats().decode_errors, 1);
    }

    #[test]
    fn test_extra_parts_are_dropped() {
        let (publisher, mut reader) = reader();
        let frame = ReadoutFrame::from_words("module_0", &[7], 1.0, 1.1, 0);
        let meta = frame.metadata_json().unwrap();
        publisher
            .publish(&[meta.as_slice(), frame.raw_bytes.as_slice(), &b"extra"[..]])
            .unwrap();
        let control = MetaMessage::Ignored(ControlMessage {
            name: String::from("Status"),
            fields: serde_json::Map::new(),
        })
        .to_json()
        .unwrap();
        publisher
            .publish(&[control.as_slice(), &b"unexpected"[..]])
            .unwrap();
        publish_frame(&publisher, &frame);
        assert_eq!(reader.poll().unwrap(), ChannelEvent::Readout(frame.clone()));
        assert!(matches!(reader.poll().unwrap(), ChannelEvent::Control(_)));
        assert_eq!(reader.poll().unwrap(), ChannelEvent::Readout(frame));
        assert_eq!(reader.stats().total_errors(), 0);
    }

    #[test]
    fn test_size_mismatch_is_decode_error() {
        let (publisher, mut reader) = reader();
        let frame = ReadoutFrame::from_words("module_0", &[1, 2, 3], 1.0, 1.1, 0);
        let meta = frame.metadata_json().unwrap();
        publisher.publish(&[meta.as_slice(), &frame.raw_bytes[..8]]).unwrap();
        assert!(matches!(
            reader.poll(),
            Err(ChannelError::Decode(DecodeError::ShapeMismatch { .. }))
        ));
        assert_eq!(reader.stats().decode_errors, 1);
        assert_eq!(reader.poll().unwrap(), ChannelEvent::Idle);
    }
}
