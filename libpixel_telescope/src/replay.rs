//! Replay of recorded runs onto live readout streams.
//!
//! Each stream owns one recorded run, one publisher and one thread. Readouts are sent in
//! recorded order with the recorded spacing between their start timestamps: before a
//! readout goes out, the stream sleeps for whatever part of the recorded gap has not
//! already passed since the previous emission. Streams are never early but may run late,
//! and a late stream does not try to catch up.
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::clock::{Clock, Shutdown, SystemClock};
use super::config::Config;
use super::error::ReplayError;
use super::raw_data_file::{Readout, RecordedRun};
use super::readout::{ControlMessage, MetaMessage, ReadoutFrame};
use super::stream_status::{StreamState, StreamStatus};
use super::transport::{Publisher, ZmqPublisher};

/// Progress is reported roughly this often per pass
const PROGRESS_FRACTION: f32 = 0.01;

/// Everything a stream needs besides its publisher and clock
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Fixed extra delay slept before every readout
    pub delay: Duration,
    /// Start over at the end of the run instead of stopping
    pub loop_replay: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            loop_replay: true,
        }
    }
}

/// One replay stream: a recorded run re-emitted through a publisher
pub struct ReplayStream<P: Publisher, C: Clock> {
    stream_id: usize,
    run: Arc<RecordedRun>,
    publisher: P,
    clock: C,
    options: ReplayOptions,
    shutdown: Shutdown,
    tx: Sender<StreamStatus>,
    status: StreamStatus,
}

impl<P: Publisher, C: Clock> ReplayStream<P, C> {
    pub fn new(
        stream_id: usize,
        run: Arc<RecordedRun>,
        publisher: P,
        clock: C,
        options: ReplayOptions,
        shutdown: Shutdown,
        tx: Sender<StreamStatus>,
    ) -> Self {
        Self {
            stream_id,
            run,
            publisher,
            clock,
            options,
            shutdown,
            tx,
            status: StreamStatus::new(stream_id, StreamState::Starting),
        }
    }

    pub fn stream_id(&self) -> usize {
        self.stream_id
    }

    /// Replay until the run is exhausted (no looping) or shutdown is triggered.
    ///
    /// Returns the final status of the stream.
    pub fn run(mut self) -> Result<StreamStatus, ReplayError> {
        self.report(StreamState::Starting, 0.0)?;
        self.send_run_start()?;
        loop {
            if !self.replay_pass()? {
                log::info!(
                    "Replay stream {} stopped after {} messages",
                    self.stream_id,
                    self.status.sent
                );
                self.report(StreamState::Stopped, self.status.progress)?;
                break;
            }
            self.status.pass += 1;
            log::debug!(
                "Replay stream {} finished pass {}",
                self.stream_id,
                self.status.pass
            );
            if !self.options.loop_replay {
                log::info!(
                    "Replay stream {} finished: {} sent, {} dropped",
                    self.stream_id,
                    self.status.sent,
                    self.status.dropped
                );
                self.report(StreamState::Finished, 1.0)?;
                break;
            }
        }
        Ok(self.status)
    }

    /// Send every readout of the run once. Returns false if shutdown cut the pass short.
    fn replay_pass(&mut self) -> Result<bool, ReplayError> {
        let run = Arc::clone(&self.run);
        let total = run.len();
        let report_every = ((total as f32 * PROGRESS_FRACTION) as usize).max(1);
        // (wall time of last emission, recorded start of last emission)
        let mut baseline: Option<(Duration, f64)> = None;
        self.report(StreamState::Replaying, 0.0)?;
        for (idx, readout) in run.iter().enumerate() {
            // The fixed delay counts towards the recorded gap
            if !self.options.delay.is_zero() && self.clock.sleep(self.options.delay, &self.shutdown)
            {
                return Ok(false);
            }
            if let Some((last_emit, last_start)) = baseline {
                let actual = self.clock.now().saturating_sub(last_emit).as_secs_f64();
                let recorded = readout.timestamp_start - last_start;
                let extra = recorded - actual;
                if extra > 0.0 {
                    match Duration::try_from_secs_f64(extra) {
                        Ok(extra) => {
                            if self.clock.sleep(extra, &self.shutdown) {
                                return Ok(false);
                            }
                        }
                        Err(_) => log::warn!(
                            "Replay stream {} skipped an unrepresentable gap of {extra} s",
                            self.stream_id
                        ),
                    }
                }
            }
            if self.shutdown.is_triggered() {
                return Ok(false);
            }
            self.emit(&readout)?;
            baseline = Some((self.clock.now(), readout.timestamp_start));

            if (idx + 1) % report_every == 0 {
                self.report(StreamState::Replaying, (idx + 1) as f32 / total as f32)?;
            }
        }
        Ok(true)
    }

    /// Publish one readout as a metadata part followed by its payload
    fn emit(&mut self, readout: &Readout<'_>) -> Result<(), ReplayError> {
        let frame = ReadoutFrame::from_words(
            self.run.name(),
            readout.words,
            readout.timestamp_start,
            readout.timestamp_stop,
            readout.error,
        );
        let meta = frame.metadata_json()?;
        if self
            .publisher
            .publish(&[meta.as_slice(), frame.raw_bytes.as_slice()])?
        {
            self.status.sent += 1;
        } else {
            self.status.dropped += 1;
        }
        Ok(())
    }

    /// Announce the run by its file name, the way a DAQ does at run start
    fn send_run_start(&mut self) -> Result<(), ReplayError> {
        let message = MetaMessage::RunStart(ControlMessage::run_start(
            serde_json::Value::String(self.run.name().to_string()),
        ));
        let meta = message.to_json()?;
        if !self.publisher.publish(&[meta.as_slice()])? {
            log::warn!(
                "Replay stream {} could not send its run start notice",
                self.stream_id
            );
        }
        Ok(())
    }

    fn report(&mut self, state: StreamState, progress: f32) -> Result<(), ReplayError> {
        self.status.state = state;
        self.status.progress = progress;
        self.tx.send(self.status.clone())?;
        Ok(())
    }
}

/// A replay stream running on its own thread
pub struct ReplayHandle {
    stream_id: usize,
    shutdown: Shutdown,
    handle: JoinHandle<Result<StreamStatus, ReplayError>>,
}

impl ReplayHandle {
    pub fn stream_id(&self) -> usize {
        self.stream_id
    }

    /// Ask the stream to stop. Any pending delay returns immediately.
    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<StreamStatus, ReplayError> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(ReplayError::Panicked(self.stream_id)),
        }
    }
}

/// Move a stream onto a new thread
pub fn spawn_stream<P, C>(stream: ReplayStream<P, C>) -> ReplayHandle
where
    P: Publisher + 'static,
    C: Clock + 'static,
{
    let stream_id = stream.stream_id;
    let shutdown = stream.shutdown.clone();
    let handle = std::thread::spawn(move || stream.run());
    ReplayHandle {
        stream_id,
        shutdown,
        handle,
    }
}

/// Start one ZeroMQ replay stream per configured module.
///
/// Every run is loaded and every endpoint bound before any thread starts, so a bad module
/// fails the whole replay up front.
pub fn spawn_from_config(
    context: &zmq::Context,
    config: &Config,
    shutdown: &Shutdown,
    tx: &Sender<StreamStatus>,
) -> Result<Vec<ReplayHandle>, ReplayError> {
    let mut streams = Vec::with_capacity(config.modules.len());
    for (stream_id, module) in config.modules.iter().enumerate() {
        let path = config.get_raw_data_path(module)?;
        let run = RecordedRun::open(&path)?;
        log::info!(
            "Module {} replays {} ({} readouts, {}) recorded at {} over {:.1} s",
            module.name,
            run.name(),
            run.len(),
            human_bytes::human_bytes(run.size_bytes() as f64),
            run.start_time_string(),
            run.duration_seconds()
        );
        let publisher = ZmqPublisher::bind(context, &module.address)?;
        log::info!("Module {} publishing on {}", module.name, module.address);
        let options = ReplayOptions {
            delay: Duration::try_from_secs_f64(module.delay).unwrap_or_default(),
            loop_replay: config.loop_replay,
        };
        streams.push(ReplayStream::new(
            stream_id,
            Arc::new(run),
            publisher,
            SystemClock::new(),
            options,
            shutdown.clone(),
            tx.clone(),
        ));
    }
    Ok(streams.into_iter().map(spawn_stream).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::transport::{memory_channel, MemorySubscriber, Subscriber};
    use std::sync::mpsc::channel;

    fn sample_run() -> Arc<RecordedRun> {
        Arc::new(
            RecordedRun::from_buffers(
                "sample.h5",
                vec![
                    (vec![0x0020_5000], 10.0, 10.1, 0),
                    (vec![0x0040_6000, 0x0060_7000], 10.5, 10.6, 0),
                    (vec![], 12.0, 12.2, 1),
                ],
            )
            .unwrap(),
        )
    }

    fn drain(sub: &mut MemorySubscriber) -> Vec<Vec<u8>> {
        let mut parts = Vec::new();
        while let Some(part) = sub.try_receive().unwrap() {
            parts.push(part);
        }
        parts
    }

    fn stream(
        clock: VirtualClock,
        options: ReplayOptions,
        shutdown: Shutdown,
    ) -> (
        ReplayStream<crate::transport::MemoryPublisher, VirtualClock>,
        MemorySubscriber,
        std::sync::mpsc::Receiver<StreamStatus>,
    ) {
        let (publisher, subscriber) = memory_channel(64);
        let (tx, rx) = channel();
        let stream = ReplayStream::new(0, sample_run(), publisher, clock, options, shutdown, tx);
        (stream, subscriber, rx)
    }

    fn once() -> ReplayOptions {
        ReplayOptions {
            delay: Duration::ZERO,
            loop_replay: false,
        }
    }

    #[test]
    fn test_sleeps_follow_recorded_gaps() {
        let clock = VirtualClock::new();
        let (stream, mut sub, _rx) = stream(clock.clone(), once(), Shutdown::new());
        let status = stream.run().unwrap();
        assert_eq!(status.state, StreamState::Finished);
        assert_eq!(status.sent, 3);
        assert_eq!(status.dropped, 0);
        // First readout goes out immediately; the rest wait for the recorded gaps
        let sleeps = clock.sleeps();
        assert_eq!(sleeps.len(), 2);
        assert!((sleeps[0].as_secs_f64() - 0.5).abs() < 1e-9);
        assert!((sleeps[1].as_secs_f64() - 1.5).abs() < 1e-9);
        // run start notice plus two parts per readout
        assert_eq!(drain(&mut sub).len(), 7);
    }

    #[test]
    fn test_slow_emission_is_not_slept_twice() {
        let clock = VirtualClock::new();
        let (publisher, _subscriber) = memory_channel(64);
        let (tx, _rx) = channel();
        // A publisher that takes 2 s per message, longer than any recorded gap
        struct Slow<P: Publisher> {
            inner: P,
            clock: VirtualClock,
        }
        impl<P: Publisher> Publisher for Slow<P> {
            fn publish(&self, parts: &[&[u8]]) -> Result<bool, crate::error::TransportError> {
                self.clock.advance(Duration::from_secs(2));
                self.inner.publish(parts)
            }
        }
        let slow = Slow {
            inner: publisher,
            clock: clock.clone(),
        };
        let stream = ReplayStream::new(
            0,
            sample_run(),
            slow,
            clock.clone(),
            once(),
            Shutdown::new(),
            tx,
        );
        stream.run().unwrap();
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_fixed_delay_before_every_readout() {
        let clock = VirtualClock::new();
        let options = ReplayOptions {
            delay: Duration::from_secs(1),
            loop_replay: false,
        };
        let (stream, _sub, _rx) = stream(clock.clone(), options, Shutdown::new());
        stream.run().unwrap();
        let sleeps = clock.sleeps();
        // The 0.5 s gap is covered by the delay, the 1.5 s gap only partly
        assert_eq!(sleeps.len(), 4);
        assert_eq!(sleeps[0], Duration::from_secs(1));
        assert_eq!(sleeps[1], Duration::from_secs(1));
        assert_eq!(sleeps[2], Duration::from_secs(1));
        assert!((sleeps[3].as_secs_f64() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_frames_match_recording() {
        let clock = VirtualClock::new();
        let (stream, mut sub, _rx) = stream(clock, once(), Shutdown::new());
        stream.run().unwrap();
        let parts = drain(&mut sub);
        match MetaMessage::from_json(&parts[0]).unwrap() {
            MetaMessage::RunStart(control) => {
                assert_eq!(control.fields["conf"], serde_json::json!("sample.h5"))
            }
            other => panic!("expected run start, got {other:?}"),
        }
        let header = match MetaMessage::from_json(&parts[3]).unwrap() {
            MetaMessage::ReadoutData(header) => header,
            other => panic!("expected readout data, got {other:?}"),
        };
        assert_eq!(header.shape, vec![2]);
        assert_eq!(header.timestamp_start, 10.5);
        let frame = ReadoutFrame::from_parts("module_0", header, parts[4].clone()).unwrap();
        assert_eq!(frame.words().unwrap(), vec![0x0040_6000, 0x0060_7000]);
        // Empty readouts still go out, flagged with their recorded error
        match MetaMessage::from_json(&parts[5]).unwrap() {
            MetaMessage::ReadoutData(header) => {
                assert_eq!(header.shape, vec![0]);
                assert_eq!(header.readout_error, 1);
            }
            other => panic!("expected readout data, got {other:?}"),
        }
        assert!(parts[6].is_empty());
    }

    #[test]
    fn test_looping_restarts_baseline() {
        let clock = VirtualClock::new();
        let shutdown = Shutdown::new();
        let options = ReplayOptions::default();
        let (publisher, mut subscriber) = memory_channel(1024);
        let (tx, rx) = channel();
        let stream = ReplayStream::new(
            3,
            sample_run(),
            publisher,
            clock.clone(),
            options,
            shutdown.clone(),
            tx,
        );
        let handle = spawn_stream(stream);
        // Wait for two passes, then stop
        loop {
            let status = rx.recv().unwrap();
            if status.pass >= 2 {
                handle.stop();
                break;
            }
        }
        let status = handle.join().unwrap();
        assert_eq!(status.stream_id, 3);
        assert_eq!(status.state, StreamState::Stopped);
        let sleeps = clock.sleeps();
        // Each pass sleeps 0.5 s and 1.5 s; the jump back to the first readout does not
        for pair in sleeps.chunks(2).take(2) {
            assert!((pair[0].as_secs_f64() - 0.5).abs() < 1e-9);
            assert!((pair[1].as_secs_f64() - 1.5).abs() < 1e-9);
        }
        let parts = drain(&mut subscriber);
        // Both passes carry the same frames
        assert_eq!(parts[1..7], parts[7..13]);
    }

    #[test]
    fn test_shutdown_before_start_sends_nothing() {
        let clock = VirtualClock::new();
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let (stream, mut sub, rx) = stream(clock, once(), shutdown);
        let status = stream.run().unwrap();
        assert_eq!(status.state, StreamState::Stopped);
        assert_eq!(status.sent, 0);
        // Only the run start notice went out
        assert_eq!(drain(&mut sub).len(), 1);
        let states: Vec<StreamState> = rx.try_iter().map(|s| s.state).collect();
        assert_eq!(
            states,
            vec![
                StreamState::Starting,
                StreamState::Replaying,
                StreamState::Stopped
            ]
        );
    }

    #[test]
    fn test_full_queue_counts_drops() {
        let clock = VirtualClock::new();
        let (publisher, mut subscriber) = memory_channel(3);
        let (tx, _rx) = channel();
        let stream = ReplayStream::new(
            0,
            sample_run(),
            publisher,
            clock,
            once(),
            Shutdown::new(),
            tx,
        );
        let status = stream.run().unwrap();
        // The run start notice and the first readout fill the queue
        assert_eq!(status.sent, 1);
        assert_eq!(status.dropped, 2);
        assert_eq!(drain(&mut subscriber).len(), 3);
    }
}
