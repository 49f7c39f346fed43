//! Message transport for the readout stream.
//!
//! The stream is publish/subscribe with at-most-once delivery: a subscriber only sees
//! messages published after it connected, and a publisher whose queue is full drops the
//! message instead of blocking. Messages are sequences of parts which are delivered
//! atomically, one part per receive call.
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::constants::DEFAULT_SEND_HWM;
use super::error::TransportError;

/// Receiving side of the stream
pub trait Subscriber {
    /// Receive the next message part without waiting. `None` means nothing is queued.
    fn try_receive(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Receive the next message part, waiting at most `timeout`
    fn receive_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    /// True if the part received last is followed by more parts of the same message
    fn more_parts(&self) -> bool;

    /// Throw away the rest of the current message. Returns the number of parts discarded.
    fn discard_message(&mut self) -> Result<usize, TransportError> {
        let mut discarded = 0;
        while self.more_parts() {
            match self.try_receive()? {
                Some(_) => discarded += 1,
                None => break,
            }
        }
        Ok(discarded)
    }
}

/// Sending side of the stream
pub trait Publisher: Send {
    /// Publish one multi-part message without blocking.
    ///
    /// Returns `false` if the message was dropped because the outbound queue is full.
    /// Transports which drop silently (a ZeroMQ PUB socket at its high water mark) always
    /// return `true`, so their drops are not counted.
    fn publish(&self, parts: &[&[u8]]) -> Result<bool, TransportError>;
}

/// ZeroMQ SUB socket subscribed to every message of one module
pub struct ZmqSubscriber {
    address: String,
    socket: zmq::Socket,
    more: bool,
}

impl ZmqSubscriber {
    pub fn connect(context: &zmq::Context, address: &str) -> Result<Self, TransportError> {
        let socket = context.socket(zmq::SUB)?;
        socket.set_linger(0)?;
        socket.set_subscribe(b"")?;
        socket
            .connect(address)
            .map_err(|e| TransportError::ConnectFailed(address.to_string(), e))?;
        log::info!("Subscribed to {address}");
        Ok(Self {
            address: address.to_string(),
            socket,
            more: false,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Subscriber for ZmqSubscriber {
    fn try_receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.socket.recv_bytes(zmq::DONTWAIT) {
            Ok(bytes) => {
                self.more = self.socket.get_rcvmore()?;
                Ok(Some(bytes))
            }
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(TransportError::Zmq(e)),
        }
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let mut items = [self.socket.as_poll_item(zmq::POLLIN)];
        zmq::poll(&mut items, timeout.as_millis() as i64)?;
        if !items[0].is_readable() {
            return Ok(None);
        }
        self.try_receive()
    }

    fn more_parts(&self) -> bool {
        self.more
    }
}

/// ZeroMQ PUB socket bound to the address of one replay stream
pub struct ZmqPublisher {
    address: String,
    socket: zmq::Socket,
}

impl ZmqPublisher {
    pub fn bind(context: &zmq::Context, address: &str) -> Result<Self, TransportError> {
        Self::bind_with_hwm(context, address, DEFAULT_SEND_HWM)
    }

    /// Bind with an explicit send high water mark (queue depth in messages)
    pub fn bind_with_hwm(
        context: &zmq::Context,
        address: &str,
        send_hwm: i32,
    ) -> Result<Self, TransportError> {
        let socket = context.socket(zmq::PUB)?;
        socket.set_linger(0)?;
        socket.set_sndhwm(send_hwm)?;
        socket
            .bind(address)
            .map_err(|e| TransportError::BindFailed(address.to_string(), e))?;
        log::info!("Publishing on {address}");
        Ok(Self {
            address: address.to_string(),
            socket,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Publisher for ZmqPublisher {
    fn publish(&self, parts: &[&[u8]]) -> Result<bool, TransportError> {
        match self.socket.send_multipart(parts.iter().copied(), zmq::DONTWAIT) {
            Ok(()) => Ok(true),
            Err(zmq::Error::EAGAIN) => Ok(false),
            Err(e) => Err(TransportError::Zmq(e)),
        }
    }
}

/// Queued parts, each flagged with whether more parts of its message follow
#[derive(Debug, Default)]
struct MemoryQueue {
    parts: VecDeque<(Vec<u8>, bool)>,
    closed: bool,
}

#[derive(Debug, Default)]
struct MemoryShared {
    queue: Mutex<MemoryQueue>,
    ready: Condvar,
}

/// Create a connected in-process publisher/subscriber pair.
///
/// `capacity` bounds the number of queued parts; a message which does not fit is dropped
/// whole, like a full ZeroMQ queue. Used to run the ingestion path without sockets.
pub fn memory_channel(capacity: usize) -> (MemoryPublisher, MemorySubscriber) {
    let shared = Arc::new(MemoryShared::default());
    (
        MemoryPublisher {
            shared: shared.clone(),
            capacity,
        },
        MemorySubscriber {
            shared,
            more: false,
        },
    )
}

#[derive(Debug)]
pub struct MemoryPublisher {
    shared: Arc<MemoryShared>,
    capacity: usize,
}

impl Publisher for MemoryPublisher {
    fn publish(&self, parts: &[&[u8]]) -> Result<bool, TransportError> {
        let mut queue = self
            .shared
            .queue
            .lock()
            .map_err(|_| TransportError::Closed)?;
        if queue.parts.len() + parts.len() > self.capacity {
            return Ok(false);
        }
        let last = parts.len().saturating_sub(1);
        queue.parts.extend(
            parts
                .iter()
                .enumerate()
                .map(|(idx, part)| (part.to_vec(), idx < last)),
        );
        self.shared.ready.notify_all();
        Ok(true)
    }
}

impl Drop for MemoryPublisher {
    fn drop(&mut self) {
        if let Ok(mut queue) = self.shared.queue.lock() {
            queue.closed = true;
        }
        self.shared.ready.notify_all();
    }
}

#[derive(Debug)]
pub struct MemorySubscriber {
    shared: Arc<MemoryShared>,
    more: bool,
}

impl MemorySubscriber {
    /// Number of parts waiting to be received
    pub fn pending(&self) -> usize {
        self.shared
            .queue
            .lock()
            .map(|queue| queue.parts.len())
            .unwrap_or(0)
    }
}

impl Subscriber for MemorySubscriber {
    fn try_receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut queue = self
            .shared
            .queue
            .lock()
            .map_err(|_| TransportError::Closed)?;
        match queue.parts.pop_front() {
            Some((part, more)) => {
                self.more = more;
                Ok(Some(part))
            }
            None => Ok(None),
        }
    }

    fn more_parts(&self) -> bool {
        self.more
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut queue = self
            .shared
            .queue
            .lock()
            .map_err(|_| TransportError::Closed)?;
        loop {
            if let Some((part, more)) = queue.parts.pop_front() {
                self.more = more;
                return Ok(Some(part));
            }
            let now = Instant::now();
            if queue.closed || now >= deadline {
                return Ok(None);
            }
            queue = self
                .shared
                .ready
                .wait_timeout(queue, deadline - now)
                .map_err(|_| TransportError::Closed)?
                .0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_channel_order() {
        let (publisher, mut subscriber) = memory_channel(16);
        assert!(publisher.publish(&[&b"meta"[..], &b"payload"[..]]).unwrap());
        assert!(publisher.publish(&[&b"second"[..]]).unwrap());
        assert_eq!(subscriber.try_receive().unwrap(), Some(b"meta".to_vec()));
        assert!(subscriber.more_parts());
        assert_eq!(subscriber.try_receive().unwrap(), Some(b"payload".to_vec()));
        assert!(!subscriber.more_parts());
        assert_eq!(subscriber.try_receive().unwrap(), Some(b"second".to_vec()));
        assert!(!subscriber.more_parts());
        assert_eq!(subscriber.try_receive().unwrap(), None);
    }

    #[test]
    fn test_discard_rest_of_message() {
        let (publisher, mut subscriber) = memory_channel(16);
        assert!(publisher
            .publish(&[&b"meta"[..], &b"a"[..], &b"b"[..]])
            .unwrap());
        assert!(publisher.publish(&[&b"next"[..]]).unwrap());
        // Nothing received yet, nothing to discard
        assert_eq!(subscriber.discard_message().unwrap(), 0);
        subscriber.try_receive().unwrap();
        assert_eq!(subscriber.discard_message().unwrap(), 2);
        assert!(!subscriber.more_parts());
        assert_eq!(subscriber.try_receive().unwrap(), Some(b"next".to_vec()));
        // A single part message has nothing left over
        assert_eq!(subscriber.discard_message().unwrap(), 0);
    }

    #[test]
    fn test_full_queue_drops_whole_message() {
        let (publisher, mut subscriber) = memory_channel(3);
        assert!(publisher.publish(&[&b"a"[..], &b"b"[..]]).unwrap());
        assert!(!publisher.publish(&[&b"c"[..], &b"d"[..]]).unwrap());
        assert_eq!(subscriber.pending(), 2);
        subscriber.try_receive().unwrap();
        subscriber.try_receive().unwrap();
        assert_eq!(subscriber.try_receive().unwrap(), None);
    }

    #[test]
    fn test_receive_timeout_expires() {
        let (_publisher, mut subscriber) = memory_channel(4);
        let start = Instant::now();
        assert_eq!(
            subscriber
                .receive_timeout(Duration::from_millis(20))
                .unwrap(),
            None
        );
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_receive_timeout_wakes_on_publish() {
        let (publisher, mut subscriber) = memory_channel(4);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            publisher.publish(&[&b"late"[..]]).unwrap();
        });
        let part = subscriber.receive_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(part, Some(b"late".to_vec()));
        handle.join().unwrap();
    }
}
