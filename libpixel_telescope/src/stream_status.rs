/// What a replay stream is currently doing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamState {
    #[default]
    Starting,
    Replaying,
    Finished,
    Stopped,
}

/// Progress report of one replay stream, sent to whoever supervises the streams
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamStatus {
    pub stream_id: usize,
    pub state: StreamState,
    /// Number of completed passes over the recorded run
    pub pass: u64,
    /// Fraction of the current pass already sent
    pub progress: f32,
    pub sent: u64,
    pub dropped: u64,
}

impl StreamStatus {
    pub fn new(stream_id: usize, state: StreamState) -> Self {
        Self {
            stream_id,
            state,
            ..Default::default()
        }
    }
}
