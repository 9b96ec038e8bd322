#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    frames_sent: u64,
    frames_received: u64,
    frames_dropped: u64,
    decode_failures: u64,
    reconnects_scheduled: u64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_sent(&mut self) {
        self.frames_sent += 1;
    }

    pub(crate) fn record_received(&mut self) {
        self.frames_received += 1;
    }

    pub(crate) fn record_dropped(&mut self) {
        self.frames_dropped += 1;
    }

    pub(crate) fn record_decode_failure(&mut self) {
        self.decode_failures += 1;
    }

    pub(crate) fn record_reconnect(&mut self) {
        self.reconnects_scheduled += 1;
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Outbound frames dropped because the socket was not connected.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures
    }

    pub fn reconnects_scheduled(&self) -> u64 {
        self.reconnects_scheduled
    }
}
