//! Link tuning knobs shared by clients and servers.

use rpclink_protocol::MAX_BODY_SIZE;
use std::time::Duration;

/// Default maximum body bytes per outgoing frame (64 KiB).
pub const DEFAULT_MAX_FRAME_BODY: usize = 64 * 1024;

/// Default retention window for incomplete messages.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30);

/// Default time a call waits for its reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on a reassembled message (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default capacity of the outgoing frame queue.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Link configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Outgoing messages are split into frames of at most this many body bytes.
    pub max_frame_body: usize,
    /// How long an incomplete message is kept waiting for its final frame.
    pub retention: Duration,
    /// Default time a call waits for its reply.
    pub request_timeout: Duration,
    /// Largest message accepted by reassembly.
    pub max_message_size: usize,
    /// Capacity of the outgoing frame queue.
    pub outbound_queue: usize,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_frame_body: DEFAULT_MAX_FRAME_BODY,
            retention: DEFAULT_RETENTION,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl LinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_body(mut self, size: usize) -> Self {
        self.max_frame_body = size.clamp(1, MAX_BODY_SIZE as usize);
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_outbound_queue(mut self, capacity: usize) -> Self {
        self.outbound_queue = capacity.max(1);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = LinkConfig::new();
        assert_eq!(config.max_frame_body, DEFAULT_MAX_FRAME_BODY);
        assert_eq!(config.retention, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
    }

    #[test]
    fn test_config_clamping() {
        let config = LinkConfig::new()
            .with_max_frame_body(0)
            .with_outbound_queue(0)
            .with_read_buffer_size(100);
        assert_eq!(config.max_frame_body, 1);
        assert_eq!(config.outbound_queue, 1);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = LinkConfig::new()
            .with_max_frame_body(usize::MAX)
            .with_read_buffer_size(10 * 1024 * 1024);
        assert_eq!(config.max_frame_body, MAX_BODY_SIZE as usize);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }
}
