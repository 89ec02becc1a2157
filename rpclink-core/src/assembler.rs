//! Reassembly and decoding of reply frames.

use crate::buffer::PartialBuffer;
use crate::config::LinkConfig;
use crate::correlator::RequestCorrelator;
use bytes::Bytes;
use rpclink_protocol::{FrameFlags, Header, RpcCodec};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Turns reply frames into decoded values for the correlator.
pub struct ResponseAssembler {
    partials: Arc<PartialBuffer>,
    codec: Arc<dyn RpcCodec>,
    correlator: Arc<RequestCorrelator>,
    retention: Duration,
    shutdown: CancellationToken,
}

impl ResponseAssembler {
    pub fn new(
        codec: Arc<dyn RpcCodec>,
        correlator: Arc<RequestCorrelator>,
        config: &LinkConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            partials: Arc::new(PartialBuffer::new(config.max_message_size)),
            codec,
            correlator,
            retention: config.retention,
            shutdown,
        }
    }

    /// Handles one reply frame.
    ///
    /// Non-final bodies are buffered under the request id. A final body
    /// completes the message, which is decoded and delivered. Decode failures
    /// and remote errors are logged and nothing is delivered.
    pub fn on_reply_frame(&self, flags: FrameFlags, header: Header, body: Bytes) {
        let id = header.request_id;

        if !flags.is_finish() {
            let appended = self
                .partials
                .append_expiring(id, body, self.retention, &self.shutdown);
            if let Err(e) = appended {
                tracing::warn!("Dropping partial reply id={}: {}", id, e);
            }
            return;
        }

        let message = match self.partials.finish(id, body) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping reply id={}: {}", id, e);
                return;
            }
        };

        match self.codec.decode_reply(&message) {
            Ok(value) => {
                self.correlator.deliver(id, value);
            }
            Err(e) => tracing::warn!("Dropping reply id={}: {}", id, e),
        }
    }

    /// Replies still waiting for their final frame.
    pub fn partials(&self) -> &PartialBuffer {
        &self.partials
    }
}
