//! Inbound frame routing.

use crate::assembler::ResponseAssembler;
use crate::buffer::PartialBuffer;
use crate::config::LinkConfig;
use crate::error::CoreError;
use rpclink_protocol::{Frame, FrameFlags, RpcCodec};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Bounded queue of outgoing call frames.
pub type Outbound = mpsc::Sender<Frame>;

/// Queue of reply frames for the writer. Unbounded so the reader never
/// waits on the writer while answering calls.
pub type ReplyQueue = mpsc::UnboundedSender<Frame>;

/// Sends reply frames to the assembler and services inbound calls.
pub struct MessageRouter {
    codec: Arc<dyn RpcCodec>,
    assembler: Arc<ResponseAssembler>,
    /// Inbound calls still waiting for their final frame.
    calls: Arc<PartialBuffer>,
    max_frame_body: usize,
    retention: Duration,
    shutdown: CancellationToken,
}

impl MessageRouter {
    pub fn new(
        codec: Arc<dyn RpcCodec>,
        assembler: Arc<ResponseAssembler>,
        config: &LinkConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            codec,
            assembler,
            calls: Arc::new(PartialBuffer::new(config.max_message_size)),
            max_frame_body: config.max_frame_body,
            retention: config.retention,
            shutdown,
        }
    }

    /// Routes one inbound frame.
    ///
    /// Reply frames go to the assembler. Call frames are dispatched through
    /// the codec once complete, and the response is written back under the
    /// same request id and context with `RESULT_MODE` set. Fails only when
    /// the writer is gone.
    pub fn on_frame(&self, frame: Frame, replies: &ReplyQueue) -> Result<(), CoreError> {
        if frame.flags.is_result_mode() {
            self.assembler.on_reply_frame(frame.flags, frame.header, frame.body);
            return Ok(());
        }

        let id = frame.header.request_id;
        if !frame.flags.is_finish() {
            let appended = self
                .calls
                .append_expiring(id, frame.body, self.retention, &self.shutdown);
            if let Err(e) = appended {
                tracing::warn!("Dropping partial call id={}: {}", id, e);
            }
            return Ok(());
        }

        let call = match self.calls.finish(id, frame.body) {
            Ok(call) => call,
            Err(e) => {
                tracing::warn!("Dropping call id={}: {}", id, e);
                return Ok(());
            }
        };

        let response = self.codec.dispatch(&call);
        let frames = Frame::split(
            frame.header,
            frame.context,
            FrameFlags::new().with_result_mode(),
            response,
            self.max_frame_body,
        );
        tracing::debug!("Answering call id={} in {} frame(s)", id, frames.len());

        for frame in frames {
            replies
                .send(frame)
                .map_err(|_| CoreError::ConnectionClosed)?;
        }
        Ok(())
    }

    /// Inbound calls still waiting for their final frame.
    pub fn pending_calls(&self) -> &PartialBuffer {
        &self.calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::RequestCorrelator;
    use bytes::Bytes;
    use rpclink_protocol::{rpc, Header, MethodRegistry, TaggedCodec};
    use serde_json::{json, Value};

    struct Fixture {
        router: MessageRouter,
        correlator: Arc<RequestCorrelator>,
        replies: ReplyQueue,
        sent: mpsc::UnboundedReceiver<Frame>,
    }

    fn fixture(config: LinkConfig) -> Fixture {
        let registry = Arc::new(MethodRegistry::new());
        registry.add_function("echo", |args| Ok(Value::Array(args)), None);
        registry.add_function("big", |_| Ok(json!("x".repeat(100))), None);
        let codec: Arc<dyn RpcCodec> = Arc::new(TaggedCodec::new(registry));

        let shutdown = CancellationToken::new();
        let correlator = Arc::new(RequestCorrelator::new());
        let assembler = Arc::new(ResponseAssembler::new(
            codec.clone(),
            correlator.clone(),
            &config,
            shutdown.clone(),
        ));
        let router = MessageRouter::new(codec, assembler, &config, shutdown);
        let (replies, sent) = mpsc::unbounded_channel();

        Fixture {
            router,
            correlator,
            replies,
            sent,
        }
    }

    fn call_frame(id: u64, method: &str, args: &[Value]) -> Frame {
        let body = rpc::encode_call(method, args).unwrap();
        Frame::new(Header::new(id), FrameFlags::new().with_finish(), body)
    }

    #[tokio::test]
    async fn test_call_answered_with_same_header_and_context() {
        let mut f = fixture(LinkConfig::default());
        let frame = call_frame(11, "echo", &[json!("hi")])
            .with_context(Bytes::from_static(b"route-7"));

        f.router.on_frame(frame, &f.replies).unwrap();

        let reply = f.sent.try_recv().unwrap();
        assert_eq!(reply.header.request_id.get(), 11);
        assert_eq!(reply.context.as_ref(), b"route-7");
        assert!(reply.flags.is_result_mode());
        assert!(reply.flags.is_finish());
        assert_eq!(rpc::decode_reply(&reply.body).unwrap(), json!(["hi"]));
    }

    #[tokio::test]
    async fn test_large_response_split_across_frames() {
        let mut f = fixture(LinkConfig::default().with_max_frame_body(16));

        f.router
            .on_frame(call_frame(3, "big", &[]), &f.replies)
            .unwrap();
        drop(f.replies);

        let mut frames = Vec::new();
        while let Ok(frame) = f.sent.try_recv() {
            frames.push(frame);
        }

        assert!(frames.len() > 1);
        let (last, rest) = frames.split_last().unwrap();
        assert!(last.flags.is_finish());
        assert!(rest.iter().all(|frame| !frame.flags.is_finish()));
        assert!(frames.iter().all(|frame| frame.flags.is_result_mode()));

        let body: Vec<u8> = frames.iter().flat_map(|frame| frame.body.to_vec()).collect();
        assert_eq!(rpc::decode_reply(&body).unwrap(), json!("x".repeat(100)));
    }

    #[tokio::test]
    async fn test_split_inbound_call_is_reassembled() {
        let mut f = fixture(LinkConfig::default());
        let body = rpc::encode_call("echo", &[json!(1), json!(2)]).unwrap();
        let (head, tail) = body.split_at(5);

        let first = Frame::new(Header::new(4), FrameFlags::new(), Bytes::copy_from_slice(head));
        f.router.on_frame(first, &f.replies).unwrap();
        assert!(f.router.pending_calls().contains(Header::new(4).request_id));
        assert!(f.sent.try_recv().is_err());

        let second = Frame::new(
            Header::new(4),
            FrameFlags::new().with_finish(),
            Bytes::copy_from_slice(tail),
        );
        f.router.on_frame(second, &f.replies).unwrap();

        let reply = f.sent.try_recv().unwrap();
        assert_eq!(rpc::decode_reply(&reply.body).unwrap(), json!([1, 2]));
        assert!(f.router.pending_calls().is_empty());
    }

    #[tokio::test]
    async fn test_reply_frames_routed_to_correlator() {
        let mut f = fixture(LinkConfig::default());
        let call = f.correlator.register();

        let reply = Frame::new(
            Header { request_id: call.id() },
            FrameFlags::new().with_result_mode().with_finish(),
            rpc::encode_result(&json!({"ok": true})).unwrap(),
        );
        f.router.on_frame(reply, &f.replies).unwrap();

        assert_eq!(call.recv().await.unwrap(), json!({"ok": true}));
        assert!(f.sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_writer_reports_connection_closed() {
        let f = fixture(LinkConfig::default());
        let Fixture {
            router,
            replies,
            sent,
            ..
        } = f;
        drop(sent);

        let result = router.on_frame(call_frame(1, "echo", &[]), &replies);
        assert!(matches!(result, Err(CoreError::ConnectionClosed)));
    }
}
