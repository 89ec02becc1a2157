//! A logical link to a peer, carried over whichever stream is attached.
//!
//! The link outlives individual connections: [`Link::serve`] attaches a
//! stream and runs its read/write loops until the stream fails, after which
//! another stream may be attached. Calls issued while no stream is attached
//! wait for the next one, within their timeout.

use crate::assembler::ResponseAssembler;
use crate::config::LinkConfig;
use crate::correlator::RequestCorrelator;
use crate::error::CoreError;
use crate::router::{MessageRouter, Outbound, ReplyQueue};
use bytes::Bytes;
use parking_lot::RwLock;
use rpclink_protocol::{Decoder, Frame, FrameFlags, Header, RequestId, RpcCodec};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Call issuing and frame processing for one peer.
pub struct Link {
    config: LinkConfig,
    codec: Arc<dyn RpcCodec>,
    correlator: Arc<RequestCorrelator>,
    assembler: Arc<ResponseAssembler>,
    router: MessageRouter,
    /// Writer queue of the attached stream, if any.
    outbound: RwLock<Option<Outbound>>,
    attached: watch::Sender<bool>,
    shutdown: CancellationToken,
}

impl Link {
    /// Creates a link with no stream attached.
    pub fn new(codec: Arc<dyn RpcCodec>, config: LinkConfig, shutdown: CancellationToken) -> Self {
        let correlator = Arc::new(RequestCorrelator::new());
        let assembler = Arc::new(ResponseAssembler::new(
            codec.clone(),
            correlator.clone(),
            &config,
            shutdown.clone(),
        ));
        let router = MessageRouter::new(codec.clone(), assembler.clone(), &config, shutdown.clone());

        Self {
            config,
            codec,
            correlator,
            assembler,
            router,
            outbound: RwLock::new(None),
            attached: watch::Sender::new(false),
            shutdown,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn correlator(&self) -> &Arc<RequestCorrelator> {
        &self.correlator
    }

    pub fn assembler(&self) -> &Arc<ResponseAssembler> {
        &self.assembler
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Returns whether a stream is currently attached.
    pub fn is_attached(&self) -> bool {
        self.outbound.read().is_some()
    }

    /// Follows whether a stream is attached.
    pub fn watch_attached(&self) -> watch::Receiver<bool> {
        self.attached.subscribe()
    }

    /// Token that stops this link and its timers.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Attaches `stream` and processes frames until it closes or fails.
    ///
    /// When the stream goes away every pending call is failed with
    /// [`CoreError::ConnectionLost`] and partially received messages are
    /// discarded.
    pub async fn serve<S>(&self, stream: S) -> Result<(), CoreError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(CoreError::Shutdown);
        }

        let (mut reader, writer) = tokio::io::split(stream);
        let (calls_tx, calls_rx) = mpsc::channel(self.config.outbound_queue);
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        *self.outbound.write() = Some(calls_tx);
        self.attached.send_replace(true);
        tracing::debug!("Link attached");

        let mut writer_task = tokio::spawn(write_loop(writer, calls_rx, replies_rx));

        let result = tokio::select! {
            result = self.read_loop(&mut reader, &replies_tx) => result,
            joined = &mut writer_task => match joined {
                Ok(result) => result,
                Err(e) => Err(CoreError::Io(std::io::Error::other(e))),
            },
            _ = self.shutdown.cancelled() => Err(CoreError::Shutdown),
        };

        *self.outbound.write() = None;
        self.attached.send_replace(false);
        writer_task.abort();

        let failed = self.correlator.fail_all();
        self.assembler.partials().clear();
        self.router.pending_calls().clear();
        tracing::debug!("Link detached ({} pending call(s) failed)", failed);

        result
    }

    async fn read_loop<R>(&self, reader: &mut R, replies: &ReplyQueue) -> Result<(), CoreError>
    where
        R: AsyncRead + Unpin,
    {
        let mut decoder = Decoder::new();
        let mut buf = vec![0u8; self.config.read_buffer_size];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                tracing::debug!("read_loop: connection closed");
                return Err(CoreError::ConnectionClosed);
            }

            decoder.extend(&buf[..n]);
            while let Some(frame) = decoder.decode_frame()? {
                self.router.on_frame(frame, replies)?;
            }
        }
    }

    /// Issues a call and waits for its reply using the configured timeout.
    pub async fn call(&self, method: &str, args: &[Value]) -> Result<Value, CoreError> {
        self.call_with_timeout(method, args, self.config.request_timeout)
            .await
    }

    /// Issues a call and waits at most `timeout` for its reply.
    ///
    /// The deadline covers waiting for a stream, queueing the call frames
    /// and the reply itself. The delivery slot is registered before the
    /// first frame is queued.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        args: &[Value],
        timeout: Duration,
    ) -> Result<Value, CoreError> {
        let body = self.codec.encode_call(method, args)?;

        let mut issued = None;
        let result = tokio::time::timeout(timeout, self.issue(method, body, &mut issued)).await;
        match result {
            Ok(result) => result,
            Err(_) => {
                if let Some(id) = issued {
                    tracing::debug!("Call id={} timed out", id);
                    self.correlator.cancel(id);
                }
                Err(CoreError::Timeout)
            }
        }
    }

    async fn issue(
        &self,
        method: &str,
        body: Bytes,
        issued: &mut Option<RequestId>,
    ) -> Result<Value, CoreError> {
        loop {
            self.wait_attached().await?;

            // Registering first means a detach that clears the queue below
            // also fails this slot.
            let pending = self.correlator.register();
            let id = pending.id();
            *issued = Some(id);

            let Some(outbound) = self.outbound.read().clone() else {
                self.correlator.cancel(id);
                *issued = None;
                continue;
            };

            let frames = Frame::split(
                Header { request_id: id },
                Bytes::new(),
                FrameFlags::new(),
                body.clone(),
                self.config.max_frame_body,
            );
            tracing::debug!("Sending call id={} method={} ({} frame(s))", id, method, frames.len());

            for frame in frames {
                if outbound.send(frame).await.is_err() {
                    self.correlator.cancel(id);
                    return Err(CoreError::ConnectionLost);
                }
            }

            return pending.recv().await;
        }
    }

    async fn wait_attached(&self) -> Result<(), CoreError> {
        let mut attached = self.attached.subscribe();
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(CoreError::Shutdown),
            result = attached.wait_for(|attached| *attached) => {
                result.map(|_| ()).map_err(|_| CoreError::Shutdown)
            }
        }
    }

    /// Returns the number of calls waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.correlator.pending_count()
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut calls: mpsc::Receiver<Frame>,
    mut replies: mpsc::UnboundedReceiver<Frame>,
) -> Result<(), CoreError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            Some(frame) = replies.recv() => frame,
            Some(frame) = calls.recv() => frame,
            else => break,
        };
        writer.write_all(&frame.encode()?).await?;

        // Drain what is already queued before flushing.
        while let Ok(frame) = replies.try_recv() {
            writer.write_all(&frame.encode()?).await?;
        }
        while let Ok(frame) = calls.try_recv() {
            writer.write_all(&frame.encode()?).await?;
        }
        writer.flush().await?;
    }

    let _ = writer.shutdown().await;
    Ok(())
}
