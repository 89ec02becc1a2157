//! Matches decoded replies with the calls waiting for them.

use crate::error::CoreError;
use parking_lot::Mutex;
use rpclink_protocol::RequestId;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

/// Pending calls keyed by request id.
///
/// A slot is created by [`RequestCorrelator::register`] before the call is
/// sent and is removed by whichever of delivery, cancellation or connection
/// loss happens first, so at most one value ever reaches the caller.
pub struct RequestCorrelator {
    pending: Mutex<HashMap<RequestId, oneshot::Sender<Value>>>,
    next_id: AtomicU64,
}

/// The receiving side of a registered call.
#[derive(Debug)]
pub struct PendingCall {
    id: RequestId,
    rx: oneshot::Receiver<Value>,
}

impl PendingCall {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Waits for the reply value.
    ///
    /// Fails with [`CoreError::ConnectionLost`] when the slot is dropped
    /// without a value.
    pub async fn recv(self) -> Result<Value, CoreError> {
        self.rx.await.map_err(|_| CoreError::ConnectionLost)
    }
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates the next request id and its delivery slot.
    pub fn register(&self) -> PendingCall {
        let id = RequestId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        PendingCall { id, rx }
    }

    /// Hands `value` to the call registered as `id`.
    ///
    /// Returns `false` when no such call is waiting any more.
    pub fn deliver(&self, id: RequestId, value: Value) -> bool {
        let Some(tx) = self.pending.lock().remove(&id) else {
            tracing::debug!("No pending call for reply id={}", id);
            return false;
        };

        if tx.send(value).is_err() {
            tracing::debug!("Caller for reply id={} stopped waiting", id);
            return false;
        }
        true
    }

    /// Forgets a call, typically after its caller timed out.
    pub fn cancel(&self, id: RequestId) -> bool {
        self.pending.lock().remove(&id).is_some()
    }

    /// Drops every pending slot; waiting callers see [`CoreError::ConnectionLost`].
    pub fn fail_all(&self) -> usize {
        let dropped: Vec<_> = self.pending.lock().drain().collect();
        if !dropped.is_empty() {
            tracing::debug!("Failing {} pending call(s)", dropped.len());
        }
        dropped.len()
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.pending.lock().contains_key(&id)
    }

    /// Returns the number of calls waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
