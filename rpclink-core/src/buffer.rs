//! Lock-guarded storage for messages still missing their final frame.

use crate::error::CoreError;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rpclink_protocol::RequestId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Partial {
    chunks: Vec<Bytes>,
    len: usize,
    generation: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<RequestId, Partial>,
    next_generation: u64,
}

/// Chunks received so far for each incomplete message, in arrival order.
///
/// At most one entry exists per request id. The receive path and the expiry
/// timers share the same lock.
#[derive(Debug)]
pub struct PartialBuffer {
    inner: Mutex<Inner>,
    max_message_size: usize,
}

impl PartialBuffer {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_message_size,
        }
    }

    /// Appends a non-final chunk.
    ///
    /// Returns the generation of a newly created entry, or `None` when the
    /// chunk extended an existing one. An entry that would exceed the size cap
    /// is dropped.
    pub fn append(&self, id: RequestId, chunk: Bytes) -> Result<Option<u64>, CoreError> {
        let mut inner = self.inner.lock();

        if let Some(partial) = inner.entries.get_mut(&id) {
            let size = partial.len + chunk.len();
            if size > self.max_message_size {
                inner.entries.remove(&id);
                return Err(self.too_large(id, size));
            }
            partial.len = size;
            partial.chunks.push(chunk);
            return Ok(None);
        }

        if chunk.len() > self.max_message_size {
            return Err(self.too_large(id, chunk.len()));
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;
        inner.entries.insert(
            id,
            Partial {
                len: chunk.len(),
                chunks: vec![chunk],
                generation,
            },
        );
        Ok(Some(generation))
    }

    /// Appends a non-final chunk and, for a new entry, schedules its removal
    /// once `retention` elapses.
    pub fn append_expiring(
        self: &Arc<Self>,
        id: RequestId,
        chunk: Bytes,
        retention: Duration,
        shutdown: &CancellationToken,
    ) -> Result<(), CoreError> {
        if let Some(generation) = self.append(id, chunk)? {
            let buffer = Arc::clone(self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(retention) => {
                        if buffer.expire(id, generation) {
                            tracing::warn!(
                                "Discarded partial message id={} after {:?} without a final frame",
                                id,
                                retention
                            );
                        }
                    }
                }
            });
        }
        Ok(())
    }

    /// Completes a message with its final chunk.
    ///
    /// Stored chunks come first, in arrival order, followed by `last`. The
    /// entry is removed.
    pub fn finish(&self, id: RequestId, last: Bytes) -> Result<Bytes, CoreError> {
        let Some(partial) = self.inner.lock().entries.remove(&id) else {
            return Ok(last);
        };

        let size = partial.len + last.len();
        if size > self.max_message_size {
            return Err(self.too_large(id, size));
        }

        let mut message = BytesMut::with_capacity(size);
        for chunk in &partial.chunks {
            message.extend_from_slice(chunk);
        }
        message.extend_from_slice(&last);
        Ok(message.freeze())
    }

    /// Removes the entry for `id` if it is still the one created as `generation`.
    pub fn expire(&self, id: RequestId, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.get(&id) {
            Some(partial) if partial.generation == generation => {
                inner.entries.remove(&id);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.inner.lock().entries.contains_key(&id)
    }

    /// Bytes buffered for `id`, if an entry exists.
    pub fn buffered(&self, id: RequestId) -> Option<usize> {
        self.inner.lock().entries.get(&id).map(|p| p.len)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    fn too_large(&self, id: RequestId, size: usize) -> CoreError {
        CoreError::MessageTooLarge {
            id,
            size,
            max: self.max_message_size,
        }
    }
}
