//! Tagged RPC payloads carried in frame bodies.
//!
//! ```text
//! call:   'C' <json string: method> <json array: args> 'z'
//! result: 'R' <json value> 'z'
//! error:  'E' <json string: message> 'z'
//! ```

use crate::error::ProtocolError;
use crate::registry::MethodRegistry;
use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub const TAG_CALL: u8 = b'C';
pub const TAG_RESULT: u8 = b'R';
pub const TAG_ERROR: u8 = b'E';
pub const TAG_END: u8 = b'z';

/// Why a reply could not be turned into a value.
#[derive(Debug, Error)]
pub enum ReplyError {
    /// The peer answered with an error tag.
    #[error("remote returned error: {0}")]
    Remote(String),

    #[error("unexpected reply tag {tag:?}: {rest}")]
    UnexpectedTag { tag: char, rest: String },

    #[error("malformed reply: {0}")]
    Malformed(#[from] ProtocolError),
}

/// The serialization collaborator used by a link.
///
/// Implementations own the payload format; the link only moves the bytes.
pub trait RpcCodec: Send + Sync + 'static {
    /// Encodes an outgoing call.
    fn encode_call(&self, method: &str, args: &[Value]) -> Result<Bytes, ProtocolError>;

    /// Decodes a complete reply into a value or an error.
    fn decode_reply(&self, data: &[u8]) -> Result<Value, ReplyError>;

    /// Services inbound call bytes and returns the reply bytes.
    fn dispatch(&self, call: &[u8]) -> Bytes;
}

/// Default codec: tagged JSON payloads dispatched through a [`MethodRegistry`].
#[derive(Clone, Default)]
pub struct TaggedCodec {
    registry: Arc<MethodRegistry>,
}

impl TaggedCodec {
    pub fn new(registry: Arc<MethodRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }
}

impl RpcCodec for TaggedCodec {
    fn encode_call(&self, method: &str, args: &[Value]) -> Result<Bytes, ProtocolError> {
        encode_call(method, args)
    }

    fn decode_reply(&self, data: &[u8]) -> Result<Value, ReplyError> {
        decode_reply(data)
    }

    fn dispatch(&self, call: &[u8]) -> Bytes {
        let reply = match decode_call(call) {
            Ok((method, args)) => {
                tracing::debug!("Dispatching inbound call {}", method);
                match self.registry.invoke(&method, args) {
                    Ok(value) => encode_result(&value),
                    Err(message) => encode_error(&message),
                }
            }
            Err(e) => {
                tracing::warn!("Rejecting malformed inbound call: {}", e);
                encode_error(&e.to_string())
            }
        };

        reply.unwrap_or_else(|e| {
            tracing::warn!("Failed to encode reply: {}", e);
            Bytes::from_static(b"E\"internal encoding error\"z")
        })
    }
}

fn tagged(tag: u8, values: &[&Value]) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new().writer();
    buf.get_mut().put_u8(tag);
    for value in values {
        serde_json::to_writer(&mut buf, value)?;
    }
    buf.get_mut().put_u8(TAG_END);
    Ok(buf.into_inner().freeze())
}

/// Splits `tag ... 'z'` into the tag and the enclosed bytes.
fn unwrap_tagged(data: &[u8]) -> Result<(u8, &[u8]), ProtocolError> {
    match data {
        [] => Err(ProtocolError::Malformed("empty payload".into())),
        [tag, inner @ .., TAG_END] => Ok((*tag, inner)),
        _ => Err(ProtocolError::Malformed("missing end tag".into())),
    }
}

pub fn encode_call(method: &str, args: &[Value]) -> Result<Bytes, ProtocolError> {
    let name = Value::String(method.to_string());
    let args = Value::Array(args.to_vec());
    tagged(TAG_CALL, &[&name, &args])
}

pub fn encode_result(value: &Value) -> Result<Bytes, ProtocolError> {
    tagged(TAG_RESULT, &[value])
}

pub fn encode_error(message: &str) -> Result<Bytes, ProtocolError> {
    tagged(TAG_ERROR, &[&Value::String(message.to_string())])
}

/// Decodes call bytes into the method name and its arguments.
pub fn decode_call(data: &[u8]) -> Result<(String, Vec<Value>), ProtocolError> {
    let (tag, inner) = unwrap_tagged(data)?;
    if tag != TAG_CALL {
        return Err(ProtocolError::Malformed(format!(
            "expected call tag, got {:?}",
            tag as char
        )));
    }

    let mut values = serde_json::Deserializer::from_slice(inner).into_iter::<Value>();
    let method = match values.next().transpose()? {
        Some(Value::String(name)) => name,
        _ => return Err(ProtocolError::Malformed("missing method name".into())),
    };
    let args = match values.next().transpose()? {
        Some(Value::Array(args)) => args,
        None => Vec::new(),
        Some(_) => return Err(ProtocolError::Malformed("arguments must be a list".into())),
    };
    if values.next().is_some() {
        return Err(ProtocolError::Malformed("trailing data after arguments".into()));
    }

    Ok((method, args))
}

/// Decodes reply bytes into a value, or the error the peer reported.
pub fn decode_reply(data: &[u8]) -> Result<Value, ReplyError> {
    let Some(&tag) = data.first() else {
        return Err(ProtocolError::Malformed("empty payload".into()).into());
    };

    match tag {
        TAG_RESULT => {
            let (_, inner) = unwrap_tagged(data)?;
            Ok(serde_json::from_slice::<Value>(inner).map_err(ProtocolError::from)?)
        }
        TAG_ERROR => {
            let (_, inner) = unwrap_tagged(data)?;
            let value = serde_json::from_slice::<Value>(inner).map_err(ProtocolError::from)?;
            let message = match value {
                Value::String(message) => message,
                other => other.to_string(),
            };
            Err(ReplyError::Remote(message))
        }
        other => Err(ReplyError::UnexpectedTag {
            tag: other as char,
            rest: String::from_utf8_lossy(&data[1..]).into_owned(),
        }),
    }
}
