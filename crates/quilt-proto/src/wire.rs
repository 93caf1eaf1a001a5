// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deterministic framing and CBOR helpers for broker traffic.
//!
//! Packet layout:
//!
//! ``MAGIC(4) || VERSION(2) || FLAGS(2) || LENGTH(4) || PAYLOAD || CHECKSUM(32)``
//!
//! * PAYLOAD is a CBOR `OpEnvelope`
//! * CHECKSUM = blake3-256 over HEADER (first 12 bytes) || PAYLOAD

use blake3::Hasher;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::ErrorPayload;

/// Protocol magic constant "QLT!".
pub const MAGIC: [u8; 4] = [0x51, 0x4c, 0x54, 0x21];
/// Wire protocol version (big-endian u16).
pub const VERSION: u16 = 0x0001;
/// Reserved flags (set to zero for v1).
pub const FLAGS: u16 = 0x0000;
/// Header length in bytes.
pub const HEADER_BYTES: usize = 12;
/// Checksum length in bytes.
pub const CHECKSUM_BYTES: usize = 32;
/// Largest payload accepted by [`Packet::decode_envelope`].
pub const MAX_PAYLOAD: usize = 8 * 1024 * 1024;

/// Framing and codec failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Fewer bytes than the header/length announce.
    #[error("incomplete packet")]
    Incomplete,
    /// Magic bytes did not match.
    #[error("bad magic")]
    BadMagic,
    /// Unknown protocol version.
    #[error("unsupported version {0}")]
    UnsupportedVersion(u16),
    /// Payload above [`MAX_PAYLOAD`].
    #[error("payload of {0} bytes exceeds limit")]
    TooLarge(usize),
    /// Checksum did not verify.
    #[error("checksum mismatch")]
    ChecksumMismatch,
    /// Unknown op string.
    #[error("unknown op {0}")]
    UnknownOp(String),
    /// CBOR encoding failed.
    #[error("encode error: {0}")]
    Encode(String),
    /// CBOR decoding failed.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Envelope carried as the payload of a packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpEnvelope<P> {
    /// Operation name (e.g., "call", "reply", "event").
    pub op: String,
    /// Logical timestamp (monotonic per broker).
    pub ts: u64,
    /// Operation-specific body.
    pub payload: P,
}

/// Messages exchanged between brokers, services and gateways.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Invoke `action` with `payload` (op = "call").
    Call {
        /// Action name.
        action: String,
        /// Serialized arguments.
        payload: Value,
    },
    /// Successful unary result (op = "reply").
    Reply(Value),
    /// Failed call (op = "fault").
    Fault(ErrorPayload),
    /// One element of a streaming reply (op = "item").
    Item(Value),
    /// End of a streaming reply (op = "end").
    End,
    /// Broadcast event (op = "event").
    Event {
        /// Event name.
        name: String,
        /// Event body.
        payload: Value,
    },
}

impl Message {
    /// Canonical op string for this message variant.
    pub fn op_name(&self) -> &'static str {
        match self {
            Message::Call { .. } => "call",
            Message::Reply(_) => "reply",
            Message::Fault(_) => "fault",
            Message::Item(_) => "item",
            Message::End => "end",
            Message::Event { .. } => "event",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CallBody {
    action: String,
    payload: Value,
}

#[derive(Serialize, Deserialize)]
struct EventBody {
    name: String,
    payload: Value,
}

/// Encode to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decode from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    ciborium::from_reader(bytes).map_err(|e| WireError::Decode(e.to_string()))
}

/// A full packet (header + payload + checksum).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Raw header.
    pub header: [u8; HEADER_BYTES],
    /// CBOR payload bytes.
    pub payload: Vec<u8>,
    /// blake3 checksum over header||payload.
    pub checksum: [u8; CHECKSUM_BYTES],
}

impl Packet {
    /// Build a packet from a CBOR payload.
    pub fn from_payload(payload: Vec<u8>) -> Result<Self, WireError> {
        let len = u32::try_from(payload.len()).map_err(|_| WireError::TooLarge(payload.len()))?;
        let mut header = [0u8; HEADER_BYTES];
        header[0..4].copy_from_slice(&MAGIC);
        header[4..6].copy_from_slice(&VERSION.to_be_bytes());
        header[6..8].copy_from_slice(&FLAGS.to_be_bytes());
        header[8..12].copy_from_slice(&len.to_be_bytes());

        let mut hasher = Hasher::new();
        hasher.update(&header);
        hasher.update(&payload);
        let checksum = *hasher.finalize().as_bytes();

        Ok(Packet {
            header,
            payload,
            checksum,
        })
    }

    /// Concatenate header, payload and checksum.
    pub fn into_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_BYTES + self.payload.len() + CHECKSUM_BYTES);
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.checksum);
        out
    }

    /// Encode an `OpEnvelope` into a full packet byte vector.
    pub fn encode_envelope<P: Serialize>(env: &OpEnvelope<P>) -> Result<Vec<u8>, WireError> {
        let payload = to_cbor(env)?;
        Ok(Packet::from_payload(payload)?.into_bytes())
    }

    /// Decode a packet from a byte slice, returning the envelope and bytes consumed.
    pub fn decode_envelope<P: DeserializeOwned>(
        bytes: &[u8],
    ) -> Result<(OpEnvelope<P>, usize), WireError> {
        if bytes.len() < HEADER_BYTES + CHECKSUM_BYTES {
            return Err(WireError::Incomplete);
        }
        if bytes[0..4] != MAGIC {
            return Err(WireError::BadMagic);
        }
        let version = u16::from_be_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        let len = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        if len > MAX_PAYLOAD {
            return Err(WireError::TooLarge(len));
        }
        let total = HEADER_BYTES + len + CHECKSUM_BYTES;
        if bytes.len() < total {
            return Err(WireError::Incomplete);
        }
        let header = &bytes[0..HEADER_BYTES];
        let payload = &bytes[HEADER_BYTES..HEADER_BYTES + len];
        let checksum = &bytes[HEADER_BYTES + len..total];

        let mut hasher = Hasher::new();
        hasher.update(header);
        hasher.update(payload);
        if hasher.finalize().as_bytes() != checksum {
            return Err(WireError::ChecksumMismatch);
        }

        let env: OpEnvelope<P> = from_cbor(payload)?;
        Ok((env, total))
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<ciborium::Value, WireError> {
    ciborium::Value::serialized(value).map_err(|e| WireError::Encode(e.to_string()))
}

fn from_value<T: DeserializeOwned>(value: &ciborium::Value) -> Result<T, WireError> {
    value
        .deserialized()
        .map_err(|e| WireError::Decode(e.to_string()))
}

/// Encode a `Message` into a packet with the provided logical timestamp.
pub fn encode_message(msg: &Message, ts: u64) -> Result<Vec<u8>, WireError> {
    let payload = match msg {
        Message::Call { action, payload } => to_value(&CallBody {
            action: action.clone(),
            payload: payload.clone(),
        })?,
        Message::Reply(v) | Message::Item(v) => to_value(v)?,
        Message::Fault(p) => to_value(p)?,
        Message::End => ciborium::Value::Null,
        Message::Event { name, payload } => to_value(&EventBody {
            name: name.clone(),
            payload: payload.clone(),
        })?,
    };
    let env = OpEnvelope {
        op: msg.op_name().to_owned(),
        ts,
        payload,
    };
    Packet::encode_envelope(&env)
}

/// Decode bytes into (Message, ts, bytes_consumed).
pub fn decode_message(bytes: &[u8]) -> Result<(Message, u64, usize), WireError> {
    let (env, used) = Packet::decode_envelope::<ciborium::Value>(bytes)?;
    let msg = match env.op.as_str() {
        "call" => {
            let body: CallBody = from_value(&env.payload)?;
            Message::Call {
                action: body.action,
                payload: body.payload,
            }
        }
        "reply" => Message::Reply(from_value(&env.payload)?),
        "fault" => Message::Fault(from_value(&env.payload)?),
        "item" => Message::Item(from_value(&env.payload)?),
        "end" => Message::End,
        "event" => {
            let body: EventBody = from_value(&env.payload)?;
            Message::Event {
                name: body.name,
                payload: body.payload,
            }
        }
        other => return Err(WireError::UnknownOp(other.to_owned())),
    };
    Ok((msg, env.ts, used))
}

/// Push `value` through a full encode/decode cycle.
///
/// Brokers use this at process boundaries so only data that survives the
/// wire reaches the other side.
pub fn transit<T: Serialize + DeserializeOwned>(value: &T) -> Result<T, WireError> {
    let json = serde_json::to_value(value).map_err(|e| WireError::Encode(e.to_string()))?;
    let bytes = encode_message(&Message::Reply(json), 0)?;
    match decode_message(&bytes)? {
        (Message::Reply(v), _, _) => {
            serde_json::from_value(v).map_err(|e| WireError::Decode(e.to_string()))
        }
        (other, _, _) => Err(WireError::UnknownOp(other.op_name().to_owned())),
    }
}
