//! Wire messages and the frame codec.
//!
//! # Format
//! ```text
//! frame bytes = zlib( JSON body )
//! ```
//! The body is either a [`Frame`] (outbound: messages delivered to a client)
//! or a [`Packet`] (inbound: what a client asks the broker to do).
//!
//! Decoding never panics: truncated or corrupt input is a [`CodecError`],
//! and the inflated body is capped so a small frame cannot expand without
//! bound.

use std::fmt;
use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Largest body a frame may inflate to.
pub const MAX_DECODED_BYTES: usize = 4 * 1024 * 1024;

/// Subscription identifier: a topic path as a sequence of hashed segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ssid(pub Vec<u32>);

impl Ssid {
    /// Build an ssid from a `/`-separated topic, hashing each segment.
    pub fn from_topic(topic: &str) -> Self {
        Self(
            topic
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(fnv1a)
                .collect(),
        )
    }
}

impl fmt::Display for Ssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

// 32-bit FNV-1a.
fn fnv1a(segment: &str) -> u32 {
    segment.bytes().fold(0x811c_9dc5u32, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

/// A message to be forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    /// Timestamp in nanoseconds since the Unix epoch.
    #[serde(rename = "ts", default, skip_serializing_if = "is_zero_i64")]
    pub time: i64,
    #[serde(default)]
    pub ssid: Ssid,
    #[serde(rename = "chan", default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(rename = "data", default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
    /// Time-to-live in seconds; zero means no expiry.
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub ttl: u32,
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

/// A set of messages sent through the wire together.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frame(pub Vec<Message>);

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    pub fn append(&mut self, time: i64, ssid: Ssid, channel: impl Into<String>, payload: Vec<u8>) {
        self.0.push(Message {
            time,
            ssid,
            channel: channel.into(),
            payload,
            ttl: 0,
        });
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.0
    }

    /// Encode the frame for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode(self)
    }

    /// Decode a frame from the wire.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        decode(buf)
    }
}

/// A request sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Packet {
    Subscribe { ssid: Ssid, channel: String },
    Unsubscribe { ssid: Ssid },
    Publish { messages: Frame },
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode(self)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        decode(buf)
    }
}

/// Errors produced by the frame codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("compression error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("body exceeds {limit} bytes once inflated")]
    TooLarge { limit: usize },
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let body = serde_json::to_vec(value)?;
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(body.len() / 2 + 16), Compression::fast());
    encoder.write_all(&body)?;
    Ok(encoder.finish()?)
}

fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, CodecError> {
    let mut body = Vec::new();
    ZlibDecoder::new(buf)
        .take(MAX_DECODED_BYTES as u64 + 1)
        .read_to_end(&mut body)?;
    if body.len() > MAX_DECODED_BYTES {
        return Err(CodecError::TooLarge {
            limit: MAX_DECODED_BYTES,
        });
    }
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        let mut frame = Frame::new();
        frame.append(1_700_000_000, Ssid::from_topic("a/b"), "a/b", b"hello".to_vec());
        frame.0.push(Message {
            time: 42,
            ssid: Ssid(vec![1, 2, 3]),
            channel: "c".into(),
            payload: vec![0, 255, 7],
            ttl: 30,
        });
        frame
    }

    #[test]
    fn frame_round_trips() {
        let frame = sample_frame();
        let encoded = frame.encode().unwrap();
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn empty_frame_round_trips() {
        let encoded = Frame::new().encode().unwrap();
        let decoded = Frame::decode(&encoded).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn truncated_input_is_an_error() {
        let encoded = sample_frame().encode().unwrap();
        assert!(Frame::decode(&encoded[..3]).is_err());
        assert!(Frame::decode(b"").is_err());
    }

    #[test]
    fn corrupt_input_is_an_error() {
        assert!(Frame::decode(b"\x01\x02\x03\x04\x05").is_err());

        let mut encoded = sample_frame().encode().unwrap();
        let mid = encoded.len() / 2;
        encoded[mid] ^= 0xff;
        assert!(Frame::decode(&encoded).is_err());
    }

    #[test]
    fn oversized_body_is_rejected() {
        let big = vec![b' '; MAX_DECODED_BYTES + 10];
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&big).unwrap();
        let encoded = encoder.finish().unwrap();

        assert!(matches!(
            Frame::decode(&encoded),
            Err(CodecError::TooLarge { .. })
        ));
    }

    #[test]
    fn packets_round_trip() {
        let packets = [
            Packet::Subscribe {
                ssid: Ssid::from_topic("news/sport"),
                channel: "news/sport".into(),
            },
            Packet::Unsubscribe {
                ssid: Ssid::from_topic("news/sport"),
            },
            Packet::Publish {
                messages: sample_frame(),
            },
        ];
        for packet in packets {
            let encoded = packet.encode().unwrap();
            assert_eq!(Packet::decode(&encoded).unwrap(), packet);
        }
    }

    #[test]
    fn ssid_from_topic_ignores_empty_segments() {
        assert_eq!(Ssid::from_topic("/a//b/"), Ssid::from_topic("a/b"));
        assert_ne!(Ssid::from_topic("a/b"), Ssid::from_topic("b/a"));
        assert_eq!(Ssid::from_topic("a/b").0.len(), 2);
    }
}
