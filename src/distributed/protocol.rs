//! Oracle network protocol
//!
//! This module defines every message that crosses a process boundary:
//!
//! - **JSON wire types** exchanged over HTTP and carried as bus payloads
//!   (`OracleRequest`, `WorkerOutcome`, `OracleResult`, registration messages)
//! - **Bus frames** exchanged between a [`TcpBus`](crate::distributed::broker::TcpBus)
//!   client and the [`Broker`](crate::distributed::broker::Broker)
//!
//! # Protocol Version
//!
//! Current bus protocol version: 1
//!
//! # Bus Message Flow
//!
//! ```text
//! Client                           Broker
//!   |                                |
//!   |-------- HELLO ---------------->|
//!   |-------- SUBSCRIBE(subject) --->|
//!   |                                |
//!   |-------- PUBLISH(subject) ----->|---- DELIVER ----> every subscriber
//!   |<------- DELIVER(subject) ------|
//!   |                                |
//!   |<------- ERROR -----------------|  (version mismatch, then close)
//! ```
//!
//! # Message Framing
//!
//! Each bus frame is prefixed with a 4-byte length field (little-endian u32):
//!
//! ```text
//! [4 bytes: frame length][N bytes: MessagePack-serialized frame]
//! ```

use crate::util::time::duration_nanos;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bus protocol version
///
/// Broker and clients must agree; a mismatch closes the connection.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame accepted from the wire
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Reliability note prefix of a round that could not be dispatched
pub const DISPATCH_FAILED_PREFIX: &str = "Dispatch failed: ";

/// A data query submitted to the oracle network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleRequest {
    /// Correlation key for the round; assigned by the coordinator when empty
    #[serde(default)]
    pub id: String,

    /// Asset pair ("BTC/USD") or any other key
    pub query: String,
}

impl OracleRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            query: query.into(),
        }
    }

    pub fn with_id(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
        }
    }
}

/// One worker's answer (or failure) for one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutcome {
    pub worker_id: String,
    pub request_id: String,
    #[serde(default)]
    pub value: f64,

    /// Absent on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,

    /// Elapsed time, nanoseconds on the wire
    #[serde(with = "duration_nanos", default)]
    pub response_time: Duration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reliable: Option<bool>,
}

impl WorkerOutcome {
    pub fn success(
        worker_id: impl Into<String>,
        request_id: impl Into<String>,
        value: f64,
        response_time: Duration,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            request_id: request_id.into(),
            value,
            err: None,
            response_time,
            reliable: None,
        }
    }

    pub fn failure(
        worker_id: impl Into<String>,
        request_id: impl Into<String>,
        err: impl ToString,
        response_time: Duration,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            request_id: request_id.into(),
            value: 0.0,
            err: Some(err.to_string()),
            response_time,
            reliable: None,
        }
    }

    /// True when the worker produced a value
    pub fn is_success(&self) -> bool {
        self.err.is_none()
    }
}

/// The composed answer for one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleResult {
    pub request_id: String,
    pub final_value: f64,

    /// Arrival order
    pub worker_responses: Vec<WorkerOutcome>,
    pub reliability_note: String,
}

impl OracleResult {
    /// Degraded result for a round that could not be dispatched at all
    pub fn dispatch_failed(request_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            request_id: request_id.into(),
            final_value: 0.0,
            worker_responses: Vec::new(),
            reliability_note: format!("{}{}", DISPATCH_FAILED_PREFIX, reason),
        }
    }

    /// True for a round whose task never reached the bus
    pub fn is_dispatch_failure(&self) -> bool {
        self.worker_responses.is_empty() && self.reliability_note.starts_with(DISPATCH_FAILED_PREFIX)
    }

    pub fn success_count(&self) -> usize {
        self.worker_responses.iter().filter(|o| o.is_success()).count()
    }

    /// False when `final_value` is the empty-set sentinel rather than data
    pub fn has_data(&self) -> bool {
        self.success_count() > 0
    }
}

/// Worker registration (direct topology)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub id: String,
    pub endpoint: String,
}

/// Coordinator's answer to a registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub status: String,
    pub message: String,
}

impl RegisterResponse {
    pub fn registered(worker_id: &str) -> Self {
        Self {
            status: "registered".to_string(),
            message: format!("Worker {} successfully registered", worker_id),
        }
    }
}

/// Encode a wire type as a bus payload (JSON)
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).context("Failed to encode bus payload")
}

/// Decode a bus payload (JSON)
pub fn decode_payload<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).context("Failed to decode bus payload")
}

/// Frame exchanged with the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BusFrame {
    /// First frame on every connection (Client → Broker)
    Hello(HelloMessage),

    /// Start receiving a subject (Client → Broker)
    Subscribe { subject: String },

    /// Publish to every subscriber of a subject (Client → Broker)
    Publish(PublishMessage),

    /// A message published on a subscribed subject (Broker → Client)
    Deliver(PublishMessage),

    /// Fatal protocol error (Broker → Client); the broker closes afterwards
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloMessage {
    pub protocol_version: u32,

    /// Free-form name used in broker logs
    pub client_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

/// Serialize a frame to bytes with its length prefix
pub fn serialize_frame(frame: &BusFrame) -> Result<Vec<u8>> {
    let frame_bytes = rmp_serde::to_vec(frame)
        .context("Failed to serialize frame")?;

    let frame_len = frame_bytes.len() as u32;
    let mut framed = Vec::with_capacity(4 + frame_bytes.len());
    framed.extend_from_slice(&frame_len.to_le_bytes());
    framed.extend_from_slice(&frame_bytes);

    Ok(framed)
}

/// Deserialize a frame from bytes
///
/// Returns (frame, bytes_consumed) where bytes_consumed includes the length prefix.
pub fn deserialize_frame(buf: &[u8]) -> Result<(BusFrame, usize)> {
    if buf.len() < 4 {
        anyhow::bail!("Buffer too small for frame length (need 4 bytes, got {})", buf.len());
    }

    let frame_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if buf.len() < 4 + frame_len {
        anyhow::bail!("Incomplete frame (need {} bytes, got {})", 4 + frame_len, buf.len());
    }

    let frame = rmp_serde::from_slice(&buf[4..4 + frame_len])
        .context("Failed to deserialize frame")?;

    Ok((frame, 4 + frame_len))
}

/// Read one complete frame from a stream (or one half of a split stream)
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<BusFrame> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await
        .context("Failed to read frame length")?;

    let frame_len = u32::from_le_bytes(len_buf) as usize;
    if frame_len > MAX_FRAME_BYTES {
        anyhow::bail!("Frame too large: {} bytes (max {})", frame_len, MAX_FRAME_BYTES);
    }

    let mut frame_buf = vec![0u8; frame_len];
    reader.read_exact(&mut frame_buf).await
        .context("Failed to read frame body")?;

    rmp_serde::from_slice(&frame_buf).context("Failed to deserialize frame")
}

/// Write one frame to a stream and flush it
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &BusFrame) -> Result<()> {
    let framed = serialize_frame(frame)?;

    writer.write_all(&framed).await
        .context("Failed to write frame")?;
    writer.flush().await
        .context("Failed to flush stream")?;

    Ok(())
}
