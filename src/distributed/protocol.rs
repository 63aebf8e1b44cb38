//! Compute RPC protocol
//!
//! Messages exchanged between the coordinator and region workers, encoded
//! with MessagePack (rmp-serde) and framed with a length prefix.
//!
//! # Protocol Version
//!
//! Current version: 1. Every request carries it; a worker answers a request
//! with a different version with [`Message::Error`] instead of computing.
//!
//! # Message Flow
//!
//! ```text
//! Coordinator                     Worker
//!     |                              |
//!     |---- COMPUTE_REGION --------->|
//!     |                              |  FragmentEvaluator
//!     |<--- REGION_COMPUTED ---------|
//!     |        (or ERROR)            |
//! ```
//!
//! One connection carries any number of request/response pairs, strictly
//! alternating.
//!
//! # Message Framing
//!
//! ```text
//! [4 bytes: message length (little-endian u32)][N bytes: MessagePack message]
//! ```
//!
//! # Pixel Order
//!
//! `pixels` holds `width * height * 3` bytes, column-major within the region:
//! byte offset of `(x, y)` is `((x - x_start) * height + (y - y_start)) * 3`.
//! This is the order the fragment evaluator writes, so buffers cross the wire
//! without reshuffling. They are encoded as a MessagePack `bin` blob.

use crate::balance::Region;
use crate::render::RenderParams;
use crate::util::time::{duration_to_nanos_i64, nanos_i64_to_duration};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version
///
/// Increment this when making breaking changes to the protocol.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame accepted off the wire (256 MiB)
///
/// Bounds the allocation a peer can force with a forged length prefix. A
/// worker also refuses regions whose reply would exceed it.
pub const MAX_MESSAGE_BYTES: usize = 256 * 1024 * 1024;

/// Protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Compute one region (Coordinator → Worker)
    ComputeRegion(ComputeRegionRequest),

    /// Finished pixels (Worker → Coordinator)
    RegionComputed(ComputeRegionResponse),

    /// The request could not be served (Worker → Coordinator)
    Error(ErrorMessage),
}

/// Compute request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeRegionRequest {
    /// Protocol version (must match)
    pub protocol_version: u32,

    pub magnification: f64,
    pub max_iterations: f64,
    pub pan_x: f64,
    pub pan_y: f64,

    /// Slot of the receiving node in the coordinator's node order
    pub node_index: i32,

    pub region: Region,
}

impl ComputeRegionRequest {
    /// Build a request for `region` at the current protocol version
    ///
    /// # Arguments
    ///
    /// * `params` - Scene parameters of the frame being rendered
    /// * `node_index` - Slot of the receiving node; echoed back in the reply
    /// * `region` - Columns and rows the worker must evaluate
    ///
    /// # Example
    ///
    /// ```
    /// use mandelfarm::balance::Region;
    /// use mandelfarm::distributed::protocol::{ComputeRegionRequest, PROTOCOL_VERSION};
    /// use mandelfarm::render::RenderParams;
    ///
    /// let params = RenderParams::default();
    /// let request = ComputeRegionRequest::new(&params, 2, Region::new(0, 99, 0, 59));
    ///
    /// assert_eq!(request.protocol_version, PROTOCOL_VERSION);
    /// assert_eq!(request.params(), params);
    /// ```
    pub fn new(params: &RenderParams, node_index: i32, region: Region) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            magnification: params.magnification,
            max_iterations: params.max_iterations,
            pan_x: params.pan_x,
            pan_y: params.pan_y,
            node_index,
            region,
        }
    }

    /// Scene parameters carried by this request
    pub fn params(&self) -> RenderParams {
        RenderParams {
            magnification: self.magnification,
            max_iterations: self.max_iterations,
            pan_x: self.pan_x,
            pan_y: self.pan_y,
        }
    }
}

/// Compute response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeRegionResponse {
    pub node_index: i32,

    /// Column-major RGB triples, `region.pixel_bytes()` long
    #[serde(with = "pixel_bytes")]
    pub pixels: Vec<u8>,

    /// Wall time of each fragment thread on the worker (nanoseconds)
    pub thread_times_ns: Vec<i64>,
}

impl ComputeRegionResponse {
    /// Wrap finished pixels and the per-thread timings that produced them
    ///
    /// # Arguments
    ///
    /// * `node_index` - Slot copied from the request
    /// * `pixels` - Column-major RGB bytes for the whole region
    /// * `thread_times` - Wall time of each fragment thread, in thread order
    pub fn new(node_index: i32, pixels: Vec<u8>, thread_times: &[Duration]) -> Self {
        Self {
            node_index,
            pixels,
            thread_times_ns: thread_times.iter().copied().map(duration_to_nanos_i64).collect(),
        }
    }

    /// Per-thread timings converted back to durations
    ///
    /// Negative values (a clock that went backwards on the worker) read as zero.
    pub fn thread_times(&self) -> Vec<Duration> {
        self.thread_times_ns.iter().copied().map(nanos_i64_to_duration).collect()
    }
}

/// Error message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Worker identifier (hostname)
    pub node_id: String,

    /// Node index copied from the failed request (-1 if it could not be read)
    pub node_index: i32,

    /// Error description
    pub error: String,
}

/// Encode pixel buffers as MessagePack `bin` rather than an array of integers
mod pixel_bytes {
    use serde::de::{SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        deserializer.deserialize_byte_buf(BytesVisitor)
    }

    struct BytesVisitor;

    impl<'de> Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a byte buffer")
        }

        fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Vec<u8>, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Vec<u8>, E> {
            Ok(v)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<u8>, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(byte) = seq.next_element()? {
                out.push(byte);
            }
            Ok(out)
        }
    }
}

/// Serialize a message to a length-prefixed frame
///
/// ```text
/// [4 bytes: message length (little-endian u32)][N bytes: MessagePack message]
/// ```
///
/// # Arguments
///
/// * `msg` - Message to encode
///
/// # Returns
///
/// The complete frame, ready to be written in one call.
///
/// # Errors
///
/// Fails if MessagePack encoding fails or the body does not fit a `u32` length.
///
/// # Example
///
/// ```
/// use mandelfarm::distributed::protocol::{deserialize_message, serialize_message, ErrorMessage, Message};
///
/// let msg = Message::Error(ErrorMessage {
///     node_id: "worker-1".to_string(),
///     node_index: 0,
///     error: "busy".to_string(),
/// });
/// let frame = serialize_message(&msg).unwrap();
///
/// let (decoded, consumed) = deserialize_message(&frame).unwrap();
/// assert_eq!(decoded, msg);
/// assert_eq!(consumed, frame.len());
/// ```
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>> {
    let msg_bytes = rmp_serde::to_vec(msg).context("Failed to serialize message")?;

    let msg_len = u32::try_from(msg_bytes.len()).context("Message exceeds u32 length prefix")?;
    let mut framed = Vec::with_capacity(4 + msg_bytes.len());
    framed.extend_from_slice(&msg_len.to_le_bytes());
    framed.extend_from_slice(&msg_bytes);

    Ok(framed)
}

/// Deserialize a message from a frame
///
/// # Arguments
///
/// * `buf` - Bytes starting at a length prefix; anything past the first
///   frame is ignored
///
/// # Returns
///
/// `(message, bytes_consumed)`, where `bytes_consumed` includes the 4-byte
/// length prefix.
///
/// # Errors
///
/// Fails when `buf` holds less than one complete frame or the body is not a
/// valid [`Message`].
pub fn deserialize_message(buf: &[u8]) -> Result<(Message, usize)> {
    if buf.len() < 4 {
        anyhow::bail!("Buffer too small for message length (need 4 bytes, got {})", buf.len());
    }

    let msg_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if buf.len() < 4 + msg_len {
        anyhow::bail!("Incomplete message (need {} bytes, got {})", 4 + msg_len, buf.len());
    }

    let msg = rmp_serde::from_slice(&buf[4..4 + msg_len]).context("Failed to deserialize message")?;

    Ok((msg, 4 + msg_len))
}

/// Read one complete message from a stream
///
/// Waits for the length prefix, then for the full body.
///
/// # Errors
///
/// Fails on EOF or I/O error, on a length above [`MAX_MESSAGE_BYTES`] (the
/// body is never allocated), or on a body that does not decode.
pub async fn read_message<R>(stream: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .context("Failed to read message length")?;

    let msg_len = u32::from_le_bytes(len_buf) as usize;

    if msg_len > MAX_MESSAGE_BYTES {
        anyhow::bail!("Message too large: {} bytes (max {})", msg_len, MAX_MESSAGE_BYTES);
    }

    let mut msg_buf = vec![0u8; msg_len];
    stream
        .read_exact(&mut msg_buf)
        .await
        .context("Failed to read message body")?;

    let msg = rmp_serde::from_slice(&msg_buf).context("Failed to deserialize message")?;

    Ok(msg)
}

/// Write one message to a stream and flush it
///
/// # Arguments
///
/// * `stream` - Any async writer; a `TcpStream` or one half of it in practice
/// * `msg` - Message to frame and send
///
/// # Errors
///
/// Fails if encoding fails or the stream rejects the write or flush.
pub async fn write_message<W>(stream: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let framed = serialize_message(msg)?;

    stream.write_all(&framed).await.context("Failed to write message")?;
    stream.flush().await.context("Failed to flush stream")?;

    Ok(())
}
