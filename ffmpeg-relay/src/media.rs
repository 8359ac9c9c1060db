//! The container library contract the relay is written against.
//!
//! A backend opens endpoints and moves compressed packets; it never decodes.
//! Handles are created and used on the relay worker thread only, so they do
//! not need to be `Send`. Releasing a handle is done by dropping it and must
//! never fail observably.

use std::time::Duration;

use bytes::Bytes;

use crate::{error::Result, packet::RawPacket, rescale::Rational, stream::StreamDescriptor};

/// Payload of a packet as produced by a backend.
pub trait Payload: Clone {
    /// Size of the compressed data in bytes.
    fn size(&self) -> usize;
}

impl Payload for Bytes {
    fn size(&self) -> usize {
        self.len()
    }
}

pub trait MediaBackend: Send + Sync + 'static {
    type Codec: Clone;
    type Payload: Payload;
    type Input: InputHandle<Codec = Self::Codec, Payload = Self::Payload>;
    type Output: OutputHandle<Codec = Self::Codec, Payload = Self::Payload>;

    /// Connects to the source and parses its container header.
    fn open_input(&self, address: &str, options: &InputOptions) -> Result<Self::Input>;

    /// Allocates an output container. `format` is a short muxer name such as
    /// "rtsp" or "flv"; `None` lets the backend guess from `address`.
    fn allocate_output(
        &self,
        format: Option<&str>,
        address: &str,
        options: &OutputOptions,
    ) -> Result<Self::Output>;
}

pub trait InputHandle {
    type Codec;
    type Payload;

    fn address(&self) -> &str;

    /// Elementary streams in container order.
    fn probe_streams(&mut self) -> Result<Vec<StreamDescriptor<Self::Codec>>>;

    fn read_packet(&mut self) -> Result<ReadOutcome<Self::Payload>>;
}

#[derive(Debug)]
pub enum ReadOutcome<P> {
    Packet(RawPacket<P>),
    /// Nothing available yet; the caller decides when to read again.
    Again,
    End,
}

/// Pause before reading again after [`ReadOutcome::Again`].
pub const READ_RETRY_INTERVAL: Duration = Duration::from_millis(10);

pub trait OutputHandle {
    type Codec;
    type Payload;

    fn address(&self) -> &str;

    /// Appends a stream carrying `codec`. `time_base_hint` is the input
    /// stream's time base; the container is free to assign another one.
    fn add_stream(
        &mut self,
        codec: &Self::Codec,
        time_base_hint: Rational,
    ) -> Result<StreamDescriptor<Self::Codec>>;

    /// Current time base of an output stream. Muxers may change it while
    /// writing the header.
    fn stream_time_base(&self, index: usize) -> Option<Rational>;

    /// Whether the format needs [`OutputHandle::open_transport`] before the header.
    fn needs_transport(&self) -> bool;

    fn open_transport(&mut self) -> Result<()>;

    fn write_header(&mut self) -> Result<()>;

    fn write_packet(&mut self, packet: RawPacket<Self::Payload>) -> Result<()>;

    fn write_trailer(&mut self) -> Result<()>;

    /// Best-effort release of a transport opened by `open_transport`.
    fn close_transport(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        }
    }
}

impl std::str::FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "udp" => Ok(Transport::Udp),
            other => Err(format!("unknown transport: {}", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputOptions {
    /// Delivery used for RTSP sources.
    pub transport: Transport,
    /// Socket I/O timeout; bounds how long a stalled source can block the worker.
    pub timeout: Duration,
    /// Receive buffer size in bytes.
    pub buffer_size: usize,
    /// Maximum demuxing delay.
    pub max_delay: Duration,
}

impl Default for InputOptions {
    fn default() -> Self {
        Self {
            transport: Transport::Tcp,
            timeout: Duration::from_secs(5),
            buffer_size: 1_024_000,
            max_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputOptions {
    /// Delivery used when re-publishing over RTSP.
    pub transport: Transport,
    pub timeout: Duration,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            transport: Transport::Tcp,
            timeout: Duration::from_secs(5),
        }
    }
}
