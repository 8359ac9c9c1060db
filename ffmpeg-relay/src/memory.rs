//! In-process backend: scripted sources and recording sinks.
//!
//! Sources are looked up by address; an unknown address behaves like an
//! unreachable host. Sinks record everything written to them into a
//! [`MemoryArtifact`] that can be inspected while the relay runs and after
//! it stopped. Every acquire/release is appended to an event log.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use bytes::Bytes;

use crate::{
    error::{RelayError, Result},
    media::{InputHandle, InputOptions, MediaBackend, OutputHandle, OutputOptions, ReadOutcome},
    packet::RawPacket,
    rescale::Rational,
    stream::StreamDescriptor,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryCodec {
    pub name: String,
    pub tag: u32,
}

impl MemoryCodec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tag: 0,
        }
    }

    pub fn with_tag(mut self, tag: u32) -> Self {
        self.tag = tag;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendEvent {
    InputOpened(String),
    InputReleased(String),
    OutputAllocated(String),
    TransportOpened(String),
    TransportClosed(String),
    OutputReleased(String),
}

/// What a sink received.
#[derive(Clone, Debug, Default)]
pub struct MemoryArtifact {
    pub format: Option<String>,
    pub streams: Vec<StreamDescriptor<MemoryCodec>>,
    pub header_written: bool,
    pub trailer_written: bool,
    pub packets: Vec<RawPacket<Bytes>>,
}

impl MemoryArtifact {
    /// Header and trailer are both present.
    pub fn is_complete(&self) -> bool {
        self.header_written && self.trailer_written
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    streams: Vec<(MemoryCodec, Rational)>,
    packets: VecDeque<RawPacket<Bytes>>,
    pace: Option<Duration>,
    stalled: bool,
    fail_read_after: Option<usize>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream(mut self, codec: MemoryCodec, time_base: Rational) -> Self {
        self.streams.push((codec, time_base));
        self
    }

    pub fn with_packet(mut self, packet: RawPacket<Bytes>) -> Self {
        self.packets.push_back(packet);
        self
    }

    pub fn with_packets(mut self, packets: impl IntoIterator<Item = RawPacket<Bytes>>) -> Self {
        self.packets.extend(packets);
        self
    }

    /// Once the scripted packets are used up, keep producing one packet on
    /// stream 0 every `interval` instead of ending.
    pub fn endless(mut self, interval: Duration) -> Self {
        self.pace = Some(interval);
        self
    }

    /// Once the scripted packets are used up, report that no data is
    /// available on every read instead of ending.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    /// The read after `count` successful reads fails.
    pub fn failing_read_after(mut self, count: usize) -> Self {
        self.fail_read_after = Some(count);
        self
    }
}

#[derive(Clone, Debug)]
pub struct MemorySink {
    time_base: Option<Rational>,
    needs_transport: bool,
    rejected_codecs: Vec<String>,
    fail_transport: bool,
    fail_header: bool,
    fail_write_at: Option<usize>,
    fail_trailer: bool,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self {
            time_base: None,
            needs_transport: true,
            rejected_codecs: Vec::new(),
            fail_transport: false,
            fail_header: false,
            fail_write_at: None,
            fail_trailer: false,
        }
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stream gets this time base instead of the input's.
    pub fn with_time_base(mut self, time_base: Rational) -> Self {
        self.time_base = Some(time_base);
        self
    }

    /// Behave like a format that manages its own connection.
    pub fn without_transport(mut self) -> Self {
        self.needs_transport = false;
        self
    }

    pub fn rejecting_codec(mut self, name: &str) -> Self {
        self.rejected_codecs.push(name.to_string());
        self
    }

    pub fn failing_transport(mut self) -> Self {
        self.fail_transport = true;
        self
    }

    pub fn failing_header(mut self) -> Self {
        self.fail_header = true;
        self
    }

    /// The `n`th packet write (1-based) fails.
    pub fn failing_write_at(mut self, n: usize) -> Self {
        self.fail_write_at = Some(n);
        self
    }

    pub fn failing_trailer(mut self) -> Self {
        self.fail_trailer = true;
        self
    }
}

#[derive(Default)]
struct Shared {
    artifacts: Mutex<HashMap<String, MemoryArtifact>>,
    events: Mutex<Vec<BackendEvent>>,
}

impl Shared {
    fn artifacts(&self) -> MutexGuard<'_, HashMap<String, MemoryArtifact>> {
        self.artifacts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: BackendEvent) {
        log::trace!("memory backend: {:?}", event);
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    fn update(&self, address: &str, f: impl FnOnce(&mut MemoryArtifact)) {
        f(self.artifacts().entry(address.to_string()).or_default());
    }
}

/// Cloning shares the recorded artifacts and events.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    sources: HashMap<String, MemorySource>,
    sinks: HashMap<String, MemorySink>,
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, address: &str, source: MemorySource) -> Self {
        self.sources.insert(address.to_string(), source);
        self
    }

    /// Addresses without a registered sink get `MemorySink::default()`.
    pub fn with_sink(mut self, address: &str, sink: MemorySink) -> Self {
        self.sinks.insert(address.to_string(), sink);
        self
    }

    pub fn artifact(&self, address: &str) -> Option<MemoryArtifact> {
        self.shared.artifacts().get(address).cloned()
    }

    /// Number of packets a sink holds right now.
    pub fn written(&self, address: &str) -> usize {
        self.shared
            .artifacts()
            .get(address)
            .map_or(0, |a| a.packets.len())
    }

    pub fn events(&self) -> Vec<BackendEvent> {
        self.shared
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MediaBackend for MemoryBackend {
    type Codec = MemoryCodec;
    type Payload = Bytes;
    type Input = MemoryInput;
    type Output = MemoryOutput;

    fn open_input(&self, address: &str, _options: &InputOptions) -> Result<MemoryInput> {
        let source = self
            .sources
            .get(address)
            .cloned()
            .ok_or_else(|| RelayError::open(address, "connection refused"))?;
        self.shared
            .record(BackendEvent::InputOpened(address.to_string()));
        Ok(MemoryInput {
            address: address.to_string(),
            source,
            reads: 0,
            next_pts: 0,
            shared: self.shared.clone(),
        })
    }

    fn allocate_output(
        &self,
        format: Option<&str>,
        address: &str,
        _options: &OutputOptions,
    ) -> Result<MemoryOutput> {
        let sink = self.sinks.get(address).cloned().unwrap_or_default();
        self.shared.update(address, |artifact| {
            *artifact = MemoryArtifact {
                format: format.map(str::to_string),
                ..Default::default()
            }
        });
        self.shared
            .record(BackendEvent::OutputAllocated(address.to_string()));
        Ok(MemoryOutput {
            address: address.to_string(),
            sink,
            streams: Vec::new(),
            transport_open: false,
            header_written: false,
            writes: 0,
            shared: self.shared.clone(),
        })
    }
}

pub struct MemoryInput {
    address: String,
    source: MemorySource,
    reads: usize,
    next_pts: i64,
    shared: Arc<Shared>,
}

impl InputHandle for MemoryInput {
    type Codec = MemoryCodec;
    type Payload = Bytes;

    fn address(&self) -> &str {
        &self.address
    }

    fn probe_streams(&mut self) -> Result<Vec<StreamDescriptor<MemoryCodec>>> {
        Ok(self
            .source
            .streams
            .iter()
            .enumerate()
            .map(|(index, (codec, time_base))| {
                StreamDescriptor::new(index, codec.clone(), *time_base)
            })
            .collect())
    }

    fn read_packet(&mut self) -> Result<ReadOutcome<Bytes>> {
        if self.source.fail_read_after == Some(self.reads) {
            return Err(RelayError::read(&self.address, "connection reset by peer"));
        }
        self.reads += 1;

        if let Some(packet) = self.source.packets.pop_front() {
            self.next_pts = packet.pts().map_or(self.next_pts, |pts| pts + 3_000);
            return Ok(ReadOutcome::Packet(packet));
        }

        match self.source.pace {
            Some(interval) => {
                std::thread::sleep(interval);
                let pts = self.next_pts;
                self.next_pts += 3_000;
                let payload = Bytes::from(pts.to_be_bytes().to_vec());
                Ok(ReadOutcome::Packet(
                    RawPacket::new(0, payload).with_timing(Some(pts), Some(pts), 3_000),
                ))
            }
            None if self.source.stalled => Ok(ReadOutcome::Again),
            None => Ok(ReadOutcome::End),
        }
    }
}

impl Drop for MemoryInput {
    fn drop(&mut self) {
        self.shared
            .record(BackendEvent::InputReleased(self.address.clone()));
    }
}

pub struct MemoryOutput {
    address: String,
    sink: MemorySink,
    streams: Vec<StreamDescriptor<MemoryCodec>>,
    transport_open: bool,
    header_written: bool,
    writes: usize,
    shared: Arc<Shared>,
}

impl OutputHandle for MemoryOutput {
    type Codec = MemoryCodec;
    type Payload = Bytes;

    fn address(&self) -> &str {
        &self.address
    }

    fn add_stream(
        &mut self,
        codec: &MemoryCodec,
        time_base_hint: Rational,
    ) -> Result<StreamDescriptor<MemoryCodec>> {
        if self.sink.rejected_codecs.contains(&codec.name) {
            return Err(RelayError::topology(
                &self.address,
                self.streams.len(),
                format!("codec {} not supported by container", codec.name),
            ));
        }
        let mut codec = codec.clone();
        codec.tag = 0;
        let time_base = self.sink.time_base.unwrap_or(time_base_hint);
        let stream = StreamDescriptor::new(self.streams.len(), codec, time_base);
        self.streams.push(stream.clone());
        self.shared
            .update(&self.address, |artifact| artifact.streams.push(stream.clone()));
        Ok(stream)
    }

    fn stream_time_base(&self, index: usize) -> Option<Rational> {
        self.streams.get(index).map(|s| s.time_base())
    }

    fn needs_transport(&self) -> bool {
        self.sink.needs_transport
    }

    fn open_transport(&mut self) -> Result<()> {
        if self.sink.fail_transport {
            return Err(RelayError::open(&self.address, "permission denied"));
        }
        self.transport_open = true;
        self.shared
            .record(BackendEvent::TransportOpened(self.address.clone()));
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        if self.sink.fail_header {
            return Err(RelayError::header(&self.address, "invalid argument"));
        }
        if self.sink.needs_transport && !self.transport_open {
            return Err(RelayError::header(&self.address, "transport not open"));
        }
        self.header_written = true;
        self.shared
            .update(&self.address, |artifact| artifact.header_written = true);
        Ok(())
    }

    fn write_packet(&mut self, packet: RawPacket<Bytes>) -> Result<()> {
        self.writes += 1;
        if self.sink.fail_write_at == Some(self.writes) {
            return Err(RelayError::write(&self.address, "broken pipe"));
        }
        if !self.header_written {
            return Err(RelayError::write(&self.address, "header not written"));
        }
        if packet.stream_index() >= self.streams.len() {
            return Err(RelayError::write(
                &self.address,
                format!("no output stream {}", packet.stream_index()),
            ));
        }
        self.shared
            .update(&self.address, |artifact| artifact.packets.push(packet));
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        if self.sink.fail_trailer {
            return Err(RelayError::trailer(&self.address, "i/o error"));
        }
        if !self.header_written {
            return Err(RelayError::trailer(&self.address, "header not written"));
        }
        self.shared
            .update(&self.address, |artifact| artifact.trailer_written = true);
        Ok(())
    }

    fn close_transport(&mut self) {
        if self.transport_open {
            self.transport_open = false;
            self.shared
                .record(BackendEvent::TransportClosed(self.address.clone()));
        }
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        self.close_transport();
        self.shared
            .record(BackendEvent::OutputReleased(self.address.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_source_is_unreachable() {
        let backend = MemoryBackend::new();
        let err = backend
            .open_input("rtsp://nowhere/stream", &InputOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, RelayError::Open { .. }));
        assert!(backend.events().is_empty());
    }

    #[test]
    fn test_source_reads_script_then_ends() {
        let backend = MemoryBackend::new().with_source(
            "memory://in",
            MemorySource::new()
                .with_stream(MemoryCodec::new("h264"), Rational::new(1, 90_000))
                .with_packet(
                    RawPacket::new(0, Bytes::from_static(b"a"))
                        .with_timing(Some(0), Some(0), 3_000),
                ),
        );
        let mut input = backend
            .open_input("memory://in", &InputOptions::default())
            .unwrap();

        assert_eq!(input.probe_streams().unwrap().len(), 1);
        assert!(matches!(input.read_packet().unwrap(), ReadOutcome::Packet(_)));
        assert!(matches!(input.read_packet().unwrap(), ReadOutcome::End));
        drop(input);

        assert_eq!(
            backend.events(),
            vec![
                BackendEvent::InputOpened("memory://in".to_string()),
                BackendEvent::InputReleased("memory://in".to_string()),
            ]
        );
    }

    #[test]
    fn test_stalled_source_never_ends() {
        let backend = MemoryBackend::new().with_source(
            "memory://in",
            MemorySource::new()
                .with_stream(MemoryCodec::new("h264"), Rational::new(1, 90_000))
                .stalled(),
        );
        let mut input = backend
            .open_input("memory://in", &InputOptions::default())
            .unwrap();

        for _ in 0..3 {
            assert!(matches!(input.read_packet().unwrap(), ReadOutcome::Again));
        }
    }

    #[test]
    fn test_sink_requires_header_before_packets() {
        let backend = MemoryBackend::new();
        let mut output = backend
            .allocate_output(None, "memory://out", &OutputOptions::default())
            .unwrap();
        output
            .add_stream(&MemoryCodec::new("h264"), Rational::new(1, 90_000))
            .unwrap();

        let err = output
            .write_packet(RawPacket::new(0, Bytes::from_static(b"x")))
            .unwrap_err();
        assert!(matches!(err, RelayError::Write { .. }));
        assert_eq!(backend.written("memory://out"), 0);
    }
}
