//! Relay session: one worker thread copying packets from an input to its outputs.
//!
//! ```text
//!            start()
//!   Idle ──────────► Opening ──► Streaming ──► Draining ──► Closed
//!                       │            │            │
//!                       └────────────┴────────────┴──────► Error
//! ```
//!
//! The worker thread owns every binding and packet. The controlling thread
//! only touches the cancellation flag, which the worker polls before each
//! read, and joins the worker on `stop()`.

use std::{
    any::Any,
    collections::{HashMap, HashSet},
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
};

use serde::Serialize;
use tokio::sync::watch;

use crate::{
    error::{RelayError, Result},
    media::{
        InputHandle, InputOptions, MediaBackend, OutputHandle, OutputOptions, Payload,
        READ_RETRY_INTERVAL, ReadOutcome,
    },
    mirror::mirror,
    packet::RawPacket,
    rescale::{Rational, rescale_duration, rescale_ts},
    stream::{Direction, StreamDescriptor, StreamIndexMap},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputTarget {
    pub address: String,
    /// Muxer name; `None` = guess from the address.
    pub format: Option<String>,
}

impl OutputTarget {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            format: None,
        }
    }

    pub fn with_format(mut self, format: &str) -> Self {
        self.format = Some(format.to_string());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    pub input: String,
    pub input_options: InputOptions,
    pub outputs: Vec<OutputTarget>,
    pub output_options: OutputOptions,
}

impl RelayConfig {
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct RelayConfigBuilder {
    input: String,
    input_options: InputOptions,
    outputs: Vec<OutputTarget>,
    output_options: OutputOptions,
}

impl RelayConfigBuilder {
    pub fn input(mut self, address: &str) -> Self {
        self.input = address.to_string();
        self
    }

    pub fn input_options(mut self, options: InputOptions) -> Self {
        self.input_options = options;
        self
    }

    pub fn add_output(mut self, address: &str) -> Self {
        self.outputs.push(OutputTarget::new(address));
        self
    }

    pub fn add_output_with_format(mut self, address: &str, format: &str) -> Self {
        self.outputs.push(OutputTarget::new(address).with_format(format));
        self
    }

    pub fn add_target(mut self, target: OutputTarget) -> Self {
        self.outputs.push(target);
        self
    }

    pub fn output_options(mut self, options: OutputOptions) -> Self {
        self.output_options = options;
        self
    }

    pub fn build(self) -> RelayConfig {
        RelayConfig {
            input: self.input,
            input_options: self.input_options,
            outputs: self.outputs,
            output_options: self.output_options,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Opening,
    Streaming,
    Draining,
    Closed,
    Error,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Error)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEnd {
    EndOfInput,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutputReport {
    pub address: String,
    pub packets_written: u64,
    pub bytes_written: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RelayReport {
    pub input: String,
    pub end: StreamEnd,
    pub packets_read: u64,
    /// Packets whose stream index had no output stream.
    pub packets_dropped: u64,
    pub outputs: Vec<OutputReport>,
}

pub type RelayOutcome = Result<RelayReport>;

pub struct RelaySession<B: MediaBackend> {
    backend: Arc<B>,
    config: Arc<RelayConfig>,
    // The only state written by the controlling thread and read by the worker.
    cancel: Arc<AtomicBool>,
    state: Arc<watch::Sender<SessionState>>,
    worker: Mutex<Option<JoinHandle<RelayOutcome>>>,
}

impl<B: MediaBackend> RelaySession<B> {
    pub fn new(backend: B, config: RelayConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            backend: Arc::new(backend),
            config: Arc::new(config),
            cancel: Arc::new(AtomicBool::new(false)),
            state: Arc::new(state),
            worker: Mutex::new(None),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawns the worker and returns without waiting for the streams to open.
    ///
    /// Returns `Ok(false)` if a worker is already running. The outcome of a
    /// worker that finished on its own and was never collected by `stop()`
    /// is discarded.
    pub fn start(&self) -> Result<bool> {
        let mut worker = self.lock_worker();
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            log::debug!("relay {} already running", self.config.input);
            return Ok(false);
        }
        if let Some(stale) = worker.take() {
            match join_worker(stale) {
                Ok(report) => log::debug!("discarding report of previous run: {:?}", report),
                Err(e) => log::debug!("discarding error of previous run: {}", e),
            }
        }

        self.cancel.store(false, Ordering::Release);
        self.state.send_replace(SessionState::Opening);

        let task = Worker {
            backend: self.backend.clone(),
            config: self.config.clone(),
            cancel: self.cancel.clone(),
            state: self.state.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("relay-worker".to_string())
            .spawn(move || task.run())
            .map_err(|e| {
                self.state.send_replace(SessionState::Error);
                RelayError::Spawn(e.to_string())
            })?;

        log::info!(
            "relay started: {} -> {} output(s)",
            self.config.input,
            self.config.outputs.len()
        );
        *worker = Some(handle);
        Ok(true)
    }

    /// Requests cancellation and blocks until the worker has released every
    /// resource. Returns the worker's outcome, or `None` if nothing was running.
    pub fn stop(&self) -> Option<RelayOutcome> {
        let mut worker = self.lock_worker();
        let handle = worker.take()?;

        log::info!("relay stopping: {}", self.config.input);
        self.cancel.store(true, Ordering::Release);
        let outcome = join_worker(handle);
        if let Err(RelayError::WorkerPanicked(_)) = &outcome {
            self.state.send_replace(SessionState::Error);
        }
        Some(outcome)
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<RelayOutcome>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: MediaBackend> Drop for RelaySession<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn join_worker(handle: JoinHandle<RelayOutcome>) -> RelayOutcome {
    handle
        .join()
        .unwrap_or_else(|payload| Err(RelayError::WorkerPanicked(panic_message(payload))))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Worker<B: MediaBackend> {
    backend: Arc<B>,
    config: Arc<RelayConfig>,
    cancel: Arc<AtomicBool>,
    state: Arc<watch::Sender<SessionState>>,
}

impl<B: MediaBackend> Worker<B> {
    fn run(self) -> RelayOutcome {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| self.relay()))
            .unwrap_or_else(|payload| Err(RelayError::WorkerPanicked(panic_message(payload))));

        match &outcome {
            Ok(report) => {
                log::info!(
                    "relay completed: {} ({:?}, {} packets read, {} dropped)",
                    report.input,
                    report.end,
                    report.packets_read,
                    report.packets_dropped
                );
                self.transition(SessionState::Closed);
            }
            Err(e) => {
                log::error!("relay {} failed: {}", self.config.input, e);
                self.transition(SessionState::Error);
            }
        }
        outcome
    }

    fn transition(&self, state: SessionState) {
        log::debug!("relay {}: -> {:?}", self.config.input, state);
        self.state.send_replace(state);
    }

    fn relay(&self) -> RelayOutcome {
        let mut bindings = self.open()?;

        self.transition(SessionState::Streaming);
        let mut report = RelayReport {
            input: self.config.input.clone(),
            end: StreamEnd::EndOfInput,
            packets_read: 0,
            packets_dropped: 0,
            outputs: Vec::new(),
        };
        let streamed = self.stream(&mut bindings, &mut report);

        // Finalize even after a failure so what was written stays playable.
        self.transition(SessionState::Draining);
        let drained = bindings.finish();
        report.outputs = bindings.outputs.iter().map(OutputBinding::report).collect();
        drop(bindings);

        match (streamed, drained) {
            (Ok(end), Ok(())) => {
                report.end = end;
                Ok(report)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(trailer)) => {
                log::error!("trailer failed after stream error: {}", trailer);
                Err(e)
            }
        }
    }

    /// Acquires input then outputs. On failure everything acquired so far
    /// is dropped, newest first.
    fn open(&self) -> Result<Bindings<B>> {
        let config = &self.config;
        if config.outputs.is_empty() {
            return Err(RelayError::open(&config.input, "no outputs configured"));
        }

        let mut handle = self
            .backend
            .open_input(&config.input, &config.input_options)?;
        let streams = handle.probe_streams()?;
        if streams.is_empty() {
            return Err(RelayError::open(&config.input, "no streams found"));
        }
        log_layout(Direction::Input, &config.input, &streams);

        let mut bindings = Bindings {
            outputs: Vec::with_capacity(config.outputs.len()),
            input: InputBinding { handle, streams },
        };
        for target in &config.outputs {
            let handle = self.backend.allocate_output(
                target.format.as_deref(),
                &target.address,
                &config.output_options,
            )?;
            let mut output = OutputBinding::new(handle);
            output.setup(&bindings.input.streams)?;
            bindings.outputs.push(output);
        }

        Ok(bindings)
    }

    fn stream(&self, bindings: &mut Bindings<B>, report: &mut RelayReport) -> Result<StreamEnd> {
        let mut unmapped = HashSet::new();
        let count = bindings.outputs.len();

        loop {
            if self.cancel.load(Ordering::Acquire) {
                log::info!("relay {} cancelled", self.config.input);
                return Ok(StreamEnd::Cancelled);
            }

            let packet = match bindings.input.handle.read_packet()? {
                ReadOutcome::Packet(packet) => packet,
                ReadOutcome::Again => {
                    std::thread::sleep(READ_RETRY_INTERVAL);
                    continue;
                }
                ReadOutcome::End => {
                    log::info!("end of input: {}", self.config.input);
                    return Ok(StreamEnd::EndOfInput);
                }
            };
            report.packets_read += 1;

            let index = packet.stream_index();
            let mut packet = Some(packet);
            let mut delivered = false;
            for (i, output) in bindings.outputs.iter_mut().enumerate() {
                let Some(route) = output.routes.get(&index).copied() else {
                    continue;
                };
                let copy = if i + 1 == count {
                    packet.take()
                } else {
                    packet.clone()
                };
                if let Some(copy) = copy {
                    output.write(route, copy)?;
                    delivered = true;
                }
            }

            if !delivered {
                report.packets_dropped += 1;
                if unmapped.insert(index) {
                    log::warn!("dropping packets of unmapped input stream {}", index);
                } else {
                    log::trace!("dropped packet of unmapped input stream {}", index);
                }
            }
        }
    }
}

fn log_layout<C>(direction: Direction, address: &str, streams: &[StreamDescriptor<C>]) {
    log::info!("{:?} {}: {} stream(s)", direction, address, streams.len());
    for stream in streams {
        log::info!("  stream {}: time_base {}", stream.index(), stream.time_base());
    }
}

// Fields drop in declaration order; `Drop` below makes the order explicit.
struct Bindings<B: MediaBackend> {
    outputs: Vec<OutputBinding<B::Output>>,
    input: InputBinding<B::Input>,
}

impl<B: MediaBackend> Bindings<B> {
    /// Writes the trailer of every output that got a header. A failure on one
    /// output does not keep the others from being finalized.
    fn finish(&mut self) -> Result<()> {
        let mut first = None;
        for output in &mut self.outputs {
            if let Err(e) = output.finish() {
                log::error!("{}", e);
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl<B: MediaBackend> Drop for Bindings<B> {
    fn drop(&mut self) {
        while let Some(output) = self.outputs.pop() {
            drop(output);
        }
    }
}

struct InputBinding<I: InputHandle> {
    handle: I,
    streams: Vec<StreamDescriptor<I::Codec>>,
}

impl<I: InputHandle> Drop for InputBinding<I> {
    fn drop(&mut self) {
        // the handle itself is dropped right after this
        log::debug!("releasing input {}", self.handle.address());
    }
}

#[derive(Clone, Copy, Debug)]
struct Route {
    output: usize,
    from: Rational,
    to: Rational,
}

struct OutputBinding<O: OutputHandle> {
    handle: O,
    index_map: StreamIndexMap,
    routes: HashMap<usize, Route>,
    transport_open: bool,
    header_written: bool,
    trailer_written: bool,
    packets_written: u64,
    bytes_written: u64,
}

impl<O> OutputBinding<O>
where
    O: OutputHandle,
    O::Payload: Payload,
{
    fn new(handle: O) -> Self {
        Self {
            handle,
            index_map: StreamIndexMap::new(),
            routes: HashMap::new(),
            transport_open: false,
            header_written: false,
            trailer_written: false,
            packets_written: 0,
            bytes_written: 0,
        }
    }

    fn setup(&mut self, inputs: &[StreamDescriptor<O::Codec>]) -> Result<()> {
        let mirror = mirror(inputs, &mut self.handle)?;
        let mut streams = mirror.streams;
        self.index_map = mirror.index_map;

        if self.handle.needs_transport() {
            self.handle.open_transport()?;
            self.transport_open = true;
        }
        self.handle.write_header()?;
        self.header_written = true;

        for stream in &mut streams {
            if let Some(time_base) = self.handle.stream_time_base(stream.index()) {
                if time_base != stream.time_base() {
                    log::debug!(
                        "{}: stream {} time base {} -> {} after header",
                        self.handle.address(),
                        stream.index(),
                        stream.time_base(),
                        time_base
                    );
                    stream.set_time_base(time_base);
                }
            }
        }
        log_layout(Direction::Output, self.handle.address(), &streams);

        for input in inputs {
            let Some(output) = self.index_map.get(input.index()) else {
                continue;
            };
            let Some(stream) = streams.iter().find(|s| s.index() == output) else {
                continue;
            };
            self.routes.insert(
                input.index(),
                Route {
                    output,
                    from: input.time_base(),
                    to: stream.time_base(),
                },
            );
        }
        Ok(())
    }

    fn write(&mut self, route: Route, mut packet: RawPacket<O::Payload>) -> Result<()> {
        packet.set_pts(rescale_ts(packet.pts(), route.from, route.to));
        packet.set_dts(rescale_ts(packet.dts(), route.from, route.to));
        packet.set_duration(rescale_duration(packet.duration(), route.from, route.to));
        packet.set_stream_index(route.output);

        let size = packet.payload().size();
        self.handle.write_packet(packet)?;
        self.packets_written += 1;
        self.bytes_written += size as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.header_written && !self.trailer_written {
            self.trailer_written = true;
            self.handle.write_trailer()?;
        }
        Ok(())
    }

    fn report(&self) -> OutputReport {
        OutputReport {
            address: self.handle.address().to_string(),
            packets_written: self.packets_written,
            bytes_written: self.bytes_written,
        }
    }
}

impl<O: OutputHandle> Drop for OutputBinding<O> {
    fn drop(&mut self) {
        if self.transport_open {
            self.transport_open = false;
            self.handle.close_transport();
        }
        log::debug!("releasing output {}", self.handle.address());
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
