//! FFmpeg-backed [`MediaBackend`].

use ffmpeg_next::{Packet, codec::Parameters};

use crate::{
    error::Result,
    input::AvInput,
    media::{InputOptions, MediaBackend, OutputOptions, Payload},
    output::AvOutput,
};

impl Payload for Packet {
    fn size(&self) -> usize {
        Packet::size(self)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MediaBackend for FfmpegBackend {
    type Codec = Parameters;
    type Payload = Packet;
    type Input = AvInput;
    type Output = AvOutput;

    fn open_input(&self, address: &str, options: &InputOptions) -> Result<AvInput> {
        log::debug!("opening input {} ({:?})", address, options);
        AvInput::new(address, options)
    }

    fn allocate_output(
        &self,
        format: Option<&str>,
        address: &str,
        options: &OutputOptions,
    ) -> Result<AvOutput> {
        let output = AvOutput::new(address, format, options)?;
        log::debug!("allocated output {} as {}", address, output.format_name());
        Ok(output)
    }
}

#[cfg(test)]
#[path = "remux_test.rs"]
mod remux_test;
