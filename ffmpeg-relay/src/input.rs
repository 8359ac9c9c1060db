use std::path::Path;

use ffmpeg_next::{Dictionary, Packet, codec::Parameters};

use crate::{
    error::{RelayError, Result},
    media::{InputHandle, InputOptions, ReadOutcome},
    packet::RawPacket,
    stream::StreamDescriptor,
};

/// A demuxer opened on a URL or file path. Opening also probes the streams.
pub struct AvInput {
    address: String,
    inner: ffmpeg_next::format::context::Input,
}

impl AvInput {
    pub fn new(address: &str, options: &InputOptions) -> Result<Self> {
        let input = ffmpeg_next::format::input_with_dictionary(
            Path::new(address),
            input_dictionary(address, options),
        )
        .map_err(|e| RelayError::open(address, e))?;

        Ok(Self {
            address: address.to_string(),
            inner: input,
        })
    }

    pub fn format_name(&self) -> &str {
        self.inner.format().name()
    }

    /// Container duration in seconds; `None` for live sources.
    pub fn duration_sec(&self) -> Option<f64> {
        let d = self.inner.duration();
        if d == ffmpeg_next::ffi::AV_NOPTS_VALUE as i64 || d <= 0 {
            None
        } else {
            Some(d as f64 / ffmpeg_next::ffi::AV_TIME_BASE as f64)
        }
    }
}

impl InputHandle for AvInput {
    type Codec = Parameters;
    type Payload = Packet;

    fn address(&self) -> &str {
        &self.address
    }

    fn probe_streams(&mut self) -> Result<Vec<StreamDescriptor<Parameters>>> {
        Ok(self
            .inner
            .streams()
            .map(|stream| {
                StreamDescriptor::new(
                    stream.index(),
                    stream.parameters(),
                    stream.time_base().into(),
                )
            })
            .collect())
    }

    fn read_packet(&mut self) -> Result<ReadOutcome<Packet>> {
        let mut packet = Packet::empty();
        match packet.read(&mut self.inner) {
            Ok(()) => {}
            Err(ffmpeg_next::Error::Eof) => return Ok(ReadOutcome::End),
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                return Ok(ReadOutcome::Again);
            }
            Err(e) => return Err(RelayError::read(&self.address, e)),
        }

        let (index, pts, dts, duration) =
            (packet.stream(), packet.pts(), packet.dts(), packet.duration());
        Ok(ReadOutcome::Packet(
            RawPacket::new(index, packet).with_timing(pts, dts, duration),
        ))
    }
}

fn is_rtsp(address: &str) -> bool {
    let lower = address.to_ascii_lowercase();
    lower.starts_with("rtsp://") || lower.starts_with("rtsps://")
}

fn is_network(address: &str) -> bool {
    address.contains("://") && !address.to_ascii_lowercase().starts_with("file:")
}

/// Demuxer/protocol options. Times are in microseconds.
fn input_dictionary(address: &str, options: &InputOptions) -> Dictionary<'static> {
    let mut dict = Dictionary::new();
    let timeout = options.timeout.as_micros().to_string();
    if is_rtsp(address) {
        dict.set("rtsp_transport", options.transport.as_str());
        dict.set("timeout", &timeout);
    } else if is_network(address) {
        dict.set("rw_timeout", &timeout);
    }
    if is_network(address) {
        dict.set("buffer_size", &options.buffer_size.to_string());
    }
    dict.set("max_delay", &options.max_delay.as_micros().to_string());
    dict
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Transport;

    #[test]
    fn test_rtsp_dictionary() {
        let options = InputOptions {
            transport: Transport::Udp,
            ..Default::default()
        };
        let dict = input_dictionary("rtsp://cam:554/live", &options);
        assert_eq!(dict.get("rtsp_transport"), Some("udp"));
        assert_eq!(dict.get("timeout"), Some("5000000"));
        assert_eq!(dict.get("buffer_size"), Some("1024000"));
        assert_eq!(dict.get("max_delay"), Some("500000"));
        assert_eq!(dict.get("rw_timeout"), None);
    }

    #[test]
    fn test_file_dictionary() {
        let dict = input_dictionary("scripts/test.mp4", &InputOptions::default());
        assert_eq!(dict.get("rtsp_transport"), None);
        assert_eq!(dict.get("rw_timeout"), None);
        assert_eq!(dict.get("buffer_size"), None);
    }

    #[test]
    fn test_http_dictionary() {
        let dict = input_dictionary("http://host/live.flv", &InputOptions::default());
        assert_eq!(dict.get("rw_timeout"), Some("5000000"));
        assert_eq!(dict.get("timeout"), None);
    }
}
