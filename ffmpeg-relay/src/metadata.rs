//! Stream layout inspection (similar to ffprobe).

use std::fmt;

use crate::{
    error::Result,
    input::AvInput,
    media::{InputHandle, InputOptions, READ_RETRY_INTERVAL, ReadOutcome},
    rescale::Rational,
};

/// Per-stream info (corresponds to ffprobe stream).
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    /// "video" | "audio" | "subtitle" | "data" ...
    pub codec_type: String,
    /// e.g. "h264", "aac"
    pub codec_name: String,
    pub time_base: Rational,
    /// Video only.
    pub width: Option<u32>,
    /// Video only.
    pub height: Option<u32>,
    /// Audio only.
    pub sample_rate: Option<u32>,
    /// Audio only.
    pub channels: Option<u32>,
    /// Filled by [`probe`] when packets are counted.
    pub packets: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub address: String,
    /// e.g. "mov,mp4,m4a,3gp,3g2,mj2"
    pub format_name: String,
    /// None for live sources.
    pub duration_sec: Option<f64>,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    /// Sum of the per-stream packet counts, if they were counted.
    pub fn total_packets(&self) -> Option<u64> {
        self.streams.iter().map(|s| s.packets).sum()
    }
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[FORMAT]")?;
        writeln!(f, "address={}", self.address)?;
        writeln!(f, "format_name={}", self.format_name)?;
        match self.duration_sec {
            Some(d) => writeln!(f, "duration_sec={:.3}", d)?,
            None => writeln!(f, "duration_sec=N/A")?,
        }
        writeln!(f, "nb_streams={}", self.streams.len())?;
        writeln!(f, "[/FORMAT]")?;
        for s in &self.streams {
            writeln!(f, "[STREAM]")?;
            writeln!(f, "index={}", s.index)?;
            writeln!(f, "codec_type={}", s.codec_type)?;
            writeln!(f, "codec_name={}", s.codec_name)?;
            writeln!(f, "time_base={}", s.time_base)?;
            if let (Some(w), Some(h)) = (s.width, s.height) {
                writeln!(f, "width={}", w)?;
                writeln!(f, "height={}", h)?;
            }
            if let Some(sr) = s.sample_rate {
                writeln!(f, "sample_rate={}", sr)?;
            }
            if let Some(c) = s.channels {
                writeln!(f, "channels={}", c)?;
            }
            if let Some(n) = s.packets {
                writeln!(f, "nb_read_packets={}", n)?;
            }
            writeln!(f, "[/STREAM]")?;
        }
        Ok(())
    }
}

/// Opens `address` and describes its streams. With `count_packets` the
/// whole input is read, which only makes sense for files.
pub fn probe(address: &str, options: &InputOptions, count_packets: bool) -> Result<MediaInfo> {
    let mut input = AvInput::new(address, options)?;
    let format_name = input.format_name().to_string();
    let duration_sec = input.duration_sec();

    let mut streams: Vec<StreamInfo> = input
        .probe_streams()?
        .into_iter()
        .map(|stream| {
            let params = stream.parameters();
            let medium = params.medium();
            let (width, height, sample_rate, channels) = match medium {
                ffmpeg_next::media::Type::Video => {
                    let (w, h) = video_size_from_parameters(params);
                    (Some(w), Some(h), None, None)
                }
                ffmpeg_next::media::Type::Audio => {
                    let (sr, ch) = audio_params_from_parameters(params);
                    (None, None, Some(sr), Some(ch))
                }
                _ => (None, None, None, None),
            };
            StreamInfo {
                index: stream.index(),
                codec_type: format!("{:?}", medium).to_lowercase(),
                codec_name: format!("{:?}", params.id()).to_lowercase(),
                time_base: stream.time_base(),
                width,
                height,
                sample_rate,
                channels,
                packets: None,
            }
        })
        .collect();

    if count_packets {
        let mut counts = vec![0u64; streams.len()];
        loop {
            match input.read_packet()? {
                ReadOutcome::Packet(packet) => {
                    if let Some(count) = counts.get_mut(packet.stream_index()) {
                        *count += 1;
                    }
                }
                ReadOutcome::Again => std::thread::sleep(READ_RETRY_INTERVAL),
                ReadOutcome::End => break,
            }
        }
        for (stream, count) in streams.iter_mut().zip(counts) {
            stream.packets = Some(count);
        }
    }

    Ok(MediaInfo {
        address: address.to_string(),
        format_name,
        duration_sec,
        streams,
    })
}

/// Reads video width/height from codec parameters (not exposed by ffmpeg-next).
fn video_size_from_parameters(params: &ffmpeg_next::codec::Parameters) -> (u32, u32) {
    unsafe {
        let ptr = params.as_ptr();
        ((*ptr).width.max(0) as u32, (*ptr).height.max(0) as u32)
    }
}

fn audio_params_from_parameters(params: &ffmpeg_next::codec::Parameters) -> (u32, u32) {
    unsafe {
        let ptr = params.as_ptr();
        let sr = (*ptr).sample_rate;
        let ch = (*ptr).ch_layout.nb_channels;
        (sr.max(0) as u32, ch.max(0) as u32)
    }
}
