use std::time::Duration;

use clap::Parser;
use ffmpeg_relay::{
    RelayConfig,
    media::{InputOptions, OutputOptions, Transport},
    session::OutputTarget,
};

/// Copies the streams of one live source into one or more outputs without
/// re-encoding.
#[derive(Parser, Debug)]
#[command(name = "lite-relay", version)]
pub struct Args {
    /// Source address: RTSP/RTMP/HTTP URL or a file path.
    pub input: String,

    /// Re-publish URLs and/or local file paths.
    #[arg(required = true, num_args = 1..)]
    pub outputs: Vec<String>,

    /// Muxer for every output (e.g. "flv", "mpegts", "matroska").
    #[arg(short, long)]
    pub format: Option<String>,

    /// RTSP delivery for the source.
    #[arg(long, default_value = "tcp")]
    pub transport: Transport,

    /// Socket I/O timeout.
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,

    #[arg(long, default_value_t = 1_024_000)]
    pub buffer_size: usize,

    /// Maximum demuxer reordering delay.
    #[arg(long, default_value_t = 500)]
    pub max_delay_ms: u64,

    /// RTSP delivery when re-publishing.
    #[arg(long, default_value = "tcp")]
    pub output_transport: Transport,

    /// Print the session report as JSON when done.
    #[arg(long)]
    pub json: bool,

    /// Print the input's stream layout and exit.
    #[arg(long)]
    pub probe: bool,
}

impl Args {
    pub fn input_options(&self) -> InputOptions {
        InputOptions {
            transport: self.transport,
            timeout: Duration::from_millis(self.timeout_ms),
            buffer_size: self.buffer_size,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    pub fn into_relay_config(self) -> RelayConfig {
        let mut builder = RelayConfig::builder()
            .input(&self.input)
            .input_options(self.input_options())
            .output_options(OutputOptions {
                transport: self.output_transport,
                timeout: Duration::from_millis(self.timeout_ms),
            });
        for address in &self.outputs {
            let mut target = OutputTarget::new(address);
            target.format = self.format.clone().or_else(|| guess_format(address));
            builder = builder.add_target(target);
        }
        builder.build()
    }
}

/// Muxer implied by a URL scheme. File paths are left to the container
/// library, which guesses from the extension.
pub fn guess_format(address: &str) -> Option<String> {
    let (scheme, _) = address.split_once("://")?;
    let format = match scheme.to_ascii_lowercase().as_str() {
        "rtsp" | "rtsps" => "rtsp",
        "rtmp" | "rtmps" => "flv",
        "srt" | "udp" => "mpegts",
        _ => return None,
    };
    Some(format.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("lite-relay").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_guess_format() {
        assert_eq!(guess_format("rtsp://cam/live").as_deref(), Some("rtsp"));
        assert_eq!(guess_format("RTMP://host/app/key").as_deref(), Some("flv"));
        assert_eq!(guess_format("rtmps://host/app/key").as_deref(), Some("flv"));
        assert_eq!(guess_format("srt://host:9000").as_deref(), Some("mpegts"));
        assert_eq!(guess_format("udp://239.0.0.1:1234").as_deref(), Some("mpegts"));
        assert_eq!(guess_format("/tmp/out.mp4"), None);
        assert_eq!(guess_format("http://host/out.flv"), None);
    }

    #[test]
    fn test_requires_output() {
        let res = Args::try_parse_from(["lite-relay", "rtsp://cam/live"]);
        assert!(res.is_err());
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["rtsp://cam/live", "out.mkv"]);
        assert_eq!(args.input_options(), InputOptions::default());
        assert!(!args.json);

        let config = args.into_relay_config();
        assert_eq!(config.input, "rtsp://cam/live");
        assert_eq!(config.outputs, vec![OutputTarget::new("out.mkv")]);
        assert_eq!(config.output_options, OutputOptions::default());
    }

    #[test]
    fn test_fan_out_formats() {
        let config = parse(&[
            "--transport",
            "udp",
            "--timeout-ms",
            "2000",
            "rtsp://cam/live",
            "rtmp://host/app/key",
            "out.mp4",
        ])
        .into_relay_config();

        assert_eq!(config.input_options.transport, Transport::Udp);
        assert_eq!(config.input_options.timeout, Duration::from_secs(2));
        assert_eq!(config.output_options.timeout, Duration::from_secs(2));
        assert_eq!(
            config.outputs,
            vec![
                OutputTarget::new("rtmp://host/app/key").with_format("flv"),
                OutputTarget::new("out.mp4"),
            ]
        );
    }

    #[test]
    fn test_explicit_format_wins() {
        let config = parse(&["-f", "mpegts", "in.mp4", "rtsp://host/live", "out.ts"])
            .into_relay_config();
        assert!(
            config
                .outputs
                .iter()
                .all(|t| t.format.as_deref() == Some("mpegts"))
        );
    }

    #[test]
    fn test_bad_transport() {
        let res = Args::try_parse_from(["lite-relay", "--transport", "quic", "in", "out"]);
        assert!(res.is_err());
    }
}
