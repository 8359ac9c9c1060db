use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use super::FfmpegBackend;
use crate::{
    error::RelayError,
    media::InputOptions,
    metadata::probe,
    session::{RelayConfig, RelaySession, SessionState, StreamEnd},
};

/// scripts/test.mp4 under the workspace root, independent of the cwd.
fn test_mp4_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .join("scripts")
        .join("test.mp4")
}

fn wait_terminal(session: &RelaySession<FfmpegBackend>) -> SessionState {
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let state = session.state();
        if state.is_terminal() || Instant::now() > deadline {
            return state;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Requires scripts/test.mp4.
#[test]
fn test_remux_file_to_mkv() -> anyhow::Result<()> {
    let input_path = test_mp4_path();
    if !input_path.exists() {
        eprintln!("skip: {} not found", input_path.display());
        return Ok(());
    }
    crate::init()?;

    let dir = tempfile::tempdir()?;
    let output_path = dir.path().join("remux.mkv");
    let input = input_path.to_string_lossy().into_owned();
    let output = output_path.to_string_lossy().into_owned();

    let session = RelaySession::new(
        FfmpegBackend::new(),
        RelayConfig::builder().input(&input).add_output(&output).build(),
    );
    session.start()?;
    assert_eq!(wait_terminal(&session), SessionState::Closed);
    let report = session.stop().unwrap()?;
    assert_eq!(report.end, StreamEnd::EndOfInput);
    assert_eq!(report.packets_dropped, 0);

    let source = probe(&input, &InputOptions::default(), true)?;
    let remuxed = probe(&output, &InputOptions::default(), true)?;
    println!("{}", remuxed);
    assert_eq!(remuxed.streams.len(), source.streams.len());
    for (a, b) in source.streams.iter().zip(&remuxed.streams) {
        assert_eq!(a.codec_name, b.codec_name);
    }
    assert_eq!(remuxed.total_packets(), Some(report.outputs[0].packets_written));
    assert_eq!(source.total_packets(), Some(report.packets_read));
    Ok(())
}

/// Requires scripts/test.mp4.
#[test]
fn test_cancelled_recording_is_playable() -> anyhow::Result<()> {
    let input_path = test_mp4_path();
    if !input_path.exists() {
        eprintln!("skip: {} not found", input_path.display());
        return Ok(());
    }
    crate::init()?;

    let dir = tempfile::tempdir()?;
    let output_path = dir.path().join("cancelled.mp4");
    let output = output_path.to_string_lossy().into_owned();

    let session = RelaySession::new(
        FfmpegBackend::new(),
        RelayConfig::builder()
            .input(&input_path.to_string_lossy())
            .add_output(&output)
            .build(),
    );
    session.start()?;
    let report = session.stop().unwrap()?;

    // the moov atom is written by the trailer; without it probing fails
    let remuxed = probe(&output, &InputOptions::default(), true)?;
    assert_eq!(remuxed.total_packets(), Some(report.outputs[0].packets_written));
    Ok(())
}

#[test]
fn test_unreachable_source() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let output_path = dir.path().join("never.mkv");

    let session = RelaySession::new(
        FfmpegBackend::new(),
        RelayConfig::builder()
            .input("rtsp://127.0.0.1:1/unreachable")
            .input_options(InputOptions {
                timeout: Duration::from_secs(1),
                ..Default::default()
            })
            .add_output(&output_path.to_string_lossy())
            .build(),
    );
    session.start()?;
    assert_eq!(wait_terminal(&session), SessionState::Error);

    let err = session.stop().unwrap().unwrap_err();
    assert!(matches!(err, RelayError::Open { .. }));
    assert!(!output_path.exists());
    Ok(())
}
