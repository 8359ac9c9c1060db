use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use ffmpeg_relay::{
    RelayError, RelayReport, RelaySession, ffmpeg::FfmpegBackend, metadata, session::RelayOutcome,
};
use tokio_util::sync::CancellationToken;

mod config;

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_relay", log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let args = config::Args::parse();

    if let Err(e) = ffmpeg_relay::init() {
        log::error!("{:#}", e);
        return ExitCode::from(1);
    }

    if args.probe {
        return match metadata::probe(&args.input, &args.input_options(), false) {
            Ok(info) => {
                print!("{}", info);
                ExitCode::SUCCESS
            }
            Err(e) => {
                log::error!("{}", e);
                ExitCode::from(1)
            }
        };
    }

    let json = args.json;
    let session = Arc::new(RelaySession::new(
        FfmpegBackend::new(),
        args.into_relay_config(),
    ));

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("interrupted, shutting down");
                cancel_clone.cancel();
            }
            Err(e) => log::warn!("cannot listen for ctrl-c: {}", e),
        }
    });

    match run(session, cancel).await {
        Ok(outcome) => exit_code(outcome, json),
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(
    session: Arc<RelaySession<FfmpegBackend>>,
    cancel: CancellationToken,
) -> anyhow::Result<Option<RelayOutcome>> {
    let mut state = session.subscribe();
    session.start()?;

    tokio::select! {
        _ = cancel.cancelled() => {},
        res = state.wait_for(|s| s.is_terminal()) => {
            res?;
        },
    }

    // stop() joins the worker thread
    Ok(tokio::task::spawn_blocking(move || session.stop()).await?)
}

fn exit_code(outcome: Option<RelayOutcome>, json: bool) -> ExitCode {
    match outcome {
        Some(Ok(report)) => {
            log_report(&report);
            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(s) => println!("{}", s),
                    Err(e) => log::error!("cannot serialize report: {}", e),
                }
            }
            ExitCode::SUCCESS
        }
        Some(Err(e)) => failure_code(&e),
        None => ExitCode::SUCCESS,
    }
}

fn failure_code(e: &RelayError) -> ExitCode {
    if e.is_setup() {
        ExitCode::from(1)
    } else {
        ExitCode::from(2)
    }
}

fn log_report(report: &RelayReport) {
    log::info!(
        "{} ended ({:?}): {} packets read, {} dropped",
        report.input,
        report.end,
        report.packets_read,
        report.packets_dropped
    );
    for output in &report.outputs {
        log::info!(
            "  {}: {} packets, {} bytes",
            output.address,
            output.packets_written,
            output.bytes_written
        );
    }
}
