//! asr-session-host - Standalone harness for `asr-session-core`.
//!
//! Drives a session end to end against a PCM file: opens the connection,
//! feeds the file in fixed-size frames, finalizes, and closes. Concrete
//! vendor wire protocols are out of scope for `asr-session-core`, so this
//! harness drives the session against the crate's scripted test double
//! rather than a real network vendor.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use asr_session_core::vendor::scripted::{Script, ScriptedFactory};
use asr_session_core::{AsrErrorEvent, AsrFinalizeEndEvent, AsrResultEvent, EventSink, Session};
use bytes::Bytes;
use clap::Parser;

use crate::config::HostConfig;

/// Drives an `asr-session-core` session end to end from a PCM file.
#[derive(Parser, Debug)]
#[command(name = "asr-session-host")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "ASR_SESSION_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Path to a raw PCM file to stream through the session.
    #[arg(value_name = "PCM_FILE")]
    pcm_file: PathBuf,

    /// Milliseconds of audio per frame handed to the session at a time.
    #[arg(long, default_value_t = 20)]
    frame_ms: u32,

    /// Identifier attached to the `asr_finalize_end` emission.
    #[arg(long, default_value = "host-finalize")]
    finalize_id: String,
}

/// Prints every session emission as a JSON line on stdout, standing in for
/// whatever message bus a real host extension runtime would use.
struct PrintEventSink;

impl EventSink for PrintEventSink {
    fn emit_result(&self, event: AsrResultEvent) {
        println!("{}", json_line("asr_result", &event));
    }

    fn emit_error(&self, event: AsrErrorEvent) {
        println!("{}", json_line("asr_error", &event));
    }

    fn emit_finalize_end(&self, event: AsrFinalizeEndEvent) {
        println!("{}", json_line("asr_finalize_end", &event));
    }

    fn emit_metrics(&self, metrics: serde_json::Map<String, serde_json::Value>) {
        println!("{}", json_line("asr_metrics", &metrics));
    }
}

fn json_line<T: serde::Serialize>(kind: &str, payload: &T) -> String {
    serde_json::json!({ "type": kind, "payload": payload }).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("asr-session-host v{}", env!("CARGO_PKG_VERSION"));

    let config = HostConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    let pcm = tokio::fs::read(&args.pcm_file)
        .await
        .with_context(|| format!("failed to read PCM file: {}", args.pcm_file.display()))?;
    log::info!("loaded {} bytes from {}", pcm.len(), args.pcm_file.display());

    let duration_ms = config.session.duration_ms_for_bytes(pcm.len()) as i64;
    // The final transcript is delivered in response to `finalize()`, as a
    // real vendor would after its own drain, rather than up front.
    let script = Script::with_final_result(
        "(scripted transcript: no real vendor wired up)",
        0,
        duration_ms,
    );
    let factory = Arc::new(ScriptedFactory::new(Script {
        on_finalize: script.on_connect,
        ..Script::default()
    }));
    let sink = Arc::new(PrintEventSink);

    let mut session = Session::new(config.session.clone(), factory, sink);
    session.start().await.context("failed to open vendor connection")?;
    log::info!("session connected, state={:?}", session.state());

    let frame_bytes = config
        .session
        .bytes_per_ms()
        .mul_add(f64::from(args.frame_ms), 0.0)
        .round()
        .max(1.0) as usize;
    for frame in pcm.chunks(frame_bytes) {
        session
            .on_audio_frame(Bytes::copy_from_slice(frame))
            .await
            .context("failed to feed audio frame")?;
    }

    session
        .finalize(args.finalize_id)
        .await
        .context("failed to finalize session")?;
    session.stop().await.context("failed to stop session")?;

    log::info!("session closed, state={:?}", session.state());
    Ok(())
}
