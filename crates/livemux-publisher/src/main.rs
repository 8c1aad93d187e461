//! # livemux publisher
//!
//! Captures (or synthesizes) H.264 video and AAC audio and publishes them
//! live as FLV through a `livemux` session.
//!
//! ## Usage
//!
//! ```bash
//! # Synthetic source straight to an RTMP server (via ffmpeg)
//! livemux-publisher --destination rtmp://live.example.com/app/KEY
//!
//! # Raw FLV over TCP, settings from a file
//! livemux-publisher --config publisher.toml --destination tcp://127.0.0.1:9000
//!
//! # GStreamer test pipelines (build with --features gst)
//! livemux-publisher --source gst --destination rtmp://localhost/live/test
//! ```
//!
//! While running, type `t` + Enter to toggle per-packet trace logs and
//! `q` + Enter to quit.

mod capture;
mod commands;
mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use livemux::sink::NetworkConnector;
use livemux::{FrameIngress, MuxSession, SessionContext};

use commands::Command;
use config::{PublisherConfig, PublisherConfigInput};

const WATCHDOG_TICK: Duration = Duration::from_millis(100);

/// Live H.264/AAC → FLV publisher.
#[derive(Parser, Debug)]
#[command(name = "livemux-publisher", version, about = "Live H.264/AAC FLV publisher")]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output: tcp://host:port or rtmp(s)://host/app/key.
    #[arg(long)]
    destination: Option<String>,

    /// Video width in pixels.
    #[arg(long)]
    width: Option<u32>,

    /// Video height in pixels.
    #[arg(long)]
    height: Option<u32>,

    /// Video frame rate.
    #[arg(long)]
    fps: Option<u32>,

    /// Audio sample rate in Hz.
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Audio channel count.
    #[arg(long)]
    channels: Option<u8>,

    /// Capture source: "test" or "gst".
    #[arg(long)]
    source: Option<String>,

    /// Start with per-packet trace logging enabled.
    #[arg(long, default_value_t = false)]
    trace: bool,
}

impl Cli {
    /// File values first, then command-line overrides.
    fn resolve_config(&self) -> anyhow::Result<PublisherConfig> {
        let mut input = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                PublisherConfigInput::from_toml_str(&text).map_err(anyhow::Error::msg)?
            }
            None => PublisherConfigInput::default(),
        };

        if let Some(d) = &self.destination {
            input.destination = Some(d.clone());
        }
        input.video.width = self.width.or(input.video.width);
        input.video.height = self.height.or(input.video.height);
        input.video.fps = self.fps.or(input.video.fps);
        input.audio.sample_rate = self.sample_rate.or(input.audio.sample_rate);
        input.audio.channels = self.channels.or(input.audio.channels);
        if let Some(s) = &self.source {
            input.capture.source = Some(s.clone());
        }

        input.resolve().map_err(anyhow::Error::msg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitReason {
    Requested,
    OutputFailed,
}

fn main() -> anyhow::Result<()> {
    livemux::init();

    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        destination = %config.destination,
        width = config.video.width,
        height = config.video.height,
        fps = config.video.fps,
        sample_rate = config.audio.sample_rate,
        channels = config.audio.channels,
        source = ?config.capture.source,
        "livemux-publisher starting"
    );

    // ── Session ─────────────────────────────────────────────────
    let context = SessionContext::new();
    context.set_trace(cli.trace);

    let session = Arc::new(MuxSession::with_parts(
        config.destination.clone(),
        Arc::new(NetworkConnector::default()),
        quanta::Clock::new(),
        context.clone(),
    ));
    session
        .start(
            config.video.width,
            config.video.height,
            config.audio.sample_rate,
            config.audio.channels,
        )
        .context("failed to start mux session")?;

    // ── Capture ─────────────────────────────────────────────────
    let ingress = FrameIngress::new(Arc::clone(&session));
    let mut source = capture::build(&config)?;
    source
        .start(&ingress)
        .with_context(|| format!("failed to start '{}' capture", source.name()))?;

    // ── Commands & signals ──────────────────────────────────────
    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    commands::spawn_stdin_listener(cmd_tx.clone())?;
    ctrlc::set_handler(move || {
        tracing::info!("shutting down...");
        let _ = cmd_tx.send(Command::Quit);
    })?;

    let reason = run_watchdog(&session, &context, &cmd_rx, config.capture.stats_interval);

    // ── Teardown: capture first, then the session ───────────────
    source.stop();
    session.stop();

    let stats = session.stats();
    tracing::info!(
        stats = %serde_json::to_string(&stats)?,
        "livemux-publisher stopped"
    );

    if reason == ExitReason::OutputFailed {
        anyhow::bail!("output to {} failed", config.destination);
    }
    Ok(())
}

/// Poll commands and the fatal flag every [`WATCHDOG_TICK`] until exit is
/// requested or the output fails. Logs session stats periodically.
fn run_watchdog(
    session: &MuxSession,
    context: &SessionContext,
    commands: &Receiver<Command>,
    stats_interval: Duration,
) -> ExitReason {
    let mut last_stats_log = Instant::now();

    loop {
        match commands.recv_timeout(WATCHDOG_TICK) {
            Ok(Command::ToggleTrace) => {
                let enabled = context.toggle_trace();
                tracing::info!(enabled, "packet trace toggled");
            }
            Ok(Command::Quit) => {
                tracing::info!("quit requested");
                return ExitReason::Requested;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return ExitReason::Requested,
        }

        if session.is_fatal() {
            tracing::error!("output failed; shutting down");
            return ExitReason::OutputFailed;
        }

        if last_stats_log.elapsed() >= stats_interval {
            let stats = session.stats();
            tracing::info!(
                state = ?session.state(),
                video_packets = stats.video_packets,
                audio_packets = stats.audio_packets,
                bytes = stats.bytes_written,
                dropped = stats.frames_dropped_before_header,
                last_video_ms = stats.last_video_ms,
                av_skew_ms = stats.av_skew_ms(),
                "publisher stats"
            );
            last_stats_log = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livemux::test_util::{self, MemoryConnector};

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("livemux-publisher").chain(args.iter().copied()))
    }

    #[test]
    fn cli_overrides_defaults() {
        let cfg = cli(&["--destination", "tcp://127.0.0.1:9000", "--width", "1280", "--channels", "2"])
            .resolve_config()
            .unwrap();
        assert_eq!(cfg.destination, "tcp://127.0.0.1:9000");
        assert_eq!(cfg.video.width, 1280);
        assert_eq!(cfg.video.height, 480);
        assert_eq!(cfg.audio.channels, 2);
    }

    #[test]
    fn cli_requires_destination() {
        assert!(cli(&[]).resolve_config().is_err());
    }

    #[test]
    fn cli_overrides_config_file() {
        let path = std::env::temp_dir().join(format!("livemux-publisher-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "destination = \"rtmp://a/b/c\"\n[video]\nfps = 25\nwidth = 640\n",
        )
        .unwrap();
        let cfg = cli(&["--config", path.to_str().unwrap(), "--fps", "60"])
            .resolve_config()
            .unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(cfg.destination, "rtmp://a/b/c");
        assert_eq!(cfg.video.width, 640);
        assert_eq!(cfg.video.fps, 60);
    }

    fn test_session(conn: &MemoryConnector) -> MuxSession {
        let session = MuxSession::with_parts(
            "tcp://127.0.0.1:1935",
            Arc::new(conn.clone()),
            quanta::Clock::new(),
            SessionContext::new(),
        );
        session.start(720, 480, 44100, 1).unwrap();
        session
    }

    #[test]
    fn watchdog_handles_commands() {
        let conn = MemoryConnector::new();
        let session = test_session(&conn);
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(Command::ToggleTrace).unwrap();
        tx.send(Command::Quit).unwrap();

        let reason = run_watchdog(&session, session.context(), &rx, Duration::from_secs(60));
        assert_eq!(reason, ExitReason::Requested);
        assert!(session.context().trace_enabled());
    }

    #[test]
    fn watchdog_exits_on_fatal() {
        let conn = MemoryConnector::new().fail_after_writes(0);
        let session = test_session(&conn);
        session.push_video_frame(&test_util::keyframe());
        assert!(session.is_fatal());

        let (_tx, rx) = crossbeam_channel::unbounded();
        let reason = run_watchdog(&session, session.context(), &rx, Duration::from_secs(60));
        assert_eq!(reason, ExitReason::OutputFailed);
    }
}
