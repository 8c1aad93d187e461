//! # Output Sinks
//!
//! The byte transport boundary. The session hands finished FLV bytes to an
//! [`OutputSink`]; the sink owns the connection. Sinks are opened lazily by
//! a [`SinkConnector`] when the container header is ready, never at
//! `start()`.
//!
//! Supported destinations:
//!
//! - `tcp://host:port` — raw FLV over a TCP connection
//! - `rtmp://…` / `rtmps://…` — FLV piped into an `ffmpeg` child process
//!   that performs the RTMP publish

use std::io::{self, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::Duration;

use thiserror::Error;

// ─── Destination ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DestinationError {
    #[error("destination is empty")]
    Empty,
    #[error("unsupported scheme in '{0}' (expected tcp://, rtmp:// or rtmps://)")]
    UnsupportedScheme(String),
    #[error("invalid tcp address '{0}' (expected tcp://host:port)")]
    InvalidAddress(String),
}

/// Where the container bytes go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Raw FLV over TCP to `host:port`.
    Tcp { addr: String },
    /// RTMP publish URL, relayed through ffmpeg.
    Rtmp { url: String },
}

impl Destination {
    pub fn parse(input: &str) -> Result<Self, DestinationError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(DestinationError::Empty);
        }

        if let Some(rest) = input.strip_prefix("tcp://") {
            let addr = rest.trim_end_matches('/');
            let valid = addr
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
            if !valid {
                return Err(DestinationError::InvalidAddress(input.to_string()));
            }
            return Ok(Destination::Tcp {
                addr: addr.to_string(),
            });
        }

        let lower = input.to_ascii_lowercase();
        if lower.starts_with("rtmp://") || lower.starts_with("rtmps://") {
            let after_scheme = input.split_once("://").map_or("", |(_, rest)| rest);
            if after_scheme.is_empty() {
                return Err(DestinationError::InvalidAddress(input.to_string()));
            }
            return Ok(Destination::Rtmp {
                url: input.to_string(),
            });
        }

        Err(DestinationError::UnsupportedScheme(input.to_string()))
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Tcp { addr } => write!(f, "tcp://{addr}"),
            Destination::Rtmp { url } => f.write_str(url),
        }
    }
}

impl std::str::FromStr for Destination {
    type Err = DestinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Destination::parse(s)
    }
}

// ─── Traits ─────────────────────────────────────────────────────────────────

/// An open, ordered byte transport.
pub trait OutputSink: Send {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Release the connection. Called once, from `stop()`.
    fn close(&mut self) -> io::Result<()>;
}

/// Opens a sink for a destination.
pub trait SinkConnector: Send + Sync {
    fn connect(&self, destination: &Destination) -> io::Result<Box<dyn OutputSink>>;
}

// ─── Network Connector ──────────────────────────────────────────────────────

/// Default connector: TCP for `tcp://`, ffmpeg relay for `rtmp://`.
#[derive(Debug, Clone)]
pub struct NetworkConnector {
    pub connect_timeout: Duration,
    pub ffmpeg_path: String,
}

impl Default for NetworkConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            ffmpeg_path: "ffmpeg".into(),
        }
    }
}

impl SinkConnector for NetworkConnector {
    fn connect(&self, destination: &Destination) -> io::Result<Box<dyn OutputSink>> {
        match destination {
            Destination::Tcp { addr } => Ok(Box::new(TcpSink::connect(addr, self.connect_timeout)?)),
            Destination::Rtmp { url } => Ok(Box::new(FfmpegRelay::start(&self.ffmpeg_path, url)?)),
        }
    }
}

// ─── TCP ────────────────────────────────────────────────────────────────────

/// Writes FLV bytes straight onto a TCP connection.
pub struct TcpSink {
    stream: TcpStream,
}

impl TcpSink {
    pub fn connect(addr: &str, timeout: Duration) -> io::Result<Self> {
        let mut last_err = None;
        for candidate in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        tracing::warn!(?err, "failed to set TCP_NODELAY on output connection");
                    }
                    tracing::info!(peer = %candidate, "output: connected over tcp");
                    return Ok(TcpSink { stream });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no address resolved for {addr}"))
        }))
    }
}

impl OutputSink for TcpSink {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        self.stream.flush()?;
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

// ─── ffmpeg Relay ───────────────────────────────────────────────────────────

/// Pipes FLV into ffmpeg, which publishes it to an RTMP server unchanged.
pub struct FfmpegRelay {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl FfmpegRelay {
    pub fn start(ffmpeg: &str, url: &str) -> io::Result<Self> {
        tracing::info!(url, "output: starting ffmpeg RTMP relay");

        let mut child = Command::new(ffmpeg)
            .args([
                "-hide_banner",
                "-loglevel",
                "warning",
                // Input: FLV from stdin
                "-f",
                "flv",
                "-i",
                "pipe:0",
                // Copy — no re-encoding
                "-c",
                "copy",
                // Output: live FLV over RTMP
                "-f",
                "flv",
                "-rtmp_live",
                "live",
                url,
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                io::Error::new(e.kind(), format!("failed to start ffmpeg: {e} (is ffmpeg installed?)"))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "failed to open ffmpeg stdin"))?;

        Ok(FfmpegRelay {
            child,
            stdin: Some(stdin),
        })
    }
}

impl OutputSink for FfmpegRelay {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self.stdin {
            Some(ref mut stdin) => stdin.write_all(data),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "ffmpeg relay closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stdin {
            Some(ref mut stdin) => stdin.flush(),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        // Close stdin first to signal EOF, then wait for ffmpeg to exit
        if let Some(stdin) = self.stdin.take() {
            drop(stdin);
            let status = self.child.wait()?;
            tracing::info!(%status, "ffmpeg relay stopped");
        }
        Ok(())
    }
}

impl Drop for FfmpegRelay {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
