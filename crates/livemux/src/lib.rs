//! # livemux
//!
//! Live H.264/AAC multiplexer for streaming ingest.
//!
//! Accepts Annex-B video access units and AAC frames from independent
//! capture threads, recovers the codec parameter sets from the byte stream,
//! opens the FLV container once a decodable keyframe is available, and
//! writes every packet against one monotonic clock shared by both media.
//!
//! ## Crate structure
//!
//! - [`media`] — Annex-B NAL unit scanning and SPS/PPS extraction
//! - [`clock`] — Shared relative clock and video monotonicity rule
//! - [`flv`] — FLV header, sequence headers, media tags and trailer
//! - [`sink`] — Destinations and byte transports (TCP, ffmpeg relay)
//! - [`session`] — Mux session state machine and fatal latch
//! - [`ingress`] — Thread-safe frame delivery handles for capture callbacks
//! - [`stats`] — Session counters snapshot

pub mod clock;
pub mod error;
pub mod flv;
pub mod ingress;
pub mod media;
pub mod session;
pub mod sink;
pub mod stats;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_util;

pub use error::MuxError;
pub use ingress::FrameIngress;
pub use session::{MuxSession, MuxState, PushOutcome, SessionContext};
pub use sink::Destination;
pub use stats::MuxStats;

/// Install the process-wide tracing subscriber.
///
/// Log level is controlled by `RUST_LOG` (default `info`). Calling this
/// more than once is harmless; later calls are ignored.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .try_init();
}
