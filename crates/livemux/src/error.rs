use thiserror::Error;

use crate::session::MuxState;
use crate::sink::DestinationError;

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("invalid destination: {0}")]
    Destination(#[from] DestinationError),
    #[error("invalid video dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("unsupported AAC sample rate {0} Hz")]
    UnsupportedSampleRate(u32),
    #[error("unsupported channel count {0}")]
    UnsupportedChannels(u8),
    #[error("session already started (state {0:?})")]
    AlreadyStarted(MuxState),
    #[error("session was stopped; create a new session to stream again")]
    Terminated,
}
