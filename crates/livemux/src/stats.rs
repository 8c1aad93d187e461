//! # Session Statistics

use serde::Serialize;

/// Counters for one mux session, snapshotted under the session lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MuxStats {
    /// Video packets written (excludes the sequence header).
    pub video_packets: u64,
    /// Audio packets written (excludes the sequence header).
    pub audio_packets: u64,
    /// Sum of sample counts reported with written audio frames.
    pub audio_samples: u64,
    /// Container bytes handed to the sink, header and trailer included.
    pub bytes_written: u64,
    /// Video frames discarded while waiting for SPS+PPS+IDR.
    pub frames_dropped_before_header: u64,
    /// Timestamp of the last video packet, in ms.
    pub last_video_ms: u64,
    /// Timestamp of the last audio packet, in ms.
    pub last_audio_ms: u64,
}

impl MuxStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audio/video drift: last audio time minus last video time, in ms.
    pub fn av_skew_ms(&self) -> i64 {
        self.last_audio_ms as i64 - self.last_video_ms as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skew_sign() {
        let s = MuxStats {
            last_video_ms: 100,
            last_audio_ms: 80,
            ..MuxStats::default()
        };
        assert_eq!(s.av_skew_ms(), -20);
    }

    #[test]
    fn serializes_to_json() {
        let s = MuxStats {
            video_packets: 3,
            ..MuxStats::new()
        };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["video_packets"], 3);
        assert_eq!(json["frames_dropped_before_header"], 0);
    }
}
