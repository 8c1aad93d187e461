//! Helpers shared by unit tests, integration tests and benches: an
//! in-memory sink with failure injection, synthetic H.264/AAC frames, and a
//! minimal FLV tag reader.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::sink::{Destination, OutputSink, SinkConnector};

// ─── Memory Sink ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Shared {
    bytes: Vec<u8>,
    writes: usize,
    connects: usize,
    closes: usize,
}

/// Connector whose sinks append into one shared buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    shared: Arc<Mutex<Shared>>,
    fail_connect: bool,
    fail_after_writes: Option<usize>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `connect()` fails with `ConnectionRefused`.
    pub fn fail_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Writes succeed `n` times, then fail with `BrokenPipe`. The header
    /// counts as one write.
    pub fn fail_after_writes(mut self, n: usize) -> Self {
        self.fail_after_writes = Some(n);
        self
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Everything written so far.
    pub fn bytes(&self) -> Vec<u8> {
        self.shared().bytes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.shared().writes
    }

    pub fn connect_count(&self) -> usize {
        self.shared().connects
    }

    pub fn close_count(&self) -> usize {
        self.shared().closes
    }

    /// Tags written so far.
    pub fn tags(&self) -> Vec<FlvTag> {
        parse_flv(&self.bytes())
    }
}

impl SinkConnector for MemoryConnector {
    fn connect(&self, _destination: &Destination) -> io::Result<Box<dyn OutputSink>> {
        self.shared().connects += 1;
        if self.fail_connect {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "memory connector: connect refused",
            ));
        }
        Ok(Box::new(MemorySink {
            shared: Arc::clone(&self.shared),
            fail_after_writes: self.fail_after_writes,
        }))
    }
}

struct MemorySink {
    shared: Arc<Mutex<Shared>>,
    fail_after_writes: Option<usize>,
}

impl OutputSink for MemorySink {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        if self.fail_after_writes.is_some_and(|n| shared.writes >= n) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory sink: broken pipe"));
        }
        shared.writes += 1;
        shared.bytes.extend_from_slice(data);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner()).closes += 1;
        Ok(())
    }
}

/// Connector whose sinks discard everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullConnector;

impl SinkConnector for NullConnector {
    fn connect(&self, _destination: &Destination) -> io::Result<Box<dyn OutputSink>> {
        Ok(Box::new(NullSink))
    }
}

struct NullSink;

impl OutputSink for NullSink {
    fn write_all(&mut self, _data: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ─── Frames ─────────────────────────────────────────────────────────────────

/// Baseline profile, level 3.0 SPS with a 4-byte start code.
pub fn sps() -> Vec<u8> {
    vec![0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x02, 0x80, 0xF6, 0x40]
}

pub fn pps() -> Vec<u8> {
    vec![0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80]
}

pub fn idr_slice() -> Vec<u8> {
    vec![0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x00, 0x33, 0xFF]
}

pub fn non_idr_slice() -> Vec<u8> {
    vec![0x00, 0x00, 0x01, 0x41, 0x9A, 0x02, 0x04, 0x5C]
}

/// SPS + PPS + IDR: opens the container header.
pub fn keyframe() -> Vec<u8> {
    [sps(), pps(), idr_slice()].concat()
}

/// SPS + PPS without an IDR slice.
pub fn parameter_sets_only() -> Vec<u8> {
    [sps(), pps()].concat()
}

/// A single non-IDR slice.
pub fn delta_frame() -> Vec<u8> {
    non_idr_slice()
}

/// ADTS-framed AAC-LC frame (44.1 kHz, mono, no CRC) with `payload_len`
/// bytes of raw data.
pub fn adts_frame(payload_len: usize) -> Vec<u8> {
    let frame_len = 7 + payload_len;
    let mut out = Vec::with_capacity(frame_len);
    out.push(0xFF);
    out.push(0xF1);
    out.push((1 << 6) | (4 << 2)); // AAC-LC, 44100 Hz, channel config high bit 0
    out.push((1 << 6) | ((frame_len >> 11) & 0x03) as u8);
    out.push(((frame_len >> 3) & 0xFF) as u8);
    out.push((((frame_len & 0x07) as u8) << 5) | 0x1F);
    out.push(0xFC);
    out.resize(frame_len, 0x21);
    out
}

// ─── FLV Reader ─────────────────────────────────────────────────────────────

/// One tag read back from an FLV byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlvTag {
    pub tag_type: u8,
    pub timestamp: u32,
    pub body: Vec<u8>,
}

impl FlvTag {
    pub fn is_video(&self) -> bool {
        self.tag_type == crate::flv::TAG_VIDEO
    }

    pub fn is_audio(&self) -> bool {
        self.tag_type == crate::flv::TAG_AUDIO
    }

    /// Video keyframe flag (frame type 1).
    pub fn is_key_frame(&self) -> bool {
        self.is_video() && self.body.first().is_some_and(|b| b >> 4 == 1)
    }

    /// AVC/AAC packet type: 0 = sequence header, 1 = data, 2 = end of
    /// sequence (video only).
    pub fn packet_type(&self) -> Option<u8> {
        self.body.get(1).copied()
    }

    /// Media payload tag (not a sequence header or end marker).
    pub fn is_media(&self) -> bool {
        (self.is_video() || self.is_audio()) && self.packet_type() == Some(1)
    }
}

/// Read every complete tag after the 13-byte file header. Stops at the
/// first truncated tag.
pub fn parse_flv(data: &[u8]) -> Vec<FlvTag> {
    let mut tags = Vec::new();
    let mut pos = crate::flv::FLV_HEADER_LEN;
    while pos + crate::flv::TAG_HEADER_LEN <= data.len() {
        let h = &data[pos..pos + crate::flv::TAG_HEADER_LEN];
        let size = u32::from_be_bytes([0, h[1], h[2], h[3]]) as usize;
        let timestamp = u32::from_be_bytes([h[7], h[4], h[5], h[6]]);
        let body_start = pos + crate::flv::TAG_HEADER_LEN;
        let Some(body) = data.get(body_start..body_start + size) else {
            break;
        };
        tags.push(FlvTag {
            tag_type: h[0],
            timestamp,
            body: body.to_vec(),
        });
        pos = body_start + size + 4;
    }
    tags
}
