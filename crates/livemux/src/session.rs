//! # Mux Session
//!
//! Owns the container output for one live stream and serializes every
//! operation on it behind a single lock.
//!
//! ## State machine
//!
//! ```text
//!  Idle ──start()──► Configured ──push_video (no SPS+PPS+IDR)──► HeaderPending
//!                        │                                           │
//!                        └──────push_video (SPS+PPS+IDR)─────────────┤
//!                                                                    ▼
//!  Stopped ◄──────────────────────stop()───────────────────────── Streaming
//! ```
//!
//! A transport failure at any point after the header opens (connect,
//! header write, packet write) latches `fatal`: every later push is a no-op
//! until `stop()`. The latch never clears; a new session is required.
//!
//! The session spawns no threads. Capture threads call the push methods
//! directly and block only on the lock and the synchronous sink write.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use quanta::Clock;

use crate::clock::TimestampNormalizer;
use crate::error::MuxError;
use crate::flv::{
    strip_adts, AudioStream, FlvMuxer, OutputPacket, VideoStream, AUDIO_STREAM_INDEX,
    VIDEO_STREAM_INDEX,
};
use crate::media::nal::{NalKind, NalUnits};
use crate::media::params::{FrameScan, ParameterBlob};
use crate::sink::{Destination, NetworkConnector, OutputSink, SinkConnector};
use crate::stats::MuxStats;

// ─── Public Types ───────────────────────────────────────────────────────────

/// Lifecycle phase of a [`MuxSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxState {
    /// Created, `start()` not yet called.
    Idle,
    /// Streams described, no video frame seen yet.
    Configured,
    /// Video frames arriving, none yet carried SPS+PPS+IDR.
    HeaderPending,
    /// Header written; packets flowing (or fatal).
    Streaming,
    /// `stop()` ran. Terminal.
    Stopped,
}

/// Result of a push call. None of these are errors from the caller's
/// point of view; capture threads keep pushing regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// A packet was written to the sink.
    Written,
    /// The container header is not open yet; the frame was dropped.
    HeaderPending,
    /// The frame contained nothing to write.
    Empty,
    /// The session is not running (before `start()` or after `stop()`).
    Inactive,
    /// The fatal latch is set; nothing was written.
    Fatal,
}

/// Runtime switches shared between the driver and the session.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    trace: Arc<AtomicBool>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether per-packet trace logs are emitted at `info`.
    pub fn trace_enabled(&self) -> bool {
        self.trace.load(Ordering::Relaxed)
    }

    pub fn set_trace(&self, on: bool) {
        self.trace.store(on, Ordering::Relaxed);
    }

    /// Flip the trace switch and return the new value.
    pub fn toggle_trace(&self) -> bool {
        !self.trace.fetch_xor(true, Ordering::Relaxed)
    }
}

// ─── Session ────────────────────────────────────────────────────────────────

struct Inner {
    phase: MuxState,
    destination: Option<Destination>,
    muxer: Option<FlvMuxer>,
    sink: Option<Box<dyn OutputSink>>,
    clock: TimestampNormalizer,
    header_written: bool,
    fatal: bool,
    stats: MuxStats,
}

impl Inner {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "output not open"))?;
        sink.write_all(data)?;
        self.stats.bytes_written += data.len() as u64;
        Ok(())
    }
}

/// One live H.264 + AAC output.
pub struct MuxSession {
    destination: String,
    connector: Arc<dyn SinkConnector>,
    context: SessionContext,
    fatal: AtomicBool,
    inner: Mutex<Inner>,
}

impl MuxSession {
    /// Session writing to `destination` (`tcp://host:port` or `rtmp://…`).
    /// The destination is validated by [`start`](Self::start).
    pub fn new(destination: impl Into<String>) -> Self {
        Self::with_parts(
            destination,
            Arc::new(NetworkConnector::default()),
            Clock::new(),
            SessionContext::new(),
        )
    }

    /// Session with an injected connector, clock and context.
    pub fn with_parts(
        destination: impl Into<String>,
        connector: Arc<dyn SinkConnector>,
        clock: Clock,
        context: SessionContext,
    ) -> Self {
        MuxSession {
            destination: destination.into(),
            connector,
            context,
            fatal: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                phase: MuxState::Idle,
                destination: None,
                muxer: None,
                sink: None,
                clock: TimestampNormalizer::new(clock),
                header_written: false,
                fatal: false,
                stats: MuxStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Describe the video and audio streams. Does not connect.
    pub fn start(
        &self,
        width: u32,
        height: u32,
        sample_rate: u32,
        channels: u8,
    ) -> Result<(), MuxError> {
        let mut inner = self.lock();
        match inner.phase {
            MuxState::Idle => {}
            MuxState::Stopped => return Err(MuxError::Terminated),
            other => return Err(MuxError::AlreadyStarted(other)),
        }

        let destination = Destination::parse(&self.destination)?;
        let video = VideoStream::h264(width, height)?;
        let audio = AudioStream::aac(sample_rate, channels)?;

        inner.destination = Some(destination);
        inner.muxer = Some(FlvMuxer::new(video, audio));
        inner.phase = MuxState::Configured;

        tracing::info!(
            destination = %self.destination,
            width,
            height,
            sample_rate,
            channels,
            "mux session configured, waiting for keyframe"
        );
        Ok(())
    }

    /// Push one Annex-B access unit.
    pub fn push_video_frame(&self, frame: &[u8]) -> PushOutcome {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if let Some(outcome) = self.check_active(inner) {
            return outcome;
        }

        let key_frame = if inner.header_written {
            // Units that trim to nothing are not carried in the tag.
            let mut units = 0usize;
            let mut has_idr = false;
            for unit in NalUnits::new(frame).filter(|u| !u.payload(frame).is_empty()) {
                units += 1;
                has_idr |= unit.kind == NalKind::Idr;
            }
            if units == 0 {
                tracing::debug!(len = frame.len(), "video frame has no NAL data; skipped");
                return PushOutcome::Empty;
            }
            has_idr
        } else {
            let scan = FrameScan::scan(frame);
            let blob = match scan.parameter_blob(frame) {
                Some(blob) if scan.header_ready() => blob,
                _ => {
                    inner.stats.frames_dropped_before_header += 1;
                    inner.phase = MuxState::HeaderPending;
                    tracing::debug!(
                        len = frame.len(),
                        units = scan.unit_count,
                        has_sps = scan.sps.is_some(),
                        has_pps = scan.pps.is_some(),
                        has_idr = scan.has_idr,
                        "video frame dropped: header not ready"
                    );
                    return PushOutcome::HeaderPending;
                }
            };
            if let Err(err) = self.open_output(inner, blob) {
                self.latch_fatal(inner, "open output", &err);
                return PushOutcome::Fatal;
            }
            true
        };

        let ts = inner.clock.next_video_ms();
        let packet = OutputPacket {
            stream_index: VIDEO_STREAM_INDEX,
            payload: frame,
            pts: ts,
            dts: ts,
            key_frame,
        };
        let Some(muxer) = inner.muxer.as_mut() else {
            return PushOutcome::Inactive;
        };
        let bytes = muxer.write_packet(&packet);

        if let Err(err) = inner.write(&bytes) {
            self.latch_fatal(inner, "video write", &err);
            return PushOutcome::Fatal;
        }

        inner.stats.video_packets += 1;
        inner.stats.last_video_ms = ts;

        let n = inner.stats.video_packets;
        if self.context.trace_enabled() {
            tracing::info!(frame = n, pts = ts, dts = ts, key = key_frame, "[V TRACE]");
        } else {
            tracing::trace!(frame = n, pts = ts, dts = ts, key = key_frame, "video packet");
        }
        PushOutcome::Written
    }

    /// Push one AAC frame (raw or ADTS) carrying `sample_count` samples.
    pub fn push_audio_frame(&self, frame: &[u8], sample_count: u32) -> PushOutcome {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if let Some(outcome) = self.check_active(inner) {
            return outcome;
        }
        if !inner.header_written {
            return PushOutcome::HeaderPending;
        }
        if strip_adts(frame).is_empty() {
            tracing::debug!(len = frame.len(), "audio frame has no AAC payload; skipped");
            return PushOutcome::Empty;
        }

        let ts = inner.clock.next_audio_ms();
        let packet = OutputPacket {
            stream_index: AUDIO_STREAM_INDEX,
            payload: frame,
            pts: ts,
            dts: ts,
            key_frame: false,
        };
        let Some(muxer) = inner.muxer.as_mut() else {
            return PushOutcome::Inactive;
        };
        let bytes = muxer.write_packet(&packet);

        if let Err(err) = inner.write(&bytes) {
            self.latch_fatal(inner, "audio write", &err);
            return PushOutcome::Fatal;
        }

        inner.stats.audio_packets += 1;
        inner.stats.audio_samples += u64::from(sample_count);
        inner.stats.last_audio_ms = ts;

        if self.context.trace_enabled() {
            tracing::info!(pts = ts, dts = ts, samples = sample_count, "[A TRACE]");
        } else {
            tracing::trace!(pts = ts, dts = ts, samples = sample_count, "audio packet");
        }
        PushOutcome::Written
    }

    /// Finish the stream: trailer (if the header went out and the output is
    /// healthy), close the sink, release the container. Safe to call any
    /// number of times, and before `start()`.
    pub fn stop(&self) {
        let mut guard = self.lock();
        let inner = &mut *guard;

        match inner.phase {
            MuxState::Idle | MuxState::Stopped => return,
            _ => {}
        }

        if inner.header_written && !inner.fatal {
            if let Some(trailer) = inner.muxer.as_ref().map(FlvMuxer::write_trailer) {
                if let Err(err) = inner.write(&trailer) {
                    tracing::warn!(%err, "failed to write container trailer");
                }
            }
        }

        if let Some(mut sink) = inner.sink.take() {
            if let Err(err) = sink.flush().and_then(|()| sink.close()) {
                tracing::warn!(%err, "error closing output");
            }
        }

        inner.muxer = None;
        inner.header_written = false;
        inner.clock.clear();
        inner.phase = MuxState::Stopped;

        tracing::info!(
            video_packets = inner.stats.video_packets,
            audio_packets = inner.stats.audio_packets,
            bytes = inner.stats.bytes_written,
            dropped = inner.stats.frames_dropped_before_header,
            fatal = inner.fatal,
            "mux session stopped"
        );
    }

    pub fn state(&self) -> MuxState {
        self.lock().phase
    }

    /// Lock-free view of the fatal latch.
    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }

    pub fn is_header_written(&self) -> bool {
        self.lock().header_written
    }

    pub fn stats(&self) -> MuxStats {
        self.lock().stats.clone()
    }

    // ─── Internals ──────────────────────────────────────────────────────────

    fn check_active(&self, inner: &Inner) -> Option<PushOutcome> {
        match inner.phase {
            MuxState::Idle | MuxState::Stopped => Some(PushOutcome::Inactive),
            _ if inner.fatal => Some(PushOutcome::Fatal),
            _ => None,
        }
    }

    fn open_output(&self, inner: &mut Inner, blob: ParameterBlob) -> io::Result<()> {
        let destination = inner
            .destination
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no destination"))?;
        let muxer = inner
            .muxer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no container"))?;

        let param_bytes = blob.len();
        let header = muxer.write_header(blob);

        inner.sink = Some(self.connector.connect(&destination)?);
        inner.write(&header)?;
        inner.sink.as_mut().map_or(Ok(()), |sink| sink.flush())?;

        inner.header_written = true;
        inner.clock.reset_zero();
        inner.phase = MuxState::Streaming;

        tracing::info!(
            %destination,
            param_bytes,
            header_bytes = header.len(),
            dropped = inner.stats.frames_dropped_before_header,
            "container header written, streaming"
        );
        Ok(())
    }

    fn latch_fatal(&self, inner: &mut Inner, stage: &str, err: &io::Error) {
        if !inner.fatal {
            tracing::error!(stage, %err, "output failed; session is now fatal");
        }
        inner.fatal = true;
        self.fatal.store(true, Ordering::Release);
    }
}

impl Drop for MuxSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{self, MemoryConnector};

    fn session(connector: &MemoryConnector) -> MuxSession {
        let (clock, _mock) = Clock::mock();
        MuxSession::with_parts(
            "tcp://127.0.0.1:1935",
            Arc::new(connector.clone()),
            clock,
            SessionContext::new(),
        )
    }

    #[test]
    fn start_validates_destination() {
        let s = MuxSession::new("udp://nowhere");
        assert!(matches!(
            s.start(720, 480, 44100, 1),
            Err(MuxError::Destination(_))
        ));
        assert_eq!(s.state(), MuxState::Idle);
    }

    #[test]
    fn start_validates_formats() {
        let conn = MemoryConnector::new();
        let s = session(&conn);
        assert!(matches!(
            s.start(0, 480, 44100, 1),
            Err(MuxError::InvalidDimensions { .. })
        ));
        assert!(matches!(
            s.start(720, 480, 12345, 1),
            Err(MuxError::UnsupportedSampleRate(12345))
        ));
        assert!(matches!(
            s.start(720, 480, 44100, 0),
            Err(MuxError::UnsupportedChannels(0))
        ));
        assert_eq!(s.state(), MuxState::Idle);
        s.start(720, 480, 44100, 1).unwrap();
        assert_eq!(s.state(), MuxState::Configured);
    }

    #[test]
    fn start_twice_is_rejected() {
        let conn = MemoryConnector::new();
        let s = session(&conn);
        s.start(720, 480, 44100, 1).unwrap();
        assert!(matches!(
            s.start(720, 480, 44100, 1),
            Err(MuxError::AlreadyStarted(MuxState::Configured))
        ));
    }

    #[test]
    fn start_does_not_connect() {
        let conn = MemoryConnector::new();
        let s = session(&conn);
        s.start(720, 480, 44100, 1).unwrap();
        assert_eq!(conn.connect_count(), 0);
        assert!(conn.bytes().is_empty());
    }

    #[test]
    fn push_before_start_is_inactive() {
        let conn = MemoryConnector::new();
        let s = session(&conn);
        assert_eq!(
            s.push_video_frame(&test_util::keyframe()),
            PushOutcome::Inactive
        );
        assert_eq!(
            s.push_audio_frame(&test_util::adts_frame(8), 1024),
            PushOutcome::Inactive
        );
        assert_eq!(conn.connect_count(), 0);
    }

    #[test]
    fn header_opens_on_keyframe() {
        let conn = MemoryConnector::new();
        let s = session(&conn);
        s.start(720, 480, 44100, 1).unwrap();

        assert_eq!(
            s.push_video_frame(&test_util::delta_frame()),
            PushOutcome::HeaderPending
        );
        assert_eq!(s.state(), MuxState::HeaderPending);
        assert!(!s.is_header_written());

        assert_eq!(
            s.push_video_frame(&test_util::keyframe()),
            PushOutcome::Written
        );
        assert_eq!(s.state(), MuxState::Streaming);
        assert!(s.is_header_written());
        assert_eq!(conn.connect_count(), 1);

        let stats = s.stats();
        assert_eq!(stats.frames_dropped_before_header, 1);
        assert_eq!(stats.video_packets, 1);
        assert_eq!(stats.bytes_written as usize, conn.bytes().len());
    }

    #[test]
    fn stop_is_idempotent() {
        let conn = MemoryConnector::new();
        let s = session(&conn);
        s.stop();
        assert_eq!(s.state(), MuxState::Idle);

        s.start(720, 480, 44100, 1).unwrap();
        s.push_video_frame(&test_util::keyframe());
        s.stop();
        let len = conn.bytes().len();
        s.stop();
        assert_eq!(s.state(), MuxState::Stopped);
        assert_eq!(conn.bytes().len(), len);
        assert_eq!(conn.close_count(), 1);
    }

    #[test]
    fn start_after_stop_is_terminated() {
        let conn = MemoryConnector::new();
        let s = session(&conn);
        s.start(720, 480, 44100, 1).unwrap();
        s.stop();
        assert!(matches!(
            s.start(720, 480, 44100, 1),
            Err(MuxError::Terminated)
        ));
    }

    #[test]
    fn connect_failure_latches_fatal() {
        let conn = MemoryConnector::new().fail_connect();
        let s = session(&conn);
        s.start(720, 480, 44100, 1).unwrap();
        assert_eq!(s.push_video_frame(&test_util::keyframe()), PushOutcome::Fatal);
        assert!(s.is_fatal());
        assert!(!s.is_header_written());
        assert_eq!(s.push_video_frame(&test_util::keyframe()), PushOutcome::Fatal);
        assert_eq!(conn.connect_count(), 1);
    }

    #[test]
    fn toggle_trace_flips() {
        let ctx = SessionContext::new();
        assert!(!ctx.trace_enabled());
        assert!(ctx.toggle_trace());
        assert!(ctx.trace_enabled());
        assert!(!ctx.toggle_trace());
        let shared = ctx.clone();
        shared.set_trace(true);
        assert!(ctx.trace_enabled());
    }
}
