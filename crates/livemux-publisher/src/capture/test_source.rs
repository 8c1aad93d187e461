//! # Synthetic Test Source
//!
//! Two paced worker threads standing in for a camera/encoder pair:
//!
//! - video: one Annex-B access unit per `1/fps`; SPS + PPS + IDR every
//!   `fps` frames (one GOP per second), a single non-IDR slice otherwise,
//!   sized to the configured bitrate
//! - audio: one ADTS AAC-LC frame per `samples_per_frame / sample_rate`
//!
//! The bitstream is structurally valid for the muxer but the slices carry
//! filler, not decodable pictures.

use std::thread::JoinHandle;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use crossbeam_channel::{select, tick, Receiver, Sender};
use livemux::flv::aac_sample_rate_index;
use livemux::FrameIngress;

use super::CaptureSource;
use crate::config::{AudioConfig, VideoConfig};

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Baseline profile, level 3.0.
const SPS: [u8; 9] = [0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x02, 0x80, 0xF6, 0x40];
const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];

const NAL_IDR: u8 = 0x65;
const NAL_SLICE: u8 = 0x41;

// ─── Generators ─────────────────────────────────────────────────────────────

/// Produces the synthetic video access units.
#[derive(Debug, Clone)]
pub struct VideoGenerator {
    gop: u64,
    slice_len: usize,
    frame_no: u64,
}

impl VideoGenerator {
    pub fn new(video: VideoConfig) -> Self {
        let fps = video.fps.max(1);
        let bytes_per_frame = (video.bitrate_kbps as usize * 1000 / 8) / fps as usize;
        VideoGenerator {
            gop: u64::from(fps),
            slice_len: bytes_per_frame.max(16),
            frame_no: 0,
        }
    }

    pub fn frame_no(&self) -> u64 {
        self.frame_no
    }

    pub fn next_frame(&mut self) -> Bytes {
        let key = self.frame_no % self.gop == 0;
        // Keyframes get a bigger slice, as real encoders produce.
        let slice_len = if key { self.slice_len * 4 } else { self.slice_len };

        let mut out = BytesMut::with_capacity(slice_len + SPS.len() + PPS.len() + 16);
        if key {
            out.put_slice(&START_CODE);
            out.put_slice(&SPS);
            out.put_slice(&START_CODE);
            out.put_slice(&PPS);
        }
        out.put_slice(&START_CODE);
        out.put_u8(if key { NAL_IDR } else { NAL_SLICE });
        let seed = self.frame_no as usize;
        // Filler bytes are never zero, so no start code can appear inside.
        out.extend((0..slice_len).map(|i| ((seed + i) % 255) as u8 + 1));

        self.frame_no += 1;
        out.freeze()
    }
}

/// Produces ADTS-framed AAC-LC frames.
#[derive(Debug, Clone)]
pub struct AudioGenerator {
    sample_rate_index: u8,
    channels: u8,
    payload_len: usize,
}

impl AudioGenerator {
    pub fn new(audio: AudioConfig) -> anyhow::Result<Self> {
        let sample_rate_index = aac_sample_rate_index(audio.sample_rate)
            .ok_or_else(|| anyhow::anyhow!("unsupported AAC sample rate {}", audio.sample_rate))?;
        if !(1..=7).contains(&audio.channels) {
            anyhow::bail!("unsupported channel count {}", audio.channels);
        }
        // ~64 kbps per channel.
        let frame_secs = audio.frame_duration().as_secs_f64();
        let payload_len = (64_000.0 / 8.0 * frame_secs * audio.channels as f64) as usize;
        Ok(AudioGenerator {
            sample_rate_index,
            channels: audio.channels,
            payload_len: payload_len.clamp(8, 6144 - 7),
        })
    }

    pub fn next_frame(&self) -> Bytes {
        let frame_len = 7 + self.payload_len;
        let mut out = BytesMut::with_capacity(frame_len);
        // syncword, MPEG-4, layer 0, no CRC
        out.put_u8(0xFF);
        out.put_u8(0xF1);
        // AAC-LC (profile 1), sampling index, channel config high bit
        out.put_u8((1 << 6) | (self.sample_rate_index << 2) | (self.channels >> 2));
        out.put_u8(((self.channels & 0x03) << 6) | ((frame_len >> 11) & 0x03) as u8);
        out.put_u8(((frame_len >> 3) & 0xFF) as u8);
        out.put_u8((((frame_len & 0x07) as u8) << 5) | 0x1F);
        out.put_u8(0xFC);
        out.put_bytes(0x21, self.payload_len);
        out.freeze()
    }
}

// ─── Source ─────────────────────────────────────────────────────────────────

pub struct TestSource {
    video: VideoConfig,
    audio: AudioConfig,
    stop_tx: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl TestSource {
    pub fn new(video: VideoConfig, audio: AudioConfig) -> Self {
        TestSource {
            video,
            audio,
            stop_tx: None,
            workers: Vec::new(),
        }
    }

    fn spawn_paced(
        name: &str,
        interval: Duration,
        stop_rx: Receiver<()>,
        mut produce: impl FnMut() + Send + 'static,
    ) -> anyhow::Result<JoinHandle<()>> {
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => produce(),
                    }
                }
            })?;
        Ok(handle)
    }
}

impl CaptureSource for TestSource {
    fn name(&self) -> &'static str {
        "test"
    }

    fn start(&mut self, ingress: &FrameIngress) -> anyhow::Result<()> {
        if self.stop_tx.is_some() {
            anyhow::bail!("test source already running");
        }
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

        let mut video = VideoGenerator::new(self.video);
        let on_video = ingress.video_callback();
        let video_interval = Duration::from_secs_f64(1.0 / f64::from(self.video.fps.max(1)));
        self.workers.push(Self::spawn_paced(
            "capture-video",
            video_interval,
            stop_rx.clone(),
            move || on_video(&video.next_frame()),
        )?);

        let audio = AudioGenerator::new(self.audio)?;
        let on_audio = ingress.audio_callback(self.audio.samples_per_frame);
        self.workers.push(Self::spawn_paced(
            "capture-audio",
            self.audio.frame_duration(),
            stop_rx,
            move || on_audio(&audio.next_frame()),
        )?);

        self.stop_tx = Some(stop_tx);
        tracing::info!(
            width = self.video.width,
            height = self.video.height,
            fps = self.video.fps,
            sample_rate = self.audio.sample_rate,
            channels = self.audio.channels,
            "synthetic capture started"
        );
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the sender disconnects every worker's stop channel.
        let Some(stop_tx) = self.stop_tx.take() else {
            return;
        };
        drop(stop_tx);
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("capture").to_string();
            if worker.join().is_err() {
                tracing::error!(thread = %name, "capture worker panicked");
            }
        }
        tracing::info!("synthetic capture stopped");
    }
}

impl Drop for TestSource {
    fn drop(&mut self) {
        self.stop();
    }
}
