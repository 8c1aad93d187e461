//! # FLV Container Writer
//!
//! Serializes the session's two streams into an FLV byte stream suitable
//! for RTMP/TCP ingest. Pure encoding; no I/O happens here.
//!
//! ## Stream layout
//!
//! ```text
//! "FLV" v1 flags=0x05 hdr=9 | PrevTagSize0=0
//! script  onMetaData (AMF0)
//! video   AVC sequence header   (AVCDecoderConfigurationRecord)
//! audio   AAC sequence header   (AudioSpecificConfig)
//! video / audio tags, interleaved, ms timestamps
//! video   AVC end of sequence   (on clean stop)
//! ```
//!
//! ## Tag layout (11-byte header + body + 4-byte PreviousTagSize)
//!
//! ```text
//! type(8) | dataSize(24) | timestamp(24) | timestampExt(8) | streamId(24)=0
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::MuxError;
use crate::media::nal::annex_b_to_avcc;
use crate::media::params::ParameterBlob;

// ─── Constants ───────────────────────────────────────────────────────────────

pub const TAG_AUDIO: u8 = 8;
pub const TAG_VIDEO: u8 = 9;
pub const TAG_SCRIPT: u8 = 18;

/// FLV file header plus PreviousTagSize0.
pub const FLV_HEADER_LEN: usize = 13;

/// Tag header length (excludes the trailing PreviousTagSize).
pub const TAG_HEADER_LEN: usize = 11;

/// FLV `CodecID` for AVC.
pub const VIDEO_CODEC_AVC: u8 = 7;

/// FLV `SoundFormat` for AAC.
pub const AUDIO_CODEC_AAC: u8 = 10;

const AVC_SEQUENCE_HEADER: u8 = 0;
const AVC_NALU: u8 = 1;
const AVC_END_OF_SEQUENCE: u8 = 2;
const AAC_SEQUENCE_HEADER: u8 = 0;
const AAC_RAW: u8 = 1;

/// Frame/codec byte, packet type, 24-bit composition time.
const VIDEO_BODY_PREFIX_LEN: usize = 5;
/// Sound flags byte, packet type.
const AUDIO_BODY_PREFIX_LEN: usize = 2;
/// Big-endian u32 following every tag.
const PREV_TAG_SIZE_LEN: usize = 4;

/// AAC audio tags always declare 44 kHz / 16-bit / stereo; the real format
/// comes from the AudioSpecificConfig.
const AAC_SOUND_FLAGS: u8 = (AUDIO_CODEC_AAC << 4) | (3 << 2) | (1 << 1) | 1;

/// Stream index of the video stream in a session.
pub const VIDEO_STREAM_INDEX: usize = 0;
/// Stream index of the audio stream in a session.
pub const AUDIO_STREAM_INDEX: usize = 1;

const ENCODER_NAME: &str = concat!("livemux ", env!("CARGO_PKG_VERSION"));

// ─── Stream Descriptors ──────────────────────────────────────────────────────

/// Rational time base of a stream. Both streams use milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub const MILLIS: TimeBase = TimeBase { num: 1, den: 1000 };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Aac,
}

/// Video stream metadata. The parameter blob is attached exactly once,
/// when the header is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoStream {
    pub index: usize,
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub time_base: TimeBase,
    parameters: Option<ParameterBlob>,
}

impl VideoStream {
    pub fn h264(width: u32, height: u32) -> Result<Self, MuxError> {
        if width == 0 || height == 0 {
            return Err(MuxError::InvalidDimensions { width, height });
        }
        Ok(VideoStream {
            index: VIDEO_STREAM_INDEX,
            codec: VideoCodec::H264,
            width,
            height,
            time_base: TimeBase::MILLIS,
            parameters: None,
        })
    }

    pub fn parameters(&self) -> Option<&ParameterBlob> {
        self.parameters.as_ref()
    }
}

/// Audio stream metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioStream {
    pub index: usize,
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u8,
    pub time_base: TimeBase,
    sample_rate_index: u8,
}

impl AudioStream {
    pub fn aac(sample_rate: u32, channels: u8) -> Result<Self, MuxError> {
        let sample_rate_index =
            aac_sample_rate_index(sample_rate).ok_or(MuxError::UnsupportedSampleRate(sample_rate))?;
        if channels == 0 || channels > 7 {
            return Err(MuxError::UnsupportedChannels(channels));
        }
        Ok(AudioStream {
            index: AUDIO_STREAM_INDEX,
            codec: AudioCodec::Aac,
            sample_rate,
            channels,
            time_base: TimeBase::MILLIS,
            sample_rate_index,
        })
    }

    /// Two-byte AudioSpecificConfig for AAC-LC (ISO/IEC 14496-3 §1.6.2.1).
    ///
    /// ```text
    /// audioObjectType(5)=2 | samplingFrequencyIndex(4) | channelConfiguration(4) | 000
    /// ```
    pub fn audio_specific_config(&self) -> [u8; 2] {
        const AAC_LC: u8 = 2;
        let idx = self.sample_rate_index;
        [
            (AAC_LC << 3) | (idx >> 1),
            ((idx & 0x01) << 7) | (self.channels << 3),
        ]
    }
}

/// MPEG-4 sampling frequency index for a sample rate.
pub fn aac_sample_rate_index(sample_rate: u32) -> Option<u8> {
    const RATES: [u32; 13] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
    ];
    RATES
        .iter()
        .position(|&r| r == sample_rate)
        .map(|idx| idx as u8)
}

// ─── Output Packet ───────────────────────────────────────────────────────────

/// One timestamped packet handed to the container writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputPacket<'a> {
    pub stream_index: usize,
    pub payload: &'a [u8],
    pub pts: u64,
    pub dts: u64,
    pub key_frame: bool,
}

// ─── Muxer ───────────────────────────────────────────────────────────────────

/// FLV container context for one session: owns both stream descriptors
/// and turns packets into tag bytes.
#[derive(Debug, Clone)]
pub struct FlvMuxer {
    video: VideoStream,
    audio: AudioStream,
    last_video_ts: u64,
}

impl FlvMuxer {
    pub fn new(video: VideoStream, audio: AudioStream) -> Self {
        FlvMuxer {
            video,
            audio,
            last_video_ts: 0,
        }
    }

    pub fn video(&self) -> &VideoStream {
        &self.video
    }

    pub fn audio(&self) -> &AudioStream {
        &self.audio
    }

    /// Attach the parameter blob and produce the container header: file
    /// header, `onMetaData`, and both codec sequence headers.
    ///
    /// The blob is only attached on the first call; later calls reuse it.
    pub fn write_header(&mut self, parameters: ParameterBlob) -> Bytes {
        let parameters = self.video.parameters.get_or_insert(parameters).clone();
        let avcc = parameters.avc_decoder_configuration();
        let asc = self.audio.audio_specific_config();
        let metadata = self.metadata();

        let video_body_len = VIDEO_BODY_PREFIX_LEN + avcc.len();
        let mut out = BytesMut::with_capacity(
            FLV_HEADER_LEN
                + tag_len(metadata.len())
                + tag_len(video_body_len)
                + tag_len(AUDIO_BODY_PREFIX_LEN + asc.len()),
        );

        out.put_slice(b"FLV");
        out.put_u8(1);
        out.put_u8(0x05); // audio + video
        out.put_u32(9);
        out.put_u32(0);

        put_tag(&mut out, TAG_SCRIPT, 0, &metadata);

        let mut video_body = Vec::with_capacity(video_body_len);
        video_body.push(video_tag_flags(true));
        video_body.push(AVC_SEQUENCE_HEADER);
        video_body.extend_from_slice(&[0, 0, 0]);
        video_body.extend_from_slice(&avcc);
        put_tag(&mut out, TAG_VIDEO, 0, &video_body);

        let audio_body = [AAC_SOUND_FLAGS, AAC_SEQUENCE_HEADER, asc[0], asc[1]];
        put_tag(&mut out, TAG_AUDIO, 0, &audio_body);

        out.freeze()
    }

    /// Encode one packet as an FLV tag.
    ///
    /// Video payloads are Annex-B access units and are re-framed as AVCC.
    /// Audio payloads may carry an ADTS header, which is stripped.
    pub fn write_packet(&mut self, pkt: &OutputPacket<'_>) -> Bytes {
        if pkt.stream_index == self.video.index {
            let avcc = annex_b_to_avcc(pkt.payload);
            let mut out = BytesMut::with_capacity(tag_len(VIDEO_BODY_PREFIX_LEN + avcc.len()));
            let mut body = Vec::with_capacity(VIDEO_BODY_PREFIX_LEN + avcc.len());
            body.push(video_tag_flags(pkt.key_frame));
            body.push(AVC_NALU);
            // Composition time offset: pts == dts, no reordering.
            let cts = pkt.pts.saturating_sub(pkt.dts) as u32;
            body.extend_from_slice(&cts.to_be_bytes()[1..]);
            body.extend_from_slice(&avcc);
            put_tag(&mut out, TAG_VIDEO, pkt.dts, &body);
            self.last_video_ts = pkt.dts;
            out.freeze()
        } else {
            let raw = strip_adts(pkt.payload);
            let mut out = BytesMut::with_capacity(tag_len(AUDIO_BODY_PREFIX_LEN + raw.len()));
            let mut body = Vec::with_capacity(AUDIO_BODY_PREFIX_LEN + raw.len());
            body.push(AAC_SOUND_FLAGS);
            body.push(AAC_RAW);
            body.extend_from_slice(raw);
            put_tag(&mut out, TAG_AUDIO, pkt.dts, &body);
            out.freeze()
        }
    }

    /// Container trailer: an AVC end-of-sequence tag at the last video time.
    pub fn write_trailer(&self) -> Bytes {
        let body = [video_tag_flags(true), AVC_END_OF_SEQUENCE, 0, 0, 0];
        let mut out = BytesMut::with_capacity(tag_len(body.len()));
        put_tag(&mut out, TAG_VIDEO, self.last_video_ts, &body);
        out.freeze()
    }

    fn metadata(&self) -> Vec<u8> {
        let mut amf = Vec::with_capacity(256);
        amf0::put_string(&mut amf, "onMetaData");
        amf0::put_ecma_array_start(&mut amf, 9);
        amf0::put_number_entry(&mut amf, "duration", 0.0);
        amf0::put_number_entry(&mut amf, "width", self.video.width as f64);
        amf0::put_number_entry(&mut amf, "height", self.video.height as f64);
        amf0::put_number_entry(&mut amf, "videocodecid", VIDEO_CODEC_AVC as f64);
        amf0::put_number_entry(&mut amf, "audiosamplerate", self.audio.sample_rate as f64);
        amf0::put_number_entry(&mut amf, "audiosamplesize", 16.0);
        amf0::put_bool_entry(&mut amf, "stereo", self.audio.channels > 1);
        amf0::put_number_entry(&mut amf, "audiocodecid", AUDIO_CODEC_AAC as f64);
        amf0::put_string_entry(&mut amf, "encoder", ENCODER_NAME);
        amf0::put_object_end(&mut amf);
        amf
    }
}

fn video_tag_flags(key_frame: bool) -> u8 {
    let frame_type = if key_frame { 1 } else { 2 };
    (frame_type << 4) | VIDEO_CODEC_AVC
}

/// Encoded size of a tag with a `body_len` body, including the trailing
/// previous-tag-size field.
fn tag_len(body_len: usize) -> usize {
    TAG_HEADER_LEN + body_len + PREV_TAG_SIZE_LEN
}

fn put_tag(out: &mut BytesMut, tag_type: u8, timestamp_ms: u64, body: &[u8]) {
    let ts = timestamp_ms as u32;
    let size = body.len() as u32;
    out.put_u8(tag_type);
    out.put_slice(&size.to_be_bytes()[1..]);
    out.put_slice(&ts.to_be_bytes()[1..]);
    out.put_u8((ts >> 24) as u8);
    out.put_slice(&[0, 0, 0]);
    out.put_slice(body);
    out.put_u32(TAG_HEADER_LEN as u32 + size);
}

/// Strip an ADTS header (7 bytes, or 9 with CRC) if the frame has one.
pub fn strip_adts(frame: &[u8]) -> &[u8] {
    if frame.len() >= 7 && frame[0] == 0xFF && frame[1] & 0xF6 == 0xF0 {
        let header_len = if frame[1] & 0x01 == 1 { 7 } else { 9 };
        return frame.get(header_len..).unwrap_or(&[]);
    }
    frame
}

// ─── AMF0 ────────────────────────────────────────────────────────────────────

mod amf0 {
    const NUMBER: u8 = 0x00;
    const BOOLEAN: u8 = 0x01;
    const STRING: u8 = 0x02;
    const ECMA_ARRAY: u8 = 0x08;
    const OBJECT_END: u8 = 0x09;

    pub fn put_string(out: &mut Vec<u8>, s: &str) {
        out.push(STRING);
        put_key(out, s);
    }

    pub fn put_ecma_array_start(out: &mut Vec<u8>, count: u32) {
        out.push(ECMA_ARRAY);
        out.extend_from_slice(&count.to_be_bytes());
    }

    pub fn put_number_entry(out: &mut Vec<u8>, key: &str, value: f64) {
        put_key(out, key);
        out.push(NUMBER);
        out.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_bool_entry(out: &mut Vec<u8>, key: &str, value: bool) {
        put_key(out, key);
        out.push(BOOLEAN);
        out.push(value as u8);
    }

    pub fn put_string_entry(out: &mut Vec<u8>, key: &str, value: &str) {
        put_key(out, key);
        put_string(out, value);
    }

    pub fn put_object_end(out: &mut Vec<u8>) {
        out.extend_from_slice(&[0x00, 0x00, OBJECT_END]);
    }

    fn put_key(out: &mut Vec<u8>, key: &str) {
        out.extend_from_slice(&(key.len() as u16).to_be_bytes());
        out.extend_from_slice(key.as_bytes());
    }
}
