use std::time::Duration;

use serde::Deserialize;

// ─── File Input ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PublisherConfigInput {
    pub destination: Option<String>,
    pub video: VideoConfigInput,
    pub audio: AudioConfigInput,
    pub capture: CaptureConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VideoConfigInput {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub bitrate_kbps: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AudioConfigInput {
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub samples_per_frame: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CaptureConfigInput {
    pub source: Option<String>,
    pub stats_interval_secs: Option<u64>,
}

// ─── Resolved Config ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 720,
            height: 480,
            fps: 30,
            bitrate_kbps: 800,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u8,
    pub samples_per_frame: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
            samples_per_frame: 1024,
        }
    }
}

impl AudioConfig {
    /// Wall-clock duration of one AAC frame.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples_per_frame as f64 / self.sample_rate as f64)
    }
}

/// Which capture collaborator feeds the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Synthetic H.264/AAC generator.
    Test,
    /// GStreamer test pipelines (requires the `gst` feature).
    Gst,
}

impl SourceKind {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "test" => Ok(SourceKind::Test),
            "gst" | "gstreamer" => {
                if cfg!(feature = "gst") {
                    Ok(SourceKind::Gst)
                } else {
                    Err("capture source 'gst' requires building with the `gst` feature".into())
                }
            }
            other => Err(format!("Unknown capture source '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub source: SourceKind,
    pub stats_interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Test,
            stats_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub destination: String,
    pub video: VideoConfig,
    pub audio: AudioConfig,
    pub capture: CaptureConfig,
}

impl PublisherConfigInput {
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        if input.trim().is_empty() {
            return Ok(PublisherConfigInput::default());
        }
        toml::from_str(input).map_err(|e| format!("Invalid config TOML: {}", e))
    }

    pub fn resolve(self) -> Result<PublisherConfig, String> {
        let destination = self
            .destination
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .ok_or_else(|| "No destination configured (set `destination` or --destination)".to_string())?;

        let dv = VideoConfig::default();
        let video = VideoConfig {
            width: self.video.width.unwrap_or(dv.width),
            height: self.video.height.unwrap_or(dv.height),
            fps: self.video.fps.unwrap_or(dv.fps),
            bitrate_kbps: self.video.bitrate_kbps.unwrap_or(dv.bitrate_kbps).max(1),
        };
        if video.width == 0 || video.height == 0 {
            return Err(format!("Invalid video size {}x{}", video.width, video.height));
        }
        if !(1..=240).contains(&video.fps) {
            return Err(format!("Invalid video fps {}", video.fps));
        }

        let da = AudioConfig::default();
        let audio = AudioConfig {
            sample_rate: self.audio.sample_rate.unwrap_or(da.sample_rate),
            channels: self.audio.channels.unwrap_or(da.channels),
            samples_per_frame: self.audio.samples_per_frame.unwrap_or(da.samples_per_frame),
        };
        if audio.sample_rate == 0 {
            return Err("Audio sample_rate must be non-zero".into());
        }
        if audio.samples_per_frame == 0 {
            return Err("Audio samples_per_frame must be non-zero".into());
        }

        let source = match self.capture.source {
            Some(s) => SourceKind::parse(&s)?,
            None => SourceKind::Test,
        };
        let capture = CaptureConfig {
            source,
            stats_interval: Duration::from_secs(self.capture.stats_interval_secs.unwrap_or(5).max(1)),
        };

        Ok(PublisherConfig {
            destination,
            video,
            audio,
            capture,
        })
    }
}

impl PublisherConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        PublisherConfigInput::from_toml_str(input)?.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let toml = r#"
            destination = "rtmp://live.example.com/app/key"

            [video]
            width = 1280
            height = 720
            fps = 25
            bitrate_kbps = 2500

            [audio]
            sample_rate = 48000
            channels = 2
            samples_per_frame = 1024

            [capture]
            source = "test"
            stats_interval_secs = 10
        "#;
        let cfg = PublisherConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.destination, "rtmp://live.example.com/app/key");
        assert_eq!(
            cfg.video,
            VideoConfig {
                width: 1280,
                height: 720,
                fps: 25,
                bitrate_kbps: 2500
            }
        );
        assert_eq!(cfg.audio.sample_rate, 48000);
        assert_eq!(cfg.audio.channels, 2);
        assert_eq!(cfg.capture.source, SourceKind::Test);
        assert_eq!(cfg.capture.stats_interval, Duration::from_secs(10));
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg = PublisherConfig::from_toml_str(r#"destination = "tcp://127.0.0.1:1935""#).unwrap();
        assert_eq!(cfg.video, VideoConfig::default());
        assert_eq!(cfg.audio, AudioConfig::default());
        assert_eq!(cfg.capture.stats_interval, Duration::from_secs(5));
    }

    #[test]
    fn missing_destination_is_rejected() {
        assert!(PublisherConfig::from_toml_str("").is_err());
        assert!(PublisherConfig::from_toml_str(r#"destination = "   ""#).is_err());
    }

    #[test]
    fn empty_input_parses_to_defaults() {
        let input = PublisherConfigInput::from_toml_str("  ").unwrap();
        assert!(input.destination.is_none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_size = r#"
            destination = "tcp://127.0.0.1:1935"
            [video]
            width = 0
        "#;
        assert!(PublisherConfig::from_toml_str(bad_size).is_err());

        let bad_source = r#"
            destination = "tcp://127.0.0.1:1935"
            [capture]
            source = "webcam"
        "#;
        assert!(PublisherConfig::from_toml_str(bad_source).is_err());

        assert!(PublisherConfig::from_toml_str("destination = [").is_err());
    }

    #[test]
    fn stats_interval_has_a_floor() {
        let toml = r#"
            destination = "tcp://127.0.0.1:1935"
            [capture]
            stats_interval_secs = 0
        "#;
        let cfg = PublisherConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.capture.stats_interval, Duration::from_secs(1));
    }

    #[test]
    fn audio_frame_duration() {
        let a = AudioConfig::default();
        let ms = a.frame_duration().as_secs_f64() * 1000.0;
        assert!((ms - 23.22).abs() < 0.01);
    }
}
