//! Capture collaborators: encoded-frame producers that feed the session
//! through [`FrameIngress`] callbacks from their own threads.

#[cfg(feature = "gst")]
pub mod gst_pipeline;
pub mod test_source;

use livemux::FrameIngress;

use crate::config::{PublisherConfig, SourceKind};

/// A running producer of H.264 access units and AAC frames.
pub trait CaptureSource: Send {
    fn name(&self) -> &'static str;

    /// Begin delivering frames. Workers run until [`stop`](Self::stop).
    fn start(&mut self, ingress: &FrameIngress) -> anyhow::Result<()>;

    /// Stop producing and join every worker. Idempotent.
    fn stop(&mut self);
}

pub fn build(config: &PublisherConfig) -> anyhow::Result<Box<dyn CaptureSource>> {
    match config.capture.source {
        SourceKind::Test => Ok(Box::new(test_source::TestSource::new(
            config.video,
            config.audio,
        ))),
        #[cfg(feature = "gst")]
        SourceKind::Gst => Ok(Box::new(gst_pipeline::GstSource::new(config.video, config.audio))),
        #[cfg(not(feature = "gst"))]
        SourceKind::Gst => anyhow::bail!("capture source 'gst' requires the `gst` feature"),
    }
}
