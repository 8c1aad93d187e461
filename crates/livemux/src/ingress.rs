//! # Frame Ingress
//!
//! Cloneable handles that capture threads use to feed a [`MuxSession`].
//! Each capture callback gets its own clone; the session lock does the
//! serialization.

use std::sync::Arc;

use crate::session::{MuxSession, PushOutcome};

/// Shared entry point for encoded frames.
#[derive(Clone)]
pub struct FrameIngress {
    session: Arc<MuxSession>,
}

impl FrameIngress {
    pub fn new(session: Arc<MuxSession>) -> Self {
        FrameIngress { session }
    }

    pub fn session(&self) -> &Arc<MuxSession> {
        &self.session
    }

    /// Hand over one Annex-B access unit.
    pub fn push_video_frame(&self, frame: Vec<u8>) -> PushOutcome {
        self.session.push_video_frame(&frame)
    }

    /// Hand over one AAC frame and its sample count.
    pub fn push_audio_frame(&self, frame: Vec<u8>, sample_count: u32) -> PushOutcome {
        self.session.push_audio_frame(&frame, sample_count)
    }

    /// Video callback in the shape capture pipelines expect.
    pub fn video_callback(&self) -> impl Fn(&[u8]) + Send + Sync + 'static {
        let session = Arc::clone(&self.session);
        move |frame: &[u8]| {
            session.push_video_frame(frame);
        }
    }

    /// Audio callback; every frame is reported as `samples_per_frame`
    /// samples.
    pub fn audio_callback(&self, samples_per_frame: u32) -> impl Fn(&[u8]) + Send + Sync + 'static {
        let session = Arc::clone(&self.session);
        move |frame: &[u8]| {
            session.push_audio_frame(frame, samples_per_frame);
        }
    }
}

impl From<Arc<MuxSession>> for FrameIngress {
    fn from(session: Arc<MuxSession>) -> Self {
        FrameIngress::new(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionContext;
    use crate::test_util::{self, MemoryConnector};

    fn started() -> (FrameIngress, MemoryConnector) {
        let conn = MemoryConnector::new();
        let (clock, _mock) = quanta::Clock::mock();
        let session = MuxSession::with_parts(
            "tcp://127.0.0.1:1935",
            Arc::new(conn.clone()),
            clock,
            SessionContext::new(),
        );
        session.start(720, 480, 44100, 1).unwrap();
        (FrameIngress::new(Arc::new(session)), conn)
    }

    #[test]
    fn owned_push_forwards_to_session() {
        let (ingress, _conn) = started();
        assert_eq!(
            ingress.push_video_frame(test_util::keyframe()),
            PushOutcome::Written
        );
        assert_eq!(
            ingress.push_audio_frame(test_util::adts_frame(16), 1024),
            PushOutcome::Written
        );
        let stats = ingress.session().stats();
        assert_eq!(stats.video_packets, 1);
        assert_eq!(stats.audio_samples, 1024);
    }

    #[test]
    fn callbacks_deliver_frames() {
        let (ingress, _conn) = started();
        let on_video = ingress.video_callback();
        let on_audio = ingress.audio_callback(1024);

        on_audio(&test_util::adts_frame(16));
        on_video(&test_util::keyframe());
        on_video(&test_util::delta_frame());
        on_audio(&test_util::adts_frame(16));
        on_audio(&test_util::adts_frame(16));

        let stats = ingress.session().stats();
        assert_eq!(stats.video_packets, 2);
        // The first audio frame arrived before the header.
        assert_eq!(stats.audio_packets, 2);
        assert_eq!(stats.audio_samples, 2048);
    }
}
