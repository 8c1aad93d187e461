//! # GStreamer Capture
//!
//! Live test pipelines encoding H.264 and AAC, delivered through appsink
//! callbacks on GStreamer's streaming threads.
//!
//! ```text
//! videotestsrc → x264enc → h264parse (byte-stream, AU, SPS/PPS on IDR) → appsink
//! audiotestsrc → avenc_aac → aacparse (ADTS) → appsink
//! ```

use std::thread::JoinHandle;

use crossbeam_channel::{Sender, TryRecvError};
use gst::prelude::*;
use gst::MessageView;
use livemux::FrameIngress;

use super::CaptureSource;
use crate::config::{AudioConfig, VideoConfig};

pub struct GstSource {
    video: VideoConfig,
    audio: AudioConfig,
    pipelines: Vec<gst::Pipeline>,
    bus_stop: Option<Sender<()>>,
    bus_thread: Option<JoinHandle<()>>,
}

impl GstSource {
    pub fn new(video: VideoConfig, audio: AudioConfig) -> Self {
        GstSource {
            video,
            audio,
            pipelines: Vec::new(),
            bus_stop: None,
            bus_thread: None,
        }
    }

    fn video_pipeline(&self) -> String {
        let v = &self.video;
        format!(
            "videotestsrc is-live=true pattern=ball \
             ! video/x-raw,width={w},height={h},framerate={fps}/1 \
             ! videoconvert \
             ! x264enc tune=zerolatency speed-preset=ultrafast bitrate={kbps} key-int-max={fps} \
             ! h264parse config-interval=-1 \
             ! video/x-h264,stream-format=byte-stream,alignment=au \
             ! appsink name=h264sink sync=false max-buffers=8 drop=true",
            w = v.width,
            h = v.height,
            fps = v.fps,
            kbps = v.bitrate_kbps,
        )
    }

    fn audio_pipeline(&self) -> String {
        let a = &self.audio;
        format!(
            "audiotestsrc is-live=true wave=sine samplesperbuffer={spf} \
             ! audioconvert ! audioresample \
             ! audio/x-raw,rate={rate},channels={ch} \
             ! avenc_aac \
             ! aacparse \
             ! audio/mpeg,mpegversion=4,stream-format=adts \
             ! appsink name=aacsink sync=false max-buffers=16 drop=true",
            spf = a.samples_per_frame,
            rate = a.sample_rate,
            ch = a.channels,
        )
    }
}

fn launch_with_sink(
    description: &str,
    sink_name: &str,
    on_buffer: impl Fn(&[u8]) + Send + Sync + 'static,
) -> anyhow::Result<gst::Pipeline> {
    tracing::debug!(pipeline = description, "launching capture pipeline");
    let pipeline = gst::parse::launch(description)?
        .downcast::<gst::Pipeline>()
        .map_err(|_| anyhow::anyhow!("'{sink_name}' pipeline is not a gst::Pipeline"))?;

    let appsink = pipeline
        .by_name(sink_name)
        .ok_or_else(|| anyhow::anyhow!("appsink '{sink_name}' not found"))?
        .dynamic_cast::<gst_app::AppSink>()
        .map_err(|_| anyhow::anyhow!("'{sink_name}' is not an appsink"))?;

    appsink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |sink| {
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                on_buffer(map.as_slice());
                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );

    Ok(pipeline)
}

impl CaptureSource for GstSource {
    fn name(&self) -> &'static str {
        "gst"
    }

    fn start(&mut self, ingress: &FrameIngress) -> anyhow::Result<()> {
        if !self.pipelines.is_empty() {
            anyhow::bail!("gst source already running");
        }
        gst::init()?;

        let video = launch_with_sink(&self.video_pipeline(), "h264sink", ingress.video_callback())?;
        let audio = launch_with_sink(
            &self.audio_pipeline(),
            "aacsink",
            ingress.audio_callback(self.audio.samples_per_frame),
        )?;

        let buses: Vec<gst::Bus> = [&video, &audio].iter().filter_map(|p| p.bus()).collect();

        for pipeline in [&video, &audio] {
            if let Err(e) = pipeline.set_state(gst::State::Playing) {
                let _ = video.set_state(gst::State::Null);
                let _ = audio.set_state(gst::State::Null);
                anyhow::bail!("failed to start capture pipeline: {e}");
            }
        }
        self.pipelines = vec![video, audio];

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let handle = std::thread::Builder::new()
            .name("gst-bus".into())
            .spawn(move || {
                while let Err(TryRecvError::Empty) = stop_rx.try_recv() {
                    for bus in &buses {
                        let Some(msg) = bus.timed_pop_filtered(
                            gst::ClockTime::from_mseconds(50),
                            &[gst::MessageType::Error, gst::MessageType::Eos],
                        ) else {
                            continue;
                        };
                        match msg.view() {
                            MessageView::Error(err) => tracing::error!(
                                error = %err.error(),
                                debug = ?err.debug(),
                                "capture pipeline error"
                            ),
                            MessageView::Eos(..) => tracing::warn!("capture pipeline reached EOS"),
                            _ => {}
                        }
                    }
                }
            })?;
        self.bus_stop = Some(stop_tx);
        self.bus_thread = Some(handle);

        tracing::info!(
            width = self.video.width,
            height = self.video.height,
            fps = self.video.fps,
            bitrate_kbps = self.video.bitrate_kbps,
            sample_rate = self.audio.sample_rate,
            channels = self.audio.channels,
            "gstreamer capture started"
        );
        Ok(())
    }

    fn stop(&mut self) {
        for pipeline in self.pipelines.drain(..) {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                tracing::warn!(error = %e, "failed to stop capture pipeline");
            }
        }
        drop(self.bus_stop.take());
        if let Some(handle) = self.bus_thread.take() {
            if handle.join().is_err() {
                tracing::error!("gst bus thread panicked");
            }
            tracing::info!("gstreamer capture stopped");
        }
    }
}

impl Drop for GstSource {
    fn drop(&mut self) {
        self.stop();
    }
}
