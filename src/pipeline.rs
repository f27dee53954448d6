//! Session facade wiring transport, controllers and capture together

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::capture::bundle::CaptureBundle;
use crate::capture::coordinator::CaptureCoordinator;
use crate::capture::separate::SeparateError;
use crate::stream::controller::{ChannelController, ChannelState};
use crate::stream::frame::{ChannelId, SharedFrame};
use crate::stream::stats::ChannelStats;
use crate::transport::{FrameDelivery, FrameSink, StreamStartError, StreamTransport};
use crate::Config;

/// One acquisition session over a dual-channel device.
///
/// Owns a controller per configured channel, routes transport deliveries
/// to them, and fronts capture. Sessions are one-shot like their
/// controllers: `stop` ends the session and the next one starts from a
/// fresh [`DualStreamPipeline::build`].
pub struct DualStreamPipeline {
    rgb: Arc<ChannelController>,
    nir: Option<Arc<ChannelController>>,
    coordinator: CaptureCoordinator,
}

impl DualStreamPipeline {
    /// Wire a session and register it as the transport's frame sink.
    pub fn build(config: &Config, transport: Arc<dyn StreamTransport>) -> Arc<Self> {
        let rgb = ChannelController::new(
            ChannelId::Rgb,
            &config.acquisition.rgb,
            config.preview.max_rate,
            Arc::clone(&transport),
        );
        let nir = config.acquisition.nir.as_ref().map(|channel_config| {
            ChannelController::new(
                ChannelId::Nir,
                channel_config,
                config.preview.max_rate,
                Arc::clone(&transport),
            )
        });
        let coordinator = CaptureCoordinator::new(
            Arc::clone(&rgb),
            nir.clone(),
            config.capture.skew_warn_ticks,
        );

        let pipeline = Arc::new(Self {
            rgb,
            nir,
            coordinator,
        });
        transport.register_sink(Arc::clone(&pipeline) as Arc<dyn FrameSink>);
        pipeline
    }

    /// Start RGB, then NIR. If NIR refuses, the already-running RGB
    /// channel is rolled back down and the error surfaces; a session
    /// never runs half-started unless configured single-channel.
    pub fn start(&self) -> Result<(), StreamStartError> {
        self.rgb.start()?;
        if let Some(nir) = &self.nir {
            if let Err(err) = nir.start() {
                error!(%err, "nir channel refused to start, rolling the session back");
                self.rgb.stop();
                return Err(err);
            }
        }
        info!(
            channels = if self.nir.is_some() { 2 } else { 1 },
            "acquisition session started"
        );
        Ok(())
    }

    /// End the session. Both slots keep their final frame for readers.
    pub fn stop(&self) {
        self.rgb.stop();
        if let Some(nir) = &self.nir {
            nir.stop();
        }
        info!("acquisition session stopped");
    }

    /// Bring one channel back after a stall. Per-channel recovery is the
    /// caller's policy; the other channel is untouched.
    pub fn restart_channel(&self, channel: ChannelId) -> Result<(), StreamStartError> {
        match self.controller(channel) {
            Some(controller) => controller.start(),
            None => Err(StreamStartError::Stopped(channel)),
        }
    }

    pub fn channel_state(&self, channel: ChannelId) -> ChannelState {
        match self.controller(channel) {
            Some(controller) => controller.state(),
            // The unconfigured side of a single-channel rig never starts.
            None => ChannelState::Idle,
        }
    }

    pub fn controller(&self, channel: ChannelId) -> Option<&Arc<ChannelController>> {
        match channel {
            ChannelId::Rgb => Some(&self.rgb),
            ChannelId::Nir => self.nir.as_ref(),
        }
    }

    /// Rate-limited latest-frame feed for one channel.
    pub fn subscribe_preview(&self, channel: ChannelId) -> Option<flume::Receiver<SharedFrame>> {
        self.controller(channel)
            .map(|controller| controller.subscribe_preview())
    }

    pub fn latest(&self, channel: ChannelId) -> Option<SharedFrame> {
        self.controller(channel)
            .and_then(|controller| controller.latest())
    }

    /// One synchronous snapshot of both channels; see the coordinator
    /// for the partial-bundle semantics.
    pub fn capture(&self) -> Result<CaptureBundle, SeparateError> {
        self.coordinator.capture()
    }

    pub fn stats(&self, channel: ChannelId) -> Option<ChannelStats> {
        self.controller(channel).map(|controller| controller.stats())
    }

    /// Preview cadence for both channels, clamped to 1..=60 per second.
    pub fn set_preview_rate(&self, rate_hz: u32) {
        self.rgb.set_preview_rate(rate_hz);
        if let Some(nir) = &self.nir {
            nir.set_preview_rate(rate_hz);
        }
    }
}

impl FrameSink for DualStreamPipeline {
    fn frame_ready(&self, delivery: FrameDelivery) {
        match self.controller(delivery.channel) {
            Some(controller) => controller.on_frame_ready(delivery),
            None => warn!(channel = %delivery.channel, "delivery for an unconfigured channel"),
        }
    }
}
