//! Capture coordination across both channels

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::capture::bundle::{CaptureBundle, ChannelGap, GapReason};
use crate::capture::separate::{self, SeparateError};
use crate::stream::controller::{ChannelController, ChannelState};
use crate::stream::frame::{ChannelId, SharedFrame};

/// Snapshots both latest-frame slots into one bundle without pausing
/// either stream.
pub struct CaptureCoordinator {
    rgb: Arc<ChannelController>,
    nir: Option<Arc<ChannelController>>,
    /// Warn when the two source timestamps differ by more than this many
    /// transport ticks. Zero disables the check.
    skew_warn_ticks: u64,
}

impl CaptureCoordinator {
    pub fn new(
        rgb: Arc<ChannelController>,
        nir: Option<Arc<ChannelController>>,
        skew_warn_ticks: u64,
    ) -> Self {
        Self {
            rgb,
            nir,
            skew_warn_ticks,
        }
    }

    /// Take one snapshot. Each channel is consulted once - state, then
    /// slot - and the two reads happen back to back, ahead of any plane
    /// extraction, so the pair reflects one instant instead of drifting
    /// by the separation time. A channel that is not streaming or has
    /// produced nothing yet becomes a gap instead of failing the
    /// capture. A separator error fails only this call; streaming is
    /// never touched.
    pub fn capture(&self) -> Result<CaptureBundle, SeparateError> {
        let mut bundle = CaptureBundle {
            planes: Vec::with_capacity(4),
            rgb_timestamp: None,
            nir_timestamp: None,
            gaps: Vec::new(),
        };

        // Snapshot both channels first; a frame published while the
        // separator runs below is not consulted.
        let rgb_read = channel_snapshot(&self.rgb);
        let nir_read = self.nir.as_ref().map(|nir| channel_snapshot(nir));

        match rgb_read {
            Ok(frame) => {
                let planes = separate::split_rgb(&frame)?;
                bundle.rgb_timestamp = Some(frame.timestamp);
                bundle.planes.extend(planes);
            }
            Err(gap) => bundle.gaps.push(gap),
        }

        match nir_read {
            Some(Ok(frame)) => {
                bundle.planes.push(separate::nir_plane(&frame)?);
                bundle.nir_timestamp = Some(frame.timestamp);
            }
            Some(Err(gap)) => bundle.gaps.push(gap),
            // Single-channel rig: the NIR side was never configured.
            None => bundle.gaps.push(ChannelGap {
                channel: ChannelId::Nir,
                reason: GapReason::NotStreaming(ChannelState::Idle),
            }),
        }

        if let Some(skew) = bundle.timestamp_skew() {
            if self.skew_warn_ticks > 0 && skew > self.skew_warn_ticks {
                warn!(
                    skew_ticks = skew,
                    threshold_ticks = self.skew_warn_ticks,
                    "capture timestamp skew above threshold"
                );
            }
        }

        metrics::counter!("captures_total").increment(1);
        if !bundle.is_complete() {
            metrics::counter!("captures_partial").increment(1);
            for gap in &bundle.gaps {
                info!(%gap, "capture gap");
            }
        }
        debug!(
            planes = bundle.planes.len(),
            complete = bundle.is_complete(),
            "capture taken"
        );
        Ok(bundle)
    }
}

/// State first, then the slot, one read each.
fn channel_snapshot(controller: &ChannelController) -> Result<SharedFrame, ChannelGap> {
    let channel = controller.channel();
    match controller.state() {
        ChannelState::Streaming => {}
        other => {
            return Err(ChannelGap {
                channel,
                reason: GapReason::NotStreaming(other),
            })
        }
    }
    controller.latest().ok_or(ChannelGap {
        channel,
        reason: GapReason::Empty,
    })
}
