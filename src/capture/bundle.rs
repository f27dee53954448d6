//! Capture bundle - the four-plane result of one snapshot

use std::fmt;

use crate::capture::separate::{Plane, PlaneLabel};
use crate::stream::controller::ChannelState;
use crate::stream::frame::ChannelId;

/// Why a channel contributed nothing to a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GapReason {
    /// The channel was not delivering when the snapshot was taken.
    NotStreaming(ChannelState),
    /// Streaming, but no frame has arrived yet.
    Empty,
}

/// A channel missing from a bundle, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelGap {
    pub channel: ChannelId,
    pub reason: GapReason,
}

impl fmt::Display for ChannelGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            GapReason::NotStreaming(state) => {
                write!(f, "{} channel not streaming ({state:?})", self.channel)
            }
            GapReason::Empty => write!(f, "{} channel has no frame yet", self.channel),
        }
    }
}

/// Result of one capture: up to four planes plus provenance.
///
/// A bundle with gaps is still a successful capture - partial data is
/// reported, never discarded. Bundles are ephemeral: handed to the save
/// collaborator and dropped.
#[derive(Debug, Clone)]
pub struct CaptureBundle {
    pub planes: Vec<Plane>,
    /// Device timestamp of the frame the R/G/B planes came from.
    pub rgb_timestamp: Option<u64>,
    /// Device timestamp of the NIR frame.
    pub nir_timestamp: Option<u64>,
    pub gaps: Vec<ChannelGap>,
}

impl CaptureBundle {
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }

    pub fn plane(&self, label: PlaneLabel) -> Option<&Plane> {
        self.planes.iter().find(|plane| plane.label == label)
    }

    /// Absolute difference between the two source timestamps, in
    /// transport ticks; None unless both channels contributed. The
    /// channels are independently clocked, so skew is a data-quality
    /// signal, not a failure.
    pub fn timestamp_skew(&self) -> Option<u64> {
        match (self.rgb_timestamp, self.nir_timestamp) {
            (Some(rgb), Some(nir)) => Some(rgb.abs_diff(nir)),
            _ => None,
        }
    }
}
