//! Device transport boundary
//!
//! The pipeline consumes the streaming device through these traits and
//! never touches packet reassembly, resends or parameter semantics
//! itself. A delivery handed to a [`FrameSink`] is already one whole
//! frame.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stream::frame::{ChannelId, PixelFormat};

pub mod sim;

/// Where a channel's stream should be sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDestination {
    pub address: String,
    pub port: u16,
}

impl fmt::Display for StreamDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// One complete frame as handed over by the transport.
#[derive(Debug, Clone)]
pub struct FrameDelivery {
    pub channel: ChannelId,
    /// Block id on the wire, strictly increasing per channel.
    pub sequence: u64,
    /// Device capture clock, transport ticks.
    pub timestamp: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Bytes,
}

/// Receives frame-ready notifications. Implementations must not block;
/// deliveries can arrive from any execution context the transport uses.
pub trait FrameSink: Send + Sync {
    fn frame_ready(&self, delivery: FrameDelivery);
}

/// Control surface of the streaming device.
pub trait StreamTransport: Send + Sync {
    /// Begin delivery of one channel toward `destination`.
    fn start_channel(
        &self,
        channel: ChannelId,
        destination: &StreamDestination,
    ) -> Result<(), StreamStartError>;

    /// Tear the channel down. Idempotent; unknown channels are a no-op.
    fn stop_channel(&self, channel: ChannelId);

    /// Register the sink that receives `frame_ready` for every channel.
    fn register_sink(&self, sink: Arc<dyn FrameSink>);

    /// Opaque device parameter access (exposure, gain, line rate, image
    /// size). Names and values pass through uninterpreted; a changed
    /// parameter may change the format or geometry of later deliveries.
    fn get_parameter(&self, name: &str) -> Option<ParamValue>;
    fn set_parameter(&self, name: &str, value: ParamValue) -> bool;
}

/// GenICam-shaped parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

/// Why a channel could not start streaming.
#[derive(Debug, Error)]
pub enum StreamStartError {
    #[error("channel {0} is already streaming")]
    AlreadyActive(ChannelId),
    #[error("destination {destination} unreachable for channel {channel}: {reason}")]
    Unreachable {
        channel: ChannelId,
        destination: StreamDestination,
        reason: String,
    },
    #[error("channel {0} was stopped; build a new controller to stream again")]
    Stopped(ChannelId),
}
