//! Frame value objects shared across the pipeline

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The two streams the device emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelId {
    /// Visible-light color stream.
    Rgb,
    /// Near-infrared stream.
    Nir,
}

impl ChannelId {
    pub const ALL: [ChannelId; 2] = [ChannelId::Rgb, ChannelId::Nir];

    pub fn label(self) -> &'static str {
        match self {
            ChannelId::Rgb => "rgb",
            ChannelId::Nir => "nir",
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Pixel formats the device family emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono8,
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
        }
    }

    /// Byte offsets of the R, G and B components within one pixel;
    /// None for monochrome.
    pub fn rgb_offsets(self) -> Option<[usize; 3]> {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Rgba8 => Some([0, 1, 2]),
            PixelFormat::Bgr8 | PixelFormat::Bgra8 => Some([2, 1, 0]),
            PixelFormat::Mono8 => None,
        }
    }

    pub fn is_mono(self) -> bool {
        matches!(self, PixelFormat::Mono8)
    }
}

/// One complete frame with zero-copy payload semantics.
///
/// Immutable once constructed; a newer frame is always a new object.
/// Cloning shares the pixel data, it never copies it.
#[derive(Clone)]
pub struct Frame {
    pub channel: ChannelId,
    /// Transport block id, strictly increasing per channel.
    pub sequence: u64,
    /// Device capture clock in transport ticks, not wall-clock of receipt.
    pub timestamp: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Immutable pixel data - can be shared across threads without copying
    pub data: Bytes,
    /// Local receipt time for latency accounting
    pub received_at: Instant,
}

/// Frames are handed around by reference count, never deep-copied.
pub type SharedFrame = Arc<Frame>;

impl Frame {
    /// Payload size the geometry and format call for.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}
