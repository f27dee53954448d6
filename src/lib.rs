//! prism - dual-channel frame acquisition and channel separation
//!
//! One imaging device, two independently clocked streams (visible RGB
//! and near-infrared). Each channel's controller keeps the newest
//! complete frame in an atomically swapped slot; previews are decimated
//! to a bounded cadence; a capture snapshots both slots into a
//! four-plane bundle (R, G, B, NIR) that the saver writes out as PNGs.

pub mod capture;
pub mod pipeline;
pub mod stream;
pub mod transport;
pub(crate) mod utils;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::transport::StreamDestination;

pub use pipeline::DualStreamPipeline;
pub use stream::{ChannelId, ChannelState, Frame, PixelFormat, SharedFrame};

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub acquisition: AcquisitionConfig,
    pub preview: PreviewConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    pub rgb: ChannelConfig,
    /// Absent on single-channel rigs; captures then carry the NIR gap.
    pub nir: Option<ChannelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub destination: StreamDestination,
    /// Streaming flips to Error("stalled") after this long without frames.
    /// Zero disables stall detection for the channel.
    pub stall_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Upper bound on preview delivery, frames per second (clamped 1..=60).
    pub max_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub save_dir: PathBuf,
    /// Timestamp skew between the two source frames that triggers a
    /// data-quality warning, in transport ticks. 0 disables the check.
    pub skew_warn_ticks: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            acquisition: AcquisitionConfig {
                rgb: ChannelConfig {
                    destination: StreamDestination {
                        address: "239.192.0.1".into(),
                        port: 50_010,
                    },
                    stall_timeout_ms: 2_000,
                },
                nir: Some(ChannelConfig {
                    destination: StreamDestination {
                        address: "239.192.0.1".into(),
                        port: 50_011,
                    },
                    stall_timeout_ms: 2_000,
                }),
            },
            preview: PreviewConfig { max_rate: 15 },
            capture: CaptureConfig {
                save_dir: PathBuf::from("captures"),
                skew_warn_ticks: 50_000_000, // 50ms on a nanosecond tick clock
            },
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `PRISM_`-prefixed
    /// environment variables (e.g. `PRISM_PREVIEW__MAX_RATE=30`).
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(
                config::Environment::with_prefix("PRISM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
