pub mod controller;
pub mod frame;
pub mod limiter;
pub mod slot;
pub mod stats;

pub use controller::{ChannelController, ChannelState};
pub use frame::{ChannelId, Frame, PixelFormat, SharedFrame};
pub use limiter::RateGate;
pub use slot::LatestSlot;
pub use stats::ChannelStats;
