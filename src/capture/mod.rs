pub mod bundle;
pub mod coordinator;
pub mod save;
pub mod separate;

pub use bundle::{CaptureBundle, ChannelGap, GapReason};
pub use coordinator::CaptureCoordinator;
pub use save::{BundleSaver, SaveError, SavedCapture};
pub use separate::{Plane, PlaneLabel, SeparateError};
