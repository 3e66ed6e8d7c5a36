pub mod adapter;
pub mod handle;
pub mod progress;

pub use adapter::{PlaybackAdapter, PlaybackError, PlaybackObservation};
pub use handle::{EngineChannels, PlaybackCommand, PlaybackHandle};
pub use progress::{PlaybackProgress, PlaybackState};
