//! Output device: the monotonic audio clock and everything scheduled on it.
//!
//! ```text
//!  coordinator ──start_at(buffer, gain, t)──► Timeline ──render()──► sink
//!                                              │                     ├─ RealtimeDriver (wall clock, WAV)
//!                                              └─ GainNode curves    └─ PipeWireSink (feature)
//! ```
//!
//! The clock only advances while a sink pulls audio from a resumed
//! timeline, so "now" is always the position of the next rendered frame.

pub mod driver;
pub mod gain;
#[cfg(feature = "pipewire")]
pub mod pipewire_output;
pub mod timeline;

use std::sync::Arc;

use crate::codec::AudioBuffer;

pub use driver::{DriverConfig, DriverStats, RealtimeDriver};
pub use gain::{Automation, AutomationEvent, GainNode};
pub use timeline::Timeline;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutputError {
    #[error("output device is suspended")]
    Suspended,

    #[error("output device error: {0}")]
    Device(String),

    #[error("buffer has {got} channels, device expects at most {max}")]
    ChannelMismatch { got: usize, max: usize },
}

/// The output device the coordinator schedules audio on.
pub trait OutputDevice: Send + Sync {
    fn sample_rate(&self) -> u32;

    /// Seconds since the device clock started. Monotonic.
    fn current_time(&self) -> f64;

    /// Start (or restart) the clock. Idempotent.
    fn resume(&self) -> Result<(), OutputError>;

    fn suspend(&self);

    fn is_running(&self) -> bool;

    fn create_gain(&self) -> Arc<GainNode> {
        GainNode::new()
    }

    /// Route a gain node to the destination.
    fn connect(&self, gain: &Arc<GainNode>) {
        gain.connect();
    }

    /// Play `buffer` once through `gain`, starting at absolute device time `when`.
    fn start_at(
        &self,
        buffer: Arc<AudioBuffer>,
        gain: &Arc<GainNode>,
        when: f64,
    ) -> Result<(), OutputError>;
}
