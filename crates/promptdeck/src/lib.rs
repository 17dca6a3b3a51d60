//! Promptdeck: realtime generated-music player
//!
//! Steers a streaming music generator with a board of weighted text prompts
//! and plays the audio it streams back without gaps.
//!
//! - **Prompts**: weighted descriptions, each bound to a MIDI controller
//! - **Backend**: one bidirectional session with the generation service
//! - **Session**: playback state machine and the gapless chunk scheduler
//! - **Output**: a monotonic audio clock with gain automation, pulled by a sink
//! - **MIDI**: Control Change input from the active device

pub mod backend;
pub mod codec;
pub mod events;
pub mod midi;
pub mod output;
pub mod primitives;
pub mod prompts;
pub mod session;
pub mod throttle;

pub use backend::{
    BackendError, LyriaBackend, MusicBackend, MusicSession, ServerEvent, SessionObserver,
};
pub use codec::{AudioBuffer, CodecError};
pub use events::{Notification, NotificationHub};
pub use midi::{MidiDispatcher, MidiError, MidiPortInfo};
pub use output::{OutputDevice, OutputError, Timeline};
pub use primitives::*;
pub use prompts::PromptBoard;
pub use session::{Coordinator, CoordinatorConfig, PushOutcome};
pub use throttle::Throttle;
