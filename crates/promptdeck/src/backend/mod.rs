//! Generation backend: the remote service that turns weighted prompts into audio.
//!
//! A [`MusicBackend`] opens sessions. Everything the service sends back is
//! delivered to the [`SessionObserver`] handed to `connect`, in arrival order.

pub mod lyria;

use std::sync::Arc;

use async_trait::async_trait;

use crate::primitives::{AudioChunk, FilteredPrompt, WeightedPrompt};

pub use lyria::LyriaBackend;

/// Inbound events from a live session.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    FilteredPrompt(FilteredPrompt),
    AudioChunks(Vec<AudioChunk>),
    Warning(String),
    /// Transport failure; the session is unusable.
    Error(String),
    /// The service closed the session, with its reason if given.
    Closed(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("failed to send: {0}")]
    Send(String),

    #[error("rejected by backend: {0}")]
    Rejected(String),

    #[error("session closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Receives inbound session events. Called from the session's reader task.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: ServerEvent);
}

/// An open generation session.
///
/// Playback controls only enqueue; delivery failures surface as
/// [`ServerEvent::Error`] or [`ServerEvent::Closed`].
#[async_trait]
pub trait MusicSession: Send + Sync {
    async fn set_weighted_prompts(&self, prompts: &[WeightedPrompt]) -> Result<(), BackendError>;

    fn play(&self) -> Result<(), BackendError>;

    fn pause(&self) -> Result<(), BackendError>;

    fn stop(&self) -> Result<(), BackendError>;

    /// Drop the generator's accumulated musical context.
    fn reset_context(&self) -> Result<(), BackendError>;
}

#[async_trait]
pub trait MusicBackend: Send + Sync {
    async fn connect(
        &self,
        model: &str,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Arc<dyn MusicSession>, BackendError>;
}
