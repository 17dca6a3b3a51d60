//! Session/playback coordinator.
//!
//! Owns the one logical connection to the generation backend, the playback
//! state machine and the chunk scheduler that lays generated audio end to
//! end on the output timeline.
//!
//! ```text
//!            play()                    first chunk + buffer time
//!  Stopped ─────────► Loading ───────────────────────────────► Playing
//!     ▲                  ▲  ▲                                     │
//!     │ stop()/error     │  └────────── underrun ─────────────────┤
//!     │                  │ play()                                 │ pause()
//!     └──────────────────┴──────────────── Paused ◄───────────────┘
//! ```
//!
//! All state lives behind one mutex that is never held across an await.
//! Every connection carries a generation number; stop() retires the current
//! generation so late callbacks and late play() continuations from a torn
//! down connection are ignored. The deferred Loading → Playing flip carries
//! an epoch token that pause, stop and underrun invalidate.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use deckconf::DeckConfig;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, MusicBackend, MusicSession, ServerEvent, SessionObserver};
use crate::codec;
use crate::events::{
    Notification, NotificationHub, CONNECTION_ERROR_MESSAGE, NO_ACTIVE_PROMPTS_MESSAGE,
};
use crate::output::{GainNode, OutputDevice};
use crate::primitives::{AudioChunk, PlaybackState, Prompt, WeightedPrompt};
use crate::throttle::Throttle;

type SessionHandle = Arc<dyn MusicSession>;
type PendingConnection = Shared<BoxFuture<'static, Result<SessionHandle, BackendError>>>;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub model: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Lead time between the first scheduled chunk and audible output
    pub buffer_time: Duration,
    pub fade_time: Duration,
    /// Minimum spacing between prompt pushes
    pub push_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&DeckConfig::default())
    }
}

impl From<&DeckConfig> for CoordinatorConfig {
    fn from(config: &DeckConfig) -> Self {
        let audio = &config.infra.audio;
        Self {
            model: config.infra.backend.model.clone(),
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            buffer_time: Duration::from_secs_f64(audio.buffer_seconds.max(0.0)),
            fade_time: Duration::from_secs_f64(audio.fade_seconds.max(0.0)),
            push_interval: Duration::from_millis(config.infra.backend.push_interval_ms),
        }
    }
}

/// What happened to a prompt push.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Sent { count: usize },
    /// No connection yet; the snapshot is pushed when playback starts.
    Deferred,
    NoActivePrompts,
    Rejected { reason: String },
    /// Dropped by the rate limiter before any push had completed.
    Throttled,
}

struct Core {
    playback: PlaybackState,
    prompts: Vec<Prompt>,
    filtered: HashSet<String>,
    next_start_time: Option<f64>,
    epoch: u64,
    flip_timer: Option<JoinHandle<()>>,
    output: Arc<GainNode>,
    connection_error: bool,
    generation: u64,
    pending: Option<PendingConnection>,
    session: Option<SessionHandle>,
}

struct Inner {
    config: CoordinatorConfig,
    backend: Arc<dyn MusicBackend>,
    device: Arc<dyn OutputDevice>,
    core: Mutex<Core>,
    push_throttle: Throttle<PushOutcome>,
    hub: NotificationHub,
}

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        backend: Arc<dyn MusicBackend>,
        device: Arc<dyn OutputDevice>,
    ) -> Self {
        let output = device.create_gain();
        let push_throttle = Throttle::new(config.push_interval);
        Self {
            inner: Arc::new(Inner {
                config,
                backend,
                device,
                core: Mutex::new(Core {
                    playback: PlaybackState::Stopped,
                    prompts: Vec::new(),
                    filtered: HashSet::new(),
                    next_start_time: None,
                    epoch: 0,
                    flip_timer: None,
                    output,
                    connection_error: false,
                    generation: 0,
                    pending: None,
                    session: None,
                }),
                push_throttle,
                hub: NotificationHub::new(),
            }),
        }
    }

    /// Start or resume playback. No-op while already loading or playing.
    pub async fn play(&self) {
        let inner = &self.inner;
        {
            let mut core = inner.lock();
            if core.playback.accepts_audio() {
                debug!(state = %core.playback, "play ignored, already started");
                return;
            }
            inner.set_state(&mut core, PlaybackState::Loading);
        }

        let (generation, session) = match inner.acquire().await {
            Ok(acquired) => acquired,
            Err(e) => {
                debug!(error = %e, "play abandoned, no connection");
                return;
            }
        };

        let prompts = inner.lock().prompts.clone();
        self.push_prompts(prompts).await;

        let mut core = inner.lock();
        if core.generation != generation || !core.playback.accepts_audio() {
            debug!(state = %core.playback, "play superseded while pushing prompts");
            return;
        }

        if let Err(e) = inner.device.resume() {
            error!(error = %e, "output device failed to resume");
            inner.hub.error(e.to_string());
            inner.stop_locked(&mut core);
            return;
        }

        if let Err(e) = session.play() {
            warn!(error = %e, "backend rejected play");
            inner.connection_lost(&mut core);
            return;
        }

        inner.device.connect(&core.output);
        let now = inner.device.current_time();
        core.output.set_value_at_time(0.0, now);
        core.output
            .linear_ramp_to_value_at_time(1.0, now + inner.config.fade_time.as_secs_f64());
        info!("playback requested");
    }

    /// Pause generation and fade out. The connection is kept.
    pub fn pause(&self) {
        let mut core = self.inner.lock();
        self.inner.pause_locked(&mut core);
    }

    /// Stop playback and tear down the connection.
    pub fn stop(&self) {
        let mut core = self.inner.lock();
        self.inner.stop_locked(&mut core);
    }

    /// Toggle: playing pauses, paused or stopped plays, loading stops.
    pub async fn play_pause(&self) {
        let state = self.playback_state();
        match state {
            PlaybackState::Playing => self.pause(),
            PlaybackState::Paused | PlaybackState::Stopped => self.play().await,
            PlaybackState::Loading => self.stop(),
        }
    }

    /// Replace the prompt snapshot and push its active prompts.
    pub async fn push_prompts(&self, prompts: Vec<Prompt>) -> PushOutcome {
        let inner = &self.inner;
        let (weighted, session, generation) = {
            let mut core = inner.lock();
            core.prompts = prompts;

            let weighted: Vec<WeightedPrompt> =
                active_prompts(&core).iter().map(Prompt::weighted).collect();
            if weighted.is_empty() {
                inner.hub.error(NO_ACTIVE_PROMPTS_MESSAGE);
                inner.pause_locked(&mut core);
                return PushOutcome::NoActivePrompts;
            }

            let Some(session) = core.session.clone() else {
                return PushOutcome::Deferred;
            };
            (weighted, session, core.generation)
        };

        let for_push = Arc::clone(inner);
        inner
            .push_throttle
            .call(|| async move {
                match session.set_weighted_prompts(&weighted).await {
                    Ok(()) => {
                        debug!(count = weighted.len(), "prompts pushed");
                        PushOutcome::Sent {
                            count: weighted.len(),
                        }
                    }
                    Err(e) => {
                        for_push.push_rejected(generation, &e);
                        PushOutcome::Rejected {
                            reason: e.to_string(),
                        }
                    }
                }
            })
            .await
            .unwrap_or(PushOutcome::Throttled)
    }

    /// The live session, connecting first if needed.
    ///
    /// Concurrent callers share a single connection attempt.
    pub async fn get_or_create_connection(&self) -> Result<Arc<dyn MusicSession>, BackendError> {
        self.inner.acquire().await.map(|(_, session)| session)
    }

    /// Feed chunks as if the current session had delivered them.
    pub fn on_chunks_received(&self, chunks: &[AudioChunk]) {
        let mut core = self.inner.lock();
        self.inner.schedule_chunks(&mut core, chunks);
    }

    /// Ask the generator to forget its musical context.
    pub fn reset_context(&self) -> Result<(), BackendError> {
        let session = self.inner.lock().session.clone();
        match session {
            Some(session) => session.reset_context(),
            None => Ok(()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.hub.subscribe()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.inner.lock().playback
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.inner.lock().prompts.clone()
    }

    /// Prompts of the current snapshot that would be sent on the next push.
    pub fn active_prompts(&self) -> Vec<Prompt> {
        active_prompts(&self.inner.lock())
    }

    pub fn filtered_texts(&self) -> HashSet<String> {
        self.inner.lock().filtered.clone()
    }

    pub fn next_start_time(&self) -> Option<f64> {
        self.inner.lock().next_start_time
    }

    pub fn connection_error(&self) -> bool {
        self.inner.lock().connection_error
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().session.is_some()
    }

    pub fn device(&self) -> &Arc<dyn OutputDevice> {
        &self.inner.device
    }
}

fn active_prompts(core: &Core) -> Vec<Prompt> {
    core.prompts
        .iter()
        .filter(|p| p.weight > 0.0 && !core.filtered.contains(&p.text))
        .cloned()
        .collect()
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().expect("coordinator mutex poisoned")
    }

    fn set_state(&self, core: &mut Core, state: PlaybackState) {
        if core.playback == state {
            return;
        }
        info!(from = %core.playback, to = %state, "playback state");
        core.playback = state;
        self.hub
            .publish(Notification::PlaybackStateChanged { state });
    }

    /// Forget the schedule cursor and retire any pending flip to Playing.
    fn reset_schedule(&self, core: &mut Core) {
        core.next_start_time = None;
        core.epoch += 1;
        if let Some(timer) = core.flip_timer.take() {
            timer.abort();
        }
    }

    /// Fade the current output to silence and route future audio through a fresh node.
    fn silence_output(&self, core: &mut Core) {
        let now = self.device.current_time();
        core.output
            .fade_to(0.0, now, self.config.fade_time.as_secs_f64());
        core.output = self.device.create_gain();
    }

    fn pause_locked(&self, core: &mut Core) {
        if core.playback == PlaybackState::Paused {
            return;
        }
        if let Some(session) = &core.session {
            if let Err(e) = session.pause() {
                warn!(error = %e, "backend pause failed");
            }
        }
        self.set_state(core, PlaybackState::Paused);
        self.silence_output(core);
        self.reset_schedule(core);
    }

    fn stop_locked(&self, core: &mut Core) {
        if let Some(session) = core.session.take() {
            if let Err(e) = session.stop() {
                debug!(error = %e, "backend stop failed");
            }
        }
        self.set_state(core, PlaybackState::Stopped);
        self.silence_output(core);
        self.reset_schedule(core);
        core.pending = None;
        core.generation += 1;
        // The next connection gets its first push through immediately
        self.push_throttle.reset();
    }

    fn connection_lost(&self, core: &mut Core) {
        core.connection_error = true;
        self.stop_locked(core);
        self.hub.error(CONNECTION_ERROR_MESSAGE);
    }

    fn push_rejected(&self, generation: u64, error: &BackendError) {
        let mut core = self.lock();
        if core.generation != generation {
            return;
        }
        warn!(error = %error, "prompt push rejected");
        self.hub.error(error.to_string());
        self.pause_locked(&mut core);
    }

    fn pending_connection(self: &Arc<Self>) -> (u64, PendingConnection) {
        let mut core = self.lock();
        if let Some(pending) = &core.pending {
            return (core.generation, pending.clone());
        }

        let generation = core.generation;
        let observer: Arc<dyn SessionObserver> = Arc::new(SessionEvents {
            inner: Arc::downgrade(self),
            generation,
        });
        let backend = Arc::clone(&self.backend);
        let model = self.config.model.clone();
        let pending = async move { backend.connect(&model, observer).await }
            .boxed()
            .shared();

        info!(generation, "opening backend connection");
        // Rejections are per connection
        core.filtered.clear();
        core.pending = Some(pending.clone());
        (generation, pending)
    }

    async fn acquire(self: &Arc<Self>) -> Result<(u64, SessionHandle), BackendError> {
        let (generation, pending) = self.pending_connection();
        let result = pending.await;

        let mut core = self.lock();
        let current = core.generation == generation;
        match result {
            Ok(session) if current => {
                core.session = Some(Arc::clone(&session));
                Ok((generation, session))
            }
            // Torn down while connecting; dropping the handle closes it
            Ok(_) => Err(BackendError::Closed),
            Err(e) => {
                if current {
                    warn!(error = %e, "backend connection failed");
                    self.connection_lost(&mut core);
                }
                Err(e)
            }
        }
    }

    fn handle_server_event(self: &Arc<Self>, generation: u64, event: ServerEvent) {
        let mut core = self.lock();
        if core.generation != generation {
            debug!(generation, "event from retired connection ignored");
            return;
        }

        match event {
            ServerEvent::SetupComplete => core.connection_error = false,
            ServerEvent::FilteredPrompt(prompt) => {
                info!(text = %prompt.text, reason = %prompt.reason, "prompt filtered");
                core.filtered.insert(prompt.text.clone());
                self.hub.publish(Notification::PromptFiltered { prompt });
            }
            ServerEvent::AudioChunks(chunks) => self.schedule_chunks(&mut core, &chunks),
            ServerEvent::Warning(message) => warn!(%message, "backend warning"),
            ServerEvent::Error(message) => {
                warn!(%message, "backend connection error");
                self.connection_lost(&mut core);
            }
            ServerEvent::Closed(reason) => {
                warn!(reason = ?reason, "backend connection closed");
                self.connection_lost(&mut core);
            }
        }
    }

    fn schedule_chunks(self: &Arc<Self>, core: &mut Core, chunks: &[AudioChunk]) {
        for chunk in chunks {
            if !core.playback.accepts_audio() {
                debug!(state = %core.playback, "audio ignored");
                return;
            }

            let buffer = match codec::decode_chunk(
                &chunk.data,
                self.config.sample_rate,
                self.config.channels,
            ) {
                Ok(buffer) => Arc::new(buffer),
                Err(e) => {
                    debug!(error = %e, "dropping chunk");
                    continue;
                }
            };

            let now = self.device.current_time();
            let start = match core.next_start_time {
                Some(start) => start,
                None => {
                    self.arm_flip_timer(core);
                    now + self.config.buffer_time.as_secs_f64()
                }
            };

            if start < now {
                warn!(behind = now - start, "playback underrun, rebuffering");
                self.set_state(core, PlaybackState::Loading);
                self.reset_schedule(core);
                continue;
            }

            let duration = buffer.duration();
            if let Err(e) = self.device.start_at(buffer, &core.output, start) {
                warn!(error = %e, "output device refused chunk");
                continue;
            }
            core.next_start_time = Some(start + duration);
        }
    }

    fn arm_flip_timer(self: &Arc<Self>, core: &mut Core) {
        core.epoch += 1;
        if let Some(timer) = core.flip_timer.take() {
            timer.abort();
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("no async runtime, cannot arm playback timer");
            return;
        };

        let epoch = core.epoch;
        let delay = self.config.buffer_time;
        let weak = Arc::downgrade(self);
        core.flip_timer = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.finish_buffering(epoch);
            }
        }));
    }

    fn finish_buffering(&self, epoch: u64) {
        let mut core = self.lock();
        if core.epoch != epoch || core.playback != PlaybackState::Loading {
            return;
        }
        core.flip_timer = None;
        self.set_state(&mut core, PlaybackState::Playing);
    }
}

/// Routes backend events to the coordinator for one connection generation.
struct SessionEvents {
    inner: Weak<Inner>,
    generation: u64,
}

impl SessionObserver for SessionEvents {
    fn on_event(&self, event: ServerEvent) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_server_event(self.generation, event);
        }
    }
}
