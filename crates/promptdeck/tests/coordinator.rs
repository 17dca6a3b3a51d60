//! Coordinator behaviour against a scripted backend and the software timeline.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use promptdeck::backend::{BackendError, MusicBackend, MusicSession, ServerEvent, SessionObserver};
use promptdeck::codec;
use promptdeck::events::{CONNECTION_ERROR_MESSAGE, NO_ACTIVE_PROMPTS_MESSAGE};
use promptdeck::{
    AudioChunk, Coordinator, CoordinatorConfig, FilteredPrompt, Notification, OutputDevice,
    PlaybackState, Prompt, PushOutcome, Timeline, WeightedPrompt,
};
use tokio::sync::broadcast;
use tokio_test::{assert_ok, assert_pending};

#[derive(Default)]
struct FakeSession {
    controls: Mutex<Vec<&'static str>>,
    pushes: Mutex<Vec<Vec<WeightedPrompt>>>,
    reject_prompts: AtomicBool,
    push_delay_ms: AtomicU64,
}

impl FakeSession {
    fn controls(&self) -> Vec<&'static str> {
        self.controls.lock().unwrap().clone()
    }

    fn pushes(&self) -> Vec<Vec<WeightedPrompt>> {
        self.pushes.lock().unwrap().clone()
    }

    fn record(&self, control: &'static str) -> Result<(), BackendError> {
        self.controls.lock().unwrap().push(control);
        Ok(())
    }
}

#[async_trait]
impl MusicSession for FakeSession {
    async fn set_weighted_prompts(&self, prompts: &[WeightedPrompt]) -> Result<(), BackendError> {
        let delay = self.push_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.reject_prompts.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("prompt blocked".to_string()));
        }
        self.pushes.lock().unwrap().push(prompts.to_vec());
        Ok(())
    }

    fn play(&self) -> Result<(), BackendError> {
        self.record("play")
    }

    fn pause(&self) -> Result<(), BackendError> {
        self.record("pause")
    }

    fn stop(&self) -> Result<(), BackendError> {
        self.record("stop")
    }

    fn reset_context(&self) -> Result<(), BackendError> {
        self.record("reset")
    }
}

#[derive(Default)]
struct FakeBackend {
    connects: AtomicUsize,
    fail: AtomicBool,
    delay: Duration,
    session: Arc<FakeSession>,
    observers: Mutex<Vec<Arc<dyn SessionObserver>>>,
}

impl FakeBackend {
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Deliver an event through the most recent connection.
    fn emit(&self, event: ServerEvent) {
        let latest = self.observers.lock().unwrap().len() - 1;
        self.emit_on(latest, event);
    }

    fn emit_on(&self, connection: usize, event: ServerEvent) {
        let observer = Arc::clone(&self.observers.lock().unwrap()[connection]);
        observer.on_event(event);
    }
}

#[async_trait]
impl MusicBackend for FakeBackend {
    async fn connect(
        &self,
        _model: &str,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Arc<dyn MusicSession>, BackendError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Connect("refused".to_string()));
        }
        observer.on_event(ServerEvent::SetupComplete);
        self.observers.lock().unwrap().push(observer);
        let session: Arc<dyn MusicSession> = self.session.clone();
        Ok(session)
    }
}

struct Deck {
    coordinator: Coordinator,
    backend: Arc<FakeBackend>,
    timeline: Arc<Timeline>,
    notifications: broadcast::Receiver<Notification>,
}

impl Deck {
    fn new() -> Self {
        Self::with_backend(FakeBackend::default())
    }

    fn with_backend(backend: FakeBackend) -> Self {
        let backend = Arc::new(backend);
        let timeline = Arc::new(Timeline::new(48000, 2));
        let coordinator = Coordinator::new(
            CoordinatorConfig::default(),
            backend.clone(),
            timeline.clone(),
        );
        let notifications = coordinator.subscribe();
        Self {
            coordinator,
            backend,
            timeline,
            notifications,
        }
    }

    fn drain(&mut self) -> Vec<Notification> {
        let mut seen = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            seen.push(n);
        }
        seen
    }

    fn errors(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Error { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    fn state(&self) -> PlaybackState {
        self.coordinator.playback_state()
    }

    async fn start(&self) {
        self.coordinator.push_prompts(board()).await;
        self.coordinator.play().await;
    }
}

fn board() -> Vec<Prompt> {
    vec![
        Prompt::new("prompt-0", "Bossa Nova", 1.0, 0),
        Prompt::new("prompt-1", "Chillwave", 0.5, 1),
        Prompt::new("prompt-2", "Drum and Bass", 0.0, 2),
    ]
}

/// Stereo PCM16 chunk of the given length at 48kHz.
fn chunk(seconds: f64) -> AudioChunk {
    let frames = (seconds * 48000.0).round() as usize;
    let samples = vec![0.25f32; frames * 2];
    AudioChunk::new(codec::text_from_bytes(&codec::pcm16_from_float(&samples)))
}

fn assert_close(actual: Option<f64>, expected: f64) {
    let actual = actual.expect("cursor is set");
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_no_active_prompts_pauses_without_connecting() {
    let mut deck = Deck::new();
    let silent = vec![Prompt::new("prompt-0", "Bossa Nova", 0.0, 0)];

    let outcome = deck.coordinator.push_prompts(silent).await;

    assert_eq!(outcome, PushOutcome::NoActivePrompts);
    assert_eq!(deck.state(), PlaybackState::Paused);
    assert_eq!(deck.backend.connects(), 0);
    assert_eq!(deck.errors(), vec![NO_ACTIVE_PROMPTS_MESSAGE.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_push_before_connect_is_deferred() {
    let deck = Deck::new();

    let outcome = deck.coordinator.push_prompts(board()).await;

    assert_eq!(outcome, PushOutcome::Deferred);
    assert_eq!(deck.coordinator.prompts().len(), 3);
    assert_eq!(deck.coordinator.active_prompts().len(), 2);
    assert_eq!(deck.backend.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_play_connects_pushes_snapshot_and_starts() {
    let deck = Deck::new();
    deck.start().await;

    assert_eq!(deck.state(), PlaybackState::Loading);
    assert_eq!(deck.backend.connects(), 1);
    assert!(deck.timeline.is_running());

    let pushes = deck.backend.session.pushes();
    assert_eq!(pushes.len(), 1);
    let texts: Vec<_> = pushes[0].iter().map(|p| p.text.as_str()).collect();
    assert_eq!(texts, vec!["Bossa Nova", "Chillwave"]);
    assert_eq!(deck.backend.session.controls(), vec!["play"]);
}

#[tokio::test(start_paused = true)]
async fn test_first_chunk_buffers_before_playing() {
    let mut deck = Deck::new();
    deck.start().await;

    deck.backend.emit(ServerEvent::AudioChunks(vec![chunk(0.5)]));
    assert_close(deck.coordinator.next_start_time(), 2.5);
    assert_eq!(deck.state(), PlaybackState::Loading);

    tokio::time::sleep(Duration::from_millis(1900)).await;
    assert_eq!(deck.state(), PlaybackState::Loading);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(deck.state(), PlaybackState::Playing);

    let states: Vec<_> = deck
        .drain()
        .into_iter()
        .filter_map(|n| match n {
            Notification::PlaybackStateChanged { state } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec![PlaybackState::Loading, PlaybackState::Playing]);
}

#[tokio::test(start_paused = true)]
async fn test_chunks_are_scheduled_back_to_back() {
    let deck = Deck::new();
    deck.start().await;

    deck.backend.emit(ServerEvent::AudioChunks(vec![
        chunk(0.5),
        chunk(0.25),
        chunk(0.25),
    ]));
    deck.backend.emit(ServerEvent::AudioChunks(vec![chunk(1.0)]));

    assert_close(deck.coordinator.next_start_time(), 2.0 + 2.0);
    assert_eq!(deck.timeline.pending_sources(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_chunk_is_skipped() {
    let deck = Deck::new();
    deck.start().await;

    deck.backend.emit(ServerEvent::AudioChunks(vec![
        AudioChunk::new("not base64!"),
        chunk(0.5),
    ]));

    assert_close(deck.coordinator.next_start_time(), 2.5);
    assert_eq!(deck.timeline.pending_sources(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pause_ignores_incoming_audio() {
    let deck = Deck::new();
    deck.start().await;
    deck.backend.emit(ServerEvent::AudioChunks(vec![chunk(0.5)]));

    deck.coordinator.pause();
    deck.backend.emit(ServerEvent::AudioChunks(vec![chunk(0.5)]));

    assert_eq!(deck.state(), PlaybackState::Paused);
    assert_eq!(deck.coordinator.next_start_time(), None);
    assert_eq!(deck.timeline.pending_sources(), 1);
    assert_eq!(deck.backend.session.controls(), vec!["play", "pause"]);

    // A stale flip must not resurrect playback
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(deck.state(), PlaybackState::Paused);
}

#[tokio::test(start_paused = true)]
async fn test_pause_fades_audible_output() {
    let deck = Deck::new();
    deck.start().await;
    deck.backend.emit(ServerEvent::AudioChunks(vec![chunk(4.0)]));

    deck.timeline.advance(2.5);
    assert!(deck.timeline.level() > 0.2);

    deck.coordinator.pause();
    deck.timeline.advance(0.2);
    assert_eq!(deck.timeline.level(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_underrun_drops_chunk_and_rebuffers() {
    let deck = Deck::new();
    deck.start().await;
    deck.backend.emit(ServerEvent::AudioChunks(vec![chunk(0.1)]));
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(deck.state(), PlaybackState::Playing);

    deck.timeline.advance(3.0);
    deck.backend.emit(ServerEvent::AudioChunks(vec![chunk(0.1)]));

    assert_eq!(deck.state(), PlaybackState::Loading);
    assert_eq!(deck.coordinator.next_start_time(), None);

    deck.backend.emit(ServerEvent::AudioChunks(vec![chunk(0.1)]));
    assert_close(deck.coordinator.next_start_time(), 3.0 + 2.0 + 0.1);

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(deck.state(), PlaybackState::Playing);
    assert_eq!(deck.backend.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_then_play_starts_fresh() {
    let deck = Deck::new();
    deck.start().await;
    deck.backend.emit(ServerEvent::AudioChunks(vec![chunk(0.5)]));

    deck.coordinator.stop();
    assert_eq!(deck.state(), PlaybackState::Stopped);
    assert_eq!(deck.coordinator.next_start_time(), None);
    assert!(!deck.coordinator.is_connected());
    assert_eq!(deck.backend.session.controls(), vec!["play", "stop"]);

    deck.coordinator.play().await;
    assert_eq!(deck.backend.connects(), 2);

    // Late audio from the retired connection is ignored
    deck.backend.emit_on(0, ServerEvent::AudioChunks(vec![chunk(0.5)]));
    assert_eq!(deck.coordinator.next_start_time(), None);

    deck.backend.emit_on(1, ServerEvent::AudioChunks(vec![chunk(0.5)]));
    assert_close(deck.coordinator.next_start_time(), 2.5);
}

#[tokio::test(start_paused = true)]
async fn test_filtered_prompt_is_excluded_from_later_pushes() {
    let mut deck = Deck::new();
    deck.start().await;

    let filtered = FilteredPrompt {
        text: "Bossa Nova".to_string(),
        reason: "blocked".to_string(),
    };
    deck.backend.emit(ServerEvent::FilteredPrompt(filtered.clone()));

    assert!(deck.drain().contains(&Notification::PromptFiltered { prompt: filtered }));
    assert!(deck.coordinator.filtered_texts().contains("Bossa Nova"));

    tokio::time::sleep(Duration::from_millis(250)).await;
    let outcome = deck.coordinator.push_prompts(board()).await;
    assert_eq!(outcome, PushOutcome::Sent { count: 1 });

    let last = deck.backend.session.pushes().pop().unwrap();
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].text, "Chillwave");

    deck.coordinator.stop();
    deck.coordinator.play().await;
    assert!(deck.coordinator.filtered_texts().is_empty());
    assert_eq!(deck.coordinator.active_prompts().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_connection_error_stops_and_notifies() {
    let mut deck = Deck::new();
    deck.start().await;
    deck.drain();

    deck.backend.emit(ServerEvent::Error("socket reset".to_string()));

    assert_eq!(deck.state(), PlaybackState::Stopped);
    assert!(deck.coordinator.connection_error());
    assert_eq!(deck.errors(), vec![CONNECTION_ERROR_MESSAGE.to_string()]);

    deck.coordinator.play().await;
    assert_eq!(deck.backend.connects(), 2);
    assert!(!deck.coordinator.connection_error());
}

#[tokio::test(start_paused = true)]
async fn test_server_close_is_a_connection_error() {
    let deck = Deck::new();
    deck.start().await;

    deck.backend.emit(ServerEvent::Closed(Some("going away".to_string())));

    assert_eq!(deck.state(), PlaybackState::Stopped);
    assert!(deck.coordinator.connection_error());
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_lands_in_stopped() {
    let backend = FakeBackend::default();
    backend.fail.store(true, Ordering::SeqCst);
    let mut deck = Deck::with_backend(backend);

    deck.start().await;

    assert_eq!(deck.state(), PlaybackState::Stopped);
    assert!(deck.coordinator.connection_error());
    assert!(deck.errors().contains(&CONNECTION_ERROR_MESSAGE.to_string()));
    assert!(!deck.timeline.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_connection() {
    let deck = Deck::with_backend(FakeBackend::slow(Duration::from_millis(100)));

    let (a, b) = tokio::join!(
        deck.coordinator.get_or_create_connection(),
        deck.coordinator.get_or_create_connection(),
    );

    assert_ok!(a);
    assert_ok!(b);
    assert_eq!(deck.backend.connects(), 1);
    assert!(deck.coordinator.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_state_is_loading_while_connecting() {
    let deck = Deck::with_backend(FakeBackend::slow(Duration::from_secs(1)));
    deck.coordinator.push_prompts(board()).await;

    let mut play = tokio_test::task::spawn(deck.coordinator.play());
    assert_pending!(play.poll());

    assert_eq!(deck.state(), PlaybackState::Loading);
    assert_eq!(deck.coordinator.next_start_time(), None);
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_connecting_abandons_play() {
    let deck = Deck::with_backend(FakeBackend::slow(Duration::from_millis(100)));
    deck.coordinator.push_prompts(board()).await;

    let stopper = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        deck.coordinator.stop();
    };
    tokio::join!(deck.coordinator.play(), stopper);

    assert_eq!(deck.state(), PlaybackState::Stopped);
    assert!(!deck.coordinator.is_connected());
    assert!(deck.backend.session.controls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rapid_pushes_are_throttled() {
    let deck = Deck::new();
    deck.start().await;
    assert_eq!(deck.backend.session.pushes().len(), 1);

    let outcome = deck.coordinator.push_prompts(board()).await;
    assert_eq!(outcome, PushOutcome::Sent { count: 2 });
    assert_eq!(deck.backend.session.pushes().len(), 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    deck.coordinator.push_prompts(board()).await;
    assert_eq!(deck.backend.session.pushes().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_push_pauses_playback() {
    let mut deck = Deck::new();
    deck.backend.session.reject_prompts.store(true, Ordering::SeqCst);

    deck.start().await;

    assert_eq!(deck.state(), PlaybackState::Paused);
    assert!(!deck.backend.session.controls().contains(&"play"));
    let errors = deck.errors();
    assert!(errors.iter().any(|e| e.contains("prompt blocked")));
}

#[tokio::test(start_paused = true)]
async fn test_play_pause_cycles_through_states() {
    let deck = Deck::new();
    deck.coordinator.push_prompts(board()).await;

    deck.coordinator.play_pause().await;
    assert_eq!(deck.state(), PlaybackState::Loading);

    // Loading toggles to stopped
    deck.coordinator.play_pause().await;
    assert_eq!(deck.state(), PlaybackState::Stopped);

    deck.coordinator.play_pause().await;
    deck.backend.emit(ServerEvent::AudioChunks(vec![chunk(0.5)]));
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(deck.state(), PlaybackState::Playing);

    deck.coordinator.play_pause().await;
    assert_eq!(deck.state(), PlaybackState::Paused);

    deck.coordinator.play_pause().await;
    assert_eq!(deck.state(), PlaybackState::Loading);
    assert_eq!(deck.backend.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reset_context_reaches_session() {
    let deck = Deck::new();
    assert_ok!(deck.coordinator.reset_context());
    deck.start().await;

    assert_ok!(deck.coordinator.reset_context());
    assert_eq!(deck.backend.session.controls(), vec!["play", "reset"]);
}

#[tokio::test(start_paused = true)]
async fn test_play_while_playing_keeps_playing() {
    let deck = Deck::new();
    deck.start().await;
    deck.backend.emit(ServerEvent::AudioChunks(vec![chunk(1.0)]));
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(deck.state(), PlaybackState::Playing);

    deck.timeline.advance(2.5);
    deck.coordinator.play().await;
    assert_eq!(deck.state(), PlaybackState::Playing);

    // No new fade-in on the live output
    deck.timeline.advance(0.1);
    assert!(deck.timeline.level() > 0.2);

    for _ in 0..5 {
        deck.backend.emit(ServerEvent::AudioChunks(vec![chunk(1.0)]));
        deck.timeline.advance(1.0);
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert_eq!(deck.state(), PlaybackState::Playing);
    assert_eq!(deck.backend.session.controls(), vec!["play"]);
    assert_eq!(deck.backend.session.pushes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_play_while_loading_is_ignored() {
    let deck = Deck::new();
    deck.start().await;
    assert_eq!(deck.state(), PlaybackState::Loading);

    deck.coordinator.play().await;

    assert_eq!(deck.state(), PlaybackState::Loading);
    assert_eq!(deck.backend.session.controls(), vec!["play"]);
}

#[tokio::test(start_paused = true)]
async fn test_quick_restart_pushes_prompts_to_new_connection() {
    let deck = Deck::new();
    deck.start().await;
    deck.coordinator.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;

    deck.coordinator.play().await;

    assert_eq!(deck.backend.connects(), 2);
    assert_eq!(deck.backend.session.pushes().len(), 2);
    assert_eq!(deck.backend.session.controls(), vec!["play", "stop", "play"]);
}

#[tokio::test(start_paused = true)]
async fn test_pause_during_prompt_push_wins() {
    let deck = Deck::new();
    deck.backend.session.push_delay_ms.store(100, Ordering::SeqCst);
    deck.coordinator.push_prompts(board()).await;

    let pauser = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(deck.coordinator.is_connected());
        deck.coordinator.pause();
    };
    tokio::join!(deck.coordinator.play(), pauser);

    assert_eq!(deck.state(), PlaybackState::Paused);
    assert!(!deck.backend.session.controls().contains(&"play"));
    assert!(!deck.timeline.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_pause_is_idempotent() {
    let mut deck = Deck::new();
    deck.start().await;
    deck.drain();

    deck.coordinator.pause();
    deck.coordinator.pause();
    tokio::time::sleep(Duration::from_millis(250)).await;
    deck.backend.session.reject_prompts.store(true, Ordering::SeqCst);
    deck.coordinator.push_prompts(board()).await;

    assert_eq!(deck.state(), PlaybackState::Paused);
    assert_eq!(deck.backend.session.controls(), vec!["play", "pause"]);
    let changes = deck
        .drain()
        .into_iter()
        .filter(|n| matches!(n, Notification::PlaybackStateChanged { .. }))
        .count();
    assert_eq!(changes, 1);
}
