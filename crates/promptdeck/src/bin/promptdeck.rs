//! promptdeck - play a prompt-steered music stream from the terminal
//!
//! Audio goes to PipeWire when built with the `pipewire` feature, otherwise
//! the wall-clock driver renders it (optionally into a WAV file). MIDI
//! controllers move prompt weights; stdin takes transport commands.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use deckconf::DeckConfig;
use promptdeck::output::{DriverConfig, RealtimeDriver};
use promptdeck::{
    Coordinator, CoordinatorConfig, LyriaBackend, MidiDispatcher, Notification, OutputDevice,
    PromptBoard, PushOutcome, Timeline,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "promptdeck")]
#[command(about = "Realtime generated music steered by weighted prompts")]
#[command(version)]
struct Cli {
    /// Config file replacing ./promptdeck.toml
    #[arg(short, long, env = "PROMPTDECK_CONFIG")]
    config: Option<PathBuf>,

    /// Generation model id
    #[arg(long)]
    model: Option<String>,

    /// MIDI input to listen to
    #[arg(long)]
    midi_device: Option<String>,

    /// List MIDI inputs and exit
    #[arg(long)]
    list_midi: bool,

    /// Record the rendered output to a WAV file
    #[arg(long)]
    record: Option<PathBuf>,
}

const HELP: &str = "\
commands:
  play | pause | stop | toggle
  prompts                 list prompts and weights
  weight <id|index> <w>   set a prompt weight (0.0 - 2.0)
  midi <device-id>        select the MIDI input
  reset                   reset the generator's musical context
  quit";

enum Sink {
    Driver(RealtimeDriver),
    #[cfg(feature = "pipewire")]
    PipeWire(promptdeck::output::pipewire_output::PipeWireSink),
}

impl Sink {
    fn start(timeline: &Arc<Timeline>, config: &DeckConfig, record: Option<PathBuf>) -> Result<Self> {
        #[cfg(feature = "pipewire")]
        if record.is_none() {
            use promptdeck::output::pipewire_output::{PipeWireOutputConfig, PipeWireSink};
            let sink = PipeWireSink::start(Arc::clone(timeline), PipeWireOutputConfig::default())?;
            return Ok(Sink::PipeWire(sink));
        }

        let driver = RealtimeDriver::spawn(
            Arc::clone(timeline),
            DriverConfig {
                block_frames: config.infra.audio.block_frames,
                record_path: record,
            },
        )?;
        Ok(Sink::Driver(driver))
    }

    fn stop(self) -> Result<()> {
        match self {
            Sink::Driver(mut driver) => driver.stop(),
            #[cfg(feature = "pipewire")]
            Sink::PipeWire(mut sink) => {
                sink.stop();
                Ok(())
            }
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) =
        DeckConfig::load_with_sources_from(cli.config.as_deref()).context("loading configuration")?;
    init_tracing(&config.infra.telemetry.log_level);

    for path in &sources.files {
        info!("loaded config {}", path.display());
    }
    for key in &sources.env_overrides {
        info!("override from {}", key);
    }

    if let Some(model) = cli.model {
        config.infra.backend.model = model;
    }
    if let Some(device) = cli.midi_device {
        config.bootstrap.midi.device = Some(device);
    }

    let midi = Arc::new(MidiDispatcher::new());
    if cli.list_midi {
        return list_midi(&midi);
    }

    let api_key = config.api_key().with_context(|| {
        format!("set {} to your API key", config.infra.backend.api_key_env)
    })?;

    let timeline = Arc::new(Timeline::new(
        config.infra.audio.sample_rate,
        config.infra.audio.channels,
    ));
    let sink = Sink::start(&timeline, &config, cli.record)?;

    let backend = Arc::new(LyriaBackend::new(config.infra.backend.endpoint.clone(), api_key));
    let device: Arc<dyn OutputDevice> = timeline.clone();
    let coordinator = Coordinator::new(CoordinatorConfig::from(&config), backend, device);

    let board = Arc::new(Mutex::new(PromptBoard::from_seeds(&config.bootstrap.prompts)));
    let seeded = board.lock().expect("prompt board mutex poisoned").snapshot();
    coordinator.push_prompts(seeded).await;

    tokio::spawn(log_notifications(coordinator.clone()));

    if let Some(device) = &config.bootstrap.midi.device {
        midi.set_active_device(device)?;
    }
    match midi.request_access() {
        Ok(ids) => {
            info!("MIDI inputs: {:?}", ids);
            tokio::spawn(forward_midi(Arc::clone(&midi), Arc::clone(&board), coordinator.clone()));
        }
        Err(e) => warn!("MIDI disabled: {}", e),
    }

    println!("{}", HELP);
    run_commands(&coordinator, &board, &midi).await?;

    info!("shutting down");
    coordinator.stop();
    sink.stop()
}

fn list_midi(midi: &MidiDispatcher) -> Result<()> {
    let ids = midi.request_access()?;
    if ids.is_empty() {
        println!("no MIDI inputs");
    }
    for id in ids {
        let name = midi.device_name(&id).unwrap_or_default();
        println!("{}\t{}", id, name);
    }
    Ok(())
}

async fn log_notifications(coordinator: Coordinator) {
    let mut rx = coordinator.subscribe();
    loop {
        match rx.recv().await {
            Ok(Notification::PlaybackStateChanged { state }) => info!("playback: {}", state),
            Ok(Notification::PromptFiltered { prompt }) => {
                warn!("prompt filtered: {} ({})", prompt.text, prompt.reason)
            }
            Ok(Notification::Error { message }) => error!("{}", message),
            Err(RecvError::Lagged(n)) => warn!("dropped {} notifications", n),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn forward_midi(
    midi: Arc<MidiDispatcher>,
    board: Arc<Mutex<PromptBoard>>,
    coordinator: Coordinator,
) {
    let mut rx = midi.subscribe();
    loop {
        let change = match rx.recv().await {
            Ok(change) => change,
            Err(RecvError::Lagged(n)) => {
                warn!("dropped {} MIDI events", n);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let snapshot = {
            let mut board = board.lock().expect("prompt board mutex poisoned");
            if board.apply_control_change(&change).is_empty() {
                continue;
            }
            board.snapshot()
        };
        coordinator.push_prompts(snapshot).await;
    }
}

async fn run_commands(
    coordinator: &Coordinator,
    board: &Mutex<PromptBoard>,
    midi: &MidiDispatcher,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(line) = line else { break };

        let mut words = line.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (None, _, _) => {}
            (Some("play"), _, _) => coordinator.play().await,
            (Some("pause"), _, _) => coordinator.pause(),
            (Some("stop"), _, _) => coordinator.stop(),
            (Some("toggle"), _, _) => coordinator.play_pause().await,
            (Some("prompts"), _, _) => print_prompts(coordinator, board),
            (Some("weight"), Some(key), Some(weight)) => {
                let Ok(weight) = weight.parse::<f32>() else {
                    println!("not a number: {}", weight);
                    continue;
                };
                let snapshot = {
                    let mut board = board.lock().expect("prompt board mutex poisoned");
                    let Some(id) = board.resolve(key).map(|p| p.prompt_id.clone()) else {
                        println!("no prompt {}", key);
                        continue;
                    };
                    board.set_weight(&id, weight);
                    board.snapshot()
                };
                match coordinator.push_prompts(snapshot).await {
                    PushOutcome::Sent { count } => println!("sent {} prompt(s)", count),
                    outcome => println!("{:?}", outcome),
                }
            }
            (Some("midi"), Some(id), _) => match midi.set_active_device(id) {
                Ok(()) => println!(
                    "listening to {}",
                    midi.device_name(id).unwrap_or_else(|| id.to_string())
                ),
                Err(e) => println!("{}", e),
            },
            (Some("reset"), _, _) => {
                if let Err(e) = coordinator.reset_context() {
                    println!("{}", e);
                }
            }
            (Some("quit" | "exit"), _, _) => break,
            _ => println!("{}", HELP),
        }
    }

    Ok(())
}

fn print_prompts(coordinator: &Coordinator, board: &Mutex<PromptBoard>) {
    let filtered = coordinator.filtered_texts();
    let board = board.lock().expect("prompt board mutex poisoned");
    for (index, prompt) in board.iter().enumerate() {
        let mark = if filtered.contains(&prompt.text) { " (filtered)" } else { "" };
        println!(
            "{:>2}  {:<10} cc{:<3} {:.2}  {}{}",
            index, prompt.prompt_id, prompt.cc, prompt.weight, prompt.text, mark
        );
    }
    println!("state: {}", coordinator.playback_state());
}
