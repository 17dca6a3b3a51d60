//! PipeWire sink for the output timeline.
//!
//! The stream runs PipeWire's main loop on its own thread. Every process
//! callback pulls the requested number of frames straight out of the
//! [`Timeline`], so the timeline clock follows the hardware clock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use super::{OutputDevice, Timeline};

/// Configuration for the PipeWire output stream
#[derive(Debug, Clone)]
pub struct PipeWireOutputConfig {
    pub name: String,
    /// Maximum frames written per callback.
    /// PipeWire typically requests 128-256 frames per callback regardless.
    pub latency_frames: u32,
}

impl Default for PipeWireOutputConfig {
    fn default() -> Self {
        Self {
            name: "promptdeck".to_string(),
            latency_frames: 256,
        }
    }
}

/// Runtime statistics from the PipeWire callback
#[derive(Debug, Default)]
pub struct StreamStats {
    pub callbacks: AtomicU64,
    pub frames_written: AtomicU64,
    /// Callbacks served while the timeline was suspended
    pub silent_callbacks: AtomicU64,
}

/// Handle to a running PipeWire output stream. Stops on drop.
pub struct PipeWireSink {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    stats: Arc<StreamStats>,
}

impl PipeWireSink {
    pub fn start(
        timeline: Arc<Timeline>,
        config: PipeWireOutputConfig,
    ) -> Result<Self, PipeWireOutputError> {
        pipewire::init();

        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(StreamStats::default());

        let running_for_thread = Arc::clone(&running);
        let stats_for_thread = Arc::clone(&stats);
        let name = config.name.clone();

        let thread_handle = thread::Builder::new()
            .name("pipewire-output".to_string())
            .spawn(move || {
                if let Err(e) =
                    run_pipewire_loop(config, timeline, running_for_thread, stats_for_thread)
                {
                    error!("PipeWire output thread failed: {}", e);
                }
            })
            .map_err(|e| PipeWireOutputError::ThreadSpawn(e.to_string()))?;

        info!("PipeWire output stream started: {}", name);

        Ok(Self {
            running,
            thread_handle: Some(thread_handle),
            stats,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &Arc<StreamStats> {
        &self.stats
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            debug!("Waiting for PipeWire thread to stop...");
            let _ = handle.join();
            info!("PipeWire output stream stopped");
        }
    }
}

impl Drop for PipeWireSink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_pipewire_loop(
    config: PipeWireOutputConfig,
    timeline: Arc<Timeline>,
    running: Arc<AtomicBool>,
    stats: Arc<StreamStats>,
) -> Result<(), PipeWireOutputError> {
    use pipewire as pw;
    use pw::spa::pod::Pod;
    use pw::{properties::properties, spa};

    let sample_rate = timeline.sample_rate();
    let channels = timeline.channels() as usize;

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| PipeWireOutputError::Init(format!("Failed to create main loop: {}", e)))?;

    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| PipeWireOutputError::Init(format!("Failed to create context: {}", e)))?;

    let core = context
        .connect_rc(None)
        .map_err(|e| PipeWireOutputError::Init(format!("Failed to connect to PipeWire: {}", e)))?;

    let mut props = properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_ROLE => "Music",
        *pw::keys::MEDIA_CATEGORY => "Playback",
        *pw::keys::AUDIO_CHANNELS => channels.to_string(),
    };
    let latency = format!("{}/{}", config.latency_frames, sample_rate);
    props.insert("node.latency", latency.as_str());

    let stream = pw::stream::StreamBox::new(&core, &config.name, props)
        .map_err(|e| PipeWireOutputError::Init(format!("Failed to create stream: {}", e)))?;

    let sample_size = std::mem::size_of::<f32>();
    let stride = sample_size * channels;
    let target_frames = config.latency_frames as usize;

    // Allocated once, reused by every callback
    let block = vec![0.0f32; 8192 * channels];

    let _listener = stream
        .add_local_listener_with_user_data((timeline, Arc::clone(&stats), block))
        .process(move |stream, (timeline, stats, ref mut block)| {
            stats.callbacks.fetch_add(1, Ordering::Relaxed);

            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let requested = buffer.requested() as usize;
            let datas = buffer.datas_mut();
            let Some(data) = datas.first_mut() else {
                return;
            };
            let Some(slice) = data.data() else {
                return;
            };

            let max_frames = (slice.len() / stride).min(block.len() / channels);
            let n_frames = if requested > 0 {
                target_frames.min(requested).min(max_frames)
            } else {
                target_frames.min(max_frames)
            };

            let samples = &mut block[..n_frames * channels];
            if !timeline.render(samples) {
                stats.silent_callbacks.fetch_add(1, Ordering::Relaxed);
            }

            for (i, sample) in samples.iter().enumerate() {
                let start = i * sample_size;
                slice[start..start + sample_size].copy_from_slice(&sample.to_le_bytes());
            }
            stats
                .frames_written
                .fetch_add(n_frames as u64, Ordering::Relaxed);

            let chunk = data.chunk_mut();
            *chunk.offset_mut() = 0;
            *chunk.stride_mut() = stride as i32;
            *chunk.size_mut() = (stride * n_frames) as u32;
        })
        .register()
        .map_err(|e| PipeWireOutputError::Init(format!("Failed to register listener: {}", e)))?;

    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::F32LE);
    audio_info.set_rate(sample_rate);
    audio_info.set_channels(channels as u32);

    let mut position = [0u32; spa::param::audio::MAX_CHANNELS];
    if channels >= 1 {
        position[0] = pipewire::spa::sys::SPA_AUDIO_CHANNEL_FL;
    }
    if channels >= 2 {
        position[1] = pipewire::spa::sys::SPA_AUDIO_CHANNEL_FR;
    }
    audio_info.set_position(position);

    let values: Vec<u8> = pw::spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &pw::spa::pod::Value::Object(pw::spa::pod::Object {
            type_: pipewire::spa::sys::SPA_TYPE_OBJECT_Format,
            id: pipewire::spa::sys::SPA_PARAM_EnumFormat,
            properties: audio_info.into(),
        }),
    )
    .map_err(|e| PipeWireOutputError::Init(format!("Failed to serialize format: {}", e)))?
    .0
    .into_inner();

    let mut params = [Pod::from_bytes(&values)
        .ok_or_else(|| PipeWireOutputError::Init("Failed to create Pod from bytes".to_string()))?];

    stream
        .connect(
            spa::utils::Direction::Output,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| PipeWireOutputError::Init(format!("Failed to connect stream: {}", e)))?;

    info!("PipeWire stream connected, entering main loop");

    let mainloop_weak = mainloop.downgrade();
    let timer = mainloop.loop_().add_timer(move |_| {
        if !running.load(Ordering::Acquire) {
            if let Some(ml) = mainloop_weak.upgrade() {
                ml.quit();
            }
        }
    });

    timer
        .update_timer(
            Some(std::time::Duration::from_millis(100)),
            Some(std::time::Duration::from_millis(100)),
        )
        .into_result()
        .map_err(|e| PipeWireOutputError::Init(format!("Failed to set timer: {}", e)))?;

    mainloop.run();

    info!("PipeWire main loop exited");
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum PipeWireOutputError {
    #[error("Failed to initialize PipeWire: {0}")]
    Init(String),

    #[error("Failed to spawn PipeWire thread: {0}")]
    ThreadSpawn(String),
}
