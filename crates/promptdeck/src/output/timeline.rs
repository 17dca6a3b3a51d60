//! Software output timeline.
//!
//! Holds one-shot sources at absolute frame positions and mixes them through
//! their gain nodes when a sink pulls a block.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use portable_atomic::AtomicF32;
use tracing::{debug, info};

use super::{GainNode, OutputDevice, OutputError};
use crate::codec::AudioBuffer;

/// Frames rendered per internal block by [`Timeline::advance`].
const ADVANCE_BLOCK_FRAMES: usize = 4800;

struct ScheduledSource {
    buffer: Arc<AudioBuffer>,
    gain: Arc<GainNode>,
    start_frame: u64,
}

impl ScheduledSource {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.buffer.frames() as u64
    }
}

/// Counters updated on every render.
#[derive(Debug, Default)]
pub struct TimelineStats {
    pub sources_scheduled: AtomicU64,
    pub sources_finished: AtomicU64,
    pub blocks_rendered: AtomicU64,
}

pub struct Timeline {
    sample_rate: u32,
    channels: u16,
    running: AtomicBool,
    frames_rendered: AtomicU64,
    sources: Mutex<Vec<ScheduledSource>>,
    /// Peak absolute sample value of the last rendered block
    level: AtomicF32,
    stats: TimelineStats,
}

impl Timeline {
    /// Create a suspended timeline.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            running: AtomicBool::new(false),
            frames_rendered: AtomicU64::new(0),
            sources: Mutex::new(Vec::new()),
            level: AtomicF32::new(0.0),
            stats: TimelineStats::default(),
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Acquire)
    }

    pub fn level(&self) -> f32 {
        self.level.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> &TimelineStats {
        &self.stats
    }

    /// Sources that have not finished playing.
    pub fn pending_sources(&self) -> usize {
        self.sources.lock().expect("timeline sources mutex poisoned").len()
    }

    /// Fill `out` (interleaved, `channels` wide) with the next block.
    ///
    /// Returns false and writes silence while suspended; the clock does not
    /// move in that case.
    pub fn render(&self, out: &mut [f32]) -> bool {
        out.fill(0.0);
        if !self.running.load(Ordering::Acquire) {
            self.level.store(0.0, Ordering::Relaxed);
            return false;
        }

        let channels = self.channels as usize;
        let frames = (out.len() / channels) as u64;
        let base = self.frames_rendered.load(Ordering::Acquire);
        let end = base + frames;
        let rate = self.sample_rate as f64;

        let mut sources = self.sources.lock().expect("timeline sources mutex poisoned");

        for source in sources.iter() {
            if source.end_frame() <= base || source.start_frame >= end {
                continue;
            }
            if !source.gain.is_connected() {
                continue;
            }

            let src_channels = source.buffer.channel_count().max(1);
            let from = source.start_frame.max(base);
            let to = source.end_frame().min(end);

            source.gain.with_automation(|automation| {
                for frame in from..to {
                    let g = automation.value_at(frame as f64 / rate);
                    let offset = (frame - source.start_frame) as usize;
                    let slot = (frame - base) as usize * channels;
                    for ch in 0..channels {
                        out[slot + ch] += source.buffer.sample(ch % src_channels, offset) * g;
                    }
                }
            });
        }

        let before = sources.len();
        sources.retain(|s| s.end_frame() > end);
        let finished = before - sources.len();
        drop(sources);

        let peak = out.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        self.level.store(peak, Ordering::Relaxed);
        self.frames_rendered.store(end, Ordering::Release);
        self.stats.blocks_rendered.fetch_add(1, Ordering::Relaxed);
        self.stats
            .sources_finished
            .fetch_add(finished as u64, Ordering::Relaxed);
        true
    }

    /// Render and discard `seconds` of audio.
    pub fn advance(&self, seconds: f64) {
        let mut remaining = (seconds * self.sample_rate as f64).round() as usize;
        let mut scratch = vec![0.0f32; ADVANCE_BLOCK_FRAMES * self.channels as usize];
        while remaining > 0 {
            let frames = remaining.min(ADVANCE_BLOCK_FRAMES);
            if !self.render(&mut scratch[..frames * self.channels as usize]) {
                break;
            }
            remaining -= frames;
        }
    }
}

impl OutputDevice for Timeline {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.frames_rendered() as f64 / self.sample_rate as f64
    }

    fn resume(&self) -> Result<(), OutputError> {
        if !self.running.swap(true, Ordering::AcqRel) {
            info!("output timeline resumed at {:.3}s", self.current_time());
        }
        Ok(())
    }

    fn suspend(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("output timeline suspended at {:.3}s", self.current_time());
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn start_at(
        &self,
        buffer: Arc<AudioBuffer>,
        gain: &Arc<GainNode>,
        when: f64,
    ) -> Result<(), OutputError> {
        if buffer.channel_count() > self.channels as usize {
            return Err(OutputError::ChannelMismatch {
                got: buffer.channel_count(),
                max: self.channels as usize,
            });
        }

        let now = self.frames_rendered();
        let requested = (when.max(0.0) * self.sample_rate as f64).round() as u64;
        let start_frame = requested.max(now);

        debug!(
            start = start_frame as f64 / self.sample_rate as f64,
            frames = buffer.frames(),
            "source scheduled"
        );

        self.sources
            .lock()
            .expect("timeline sources mutex poisoned")
            .push(ScheduledSource {
                buffer,
                gain: Arc::clone(gain),
                start_frame,
            });
        self.stats.sources_scheduled.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
