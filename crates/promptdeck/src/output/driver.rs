//! Wall-clock sink for the output timeline.
//!
//! Pulls blocks from a [`Timeline`] at real-time pace on a dedicated thread,
//! for hosts without a hardware sink and for capturing sessions to WAV.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::{debug, error, info};

use super::{OutputDevice, Timeline};

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Frames pulled per iteration
    pub block_frames: u32,
    /// Write everything rendered while the timeline runs to this WAV file
    pub record_path: Option<PathBuf>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            block_frames: 480,
            record_path: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct DriverStats {
    pub blocks: AtomicU64,
    pub frames_recorded: AtomicU64,
}

pub struct RealtimeDriver {
    running: Arc<AtomicBool>,
    stats: Arc<DriverStats>,
    thread_handle: Option<JoinHandle<Result<()>>>,
}

impl RealtimeDriver {
    pub fn spawn(timeline: Arc<Timeline>, config: DriverConfig) -> Result<Self> {
        let writer = match &config.record_path {
            Some(path) => {
                let spec = WavSpec {
                    channels: timeline.channels(),
                    sample_rate: timeline.sample_rate(),
                    bits_per_sample: 32,
                    sample_format: SampleFormat::Float,
                };
                let writer = WavWriter::create(path, spec)
                    .with_context(|| format!("creating recording {}", path.display()))?;
                info!("recording output to {}", path.display());
                Some(writer)
            }
            None => None,
        };

        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(DriverStats::default());

        let running_for_thread = Arc::clone(&running);
        let stats_for_thread = Arc::clone(&stats);
        let block_frames = config.block_frames.max(1) as usize;

        let thread_handle = thread::Builder::new()
            .name("promptdeck-driver".to_string())
            .spawn(move || {
                let result = run_driver_loop(
                    timeline,
                    block_frames,
                    writer,
                    running_for_thread,
                    stats_for_thread,
                );
                if let Err(e) = &result {
                    error!("output driver failed: {:#}", e);
                }
                result
            })
            .context("spawning output driver thread")?;

        Ok(Self {
            running,
            stats,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &Arc<DriverStats> {
        &self.stats
    }

    /// Stop pulling audio and finalize any recording.
    pub fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        match self.thread_handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow::anyhow!("output driver thread panicked"))?,
            None => Ok(()),
        }
    }
}

impl Drop for RealtimeDriver {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("output driver shutdown: {:#}", e);
        }
    }
}

fn run_driver_loop(
    timeline: Arc<Timeline>,
    block_frames: usize,
    mut writer: Option<WavWriter<std::io::BufWriter<std::fs::File>>>,
    running: Arc<AtomicBool>,
    stats: Arc<DriverStats>,
) -> Result<()> {
    let channels = timeline.channels() as usize;
    let rate = timeline.sample_rate() as f64;
    let mut block = vec![0.0f32; block_frames * channels];
    let block_period = Duration::from_secs_f64(block_frames as f64 / rate);

    let started = Instant::now();
    let mut pulled: u64 = 0;

    debug!(block_frames, "output driver started");

    while running.load(Ordering::Acquire) {
        // Catch up on every block wall time says is due
        let due = (started.elapsed().as_secs_f64() * rate) as u64;
        while pulled + block_frames as u64 <= due {
            let advanced = timeline.render(&mut block);
            pulled += block_frames as u64;
            stats.blocks.fetch_add(1, Ordering::Relaxed);

            if advanced {
                if let Some(w) = writer.as_mut() {
                    for sample in &block {
                        w.write_sample(*sample)?;
                    }
                    stats
                        .frames_recorded
                        .fetch_add(block_frames as u64, Ordering::Relaxed);
                }
            }
        }

        thread::sleep(block_period / 2);
    }

    if let Some(w) = writer {
        w.finalize().context("finalizing recording")?;
    }

    debug!("output driver stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::AudioBuffer;

    #[test]
    fn test_driver_advances_running_timeline() {
        let timeline = Arc::new(Timeline::new(48000, 2));
        timeline.resume().unwrap();

        let mut driver = RealtimeDriver::spawn(Arc::clone(&timeline), DriverConfig::default()).unwrap();
        thread::sleep(Duration::from_millis(100));
        driver.stop().unwrap();

        assert!(timeline.current_time() > 0.0);
        assert!(driver.stats().blocks.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn test_driver_records_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");

        let timeline = Arc::new(Timeline::new(48000, 2));
        timeline.resume().unwrap();
        let gain = timeline.create_gain();
        timeline.connect(&gain);
        timeline
            .start_at(Arc::new(AudioBuffer::silent(48000, 2, 4800)), &gain, 0.0)
            .unwrap();

        let mut driver = RealtimeDriver::spawn(
            Arc::clone(&timeline),
            DriverConfig {
                block_frames: 480,
                record_path: Some(path.clone()),
            },
        )
        .unwrap();
        thread::sleep(Duration::from_millis(100));
        driver.stop().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 48000);
        assert!(reader.len() > 0);
        assert_eq!(reader.len() % 960, 0);
    }

    #[test]
    fn test_suspended_timeline_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silent.wav");
        let timeline = Arc::new(Timeline::new(48000, 2));

        let mut driver = RealtimeDriver::spawn(
            Arc::clone(&timeline),
            DriverConfig {
                block_frames: 480,
                record_path: Some(path.clone()),
            },
        )
        .unwrap();
        thread::sleep(Duration::from_millis(50));
        driver.stop().unwrap();

        assert_eq!(timeline.current_time(), 0.0);
        assert_eq!(hound::WavReader::open(&path).unwrap().len(), 0);
    }
}
