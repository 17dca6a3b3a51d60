//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};

/// Output timeline and scheduling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate of generated audio and the output timeline.
    /// Default: 48000
    #[serde(default = "AudioConfig::default_sample_rate")]
    pub sample_rate: u32,

    /// Interleaved channel count of generated audio.
    /// Default: 2
    #[serde(default = "AudioConfig::default_channels")]
    pub channels: u16,

    /// Lead time between the first scheduled chunk and audible output.
    /// Default: 2.0
    #[serde(default = "AudioConfig::default_buffer_seconds")]
    pub buffer_seconds: f64,

    /// Duration of the gain ramp used for fade in and fade out.
    /// Default: 0.1
    #[serde(default = "AudioConfig::default_fade_seconds")]
    pub fade_seconds: f64,

    /// Frames rendered per block by the realtime driver.
    /// Default: 480 (10ms at 48kHz)
    #[serde(default = "AudioConfig::default_block_frames")]
    pub block_frames: u32,
}

impl AudioConfig {
    fn default_sample_rate() -> u32 {
        48000
    }

    fn default_channels() -> u16 {
        2
    }

    fn default_buffer_seconds() -> f64 {
        2.0
    }

    fn default_fade_seconds() -> f64 {
        0.1
    }

    fn default_block_frames() -> u32 {
        480
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: Self::default_sample_rate(),
            channels: Self::default_channels(),
            buffer_seconds: Self::default_buffer_seconds(),
            fade_seconds: Self::default_fade_seconds(),
            block_frames: Self::default_block_frames(),
        }
    }
}

/// Generation backend connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// WebSocket endpoint of the realtime music service.
    #[serde(default = "BackendConfig::default_endpoint")]
    pub endpoint: String,

    /// Model identifier sent in the setup message.
    /// Default: lyria-realtime-exp
    #[serde(default = "BackendConfig::default_model")]
    pub model: String,

    /// Name of the environment variable holding the API key.
    /// Default: GEMINI_API_KEY
    #[serde(default = "BackendConfig::default_api_key_env")]
    pub api_key_env: String,

    /// Minimum spacing between prompt pushes, in milliseconds.
    /// Default: 200
    #[serde(default = "BackendConfig::default_push_interval_ms")]
    pub push_interval_ms: u64,
}

impl BackendConfig {
    fn default_endpoint() -> String {
        "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateMusic".to_string()
    }

    fn default_model() -> String {
        "lyria-realtime-exp".to_string()
    }

    fn default_api_key_env() -> String {
        "GEMINI_API_KEY".to_string()
    }

    fn default_push_interval_ms() -> u64 {
        200
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            model: Self::default_model(),
            api_key_env: Self::default_api_key_env(),
            push_interval_ms: Self::default_push_interval_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level or EnvFilter directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// All infrastructure configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InfraConfig {
    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
