//! Configuration loading for promptdeck.
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): audio timeline parameters, the
//!   backend endpoint and logging. Fixed for the life of the process.
//!
//! - **Bootstrap** (`BootstrapConfig`): the initial prompt board and the
//!   preferred MIDI device. After startup the runtime owns these values.
//!
//! # Usage
//!
//! ```rust,no_run
//! use deckconf::DeckConfig;
//!
//! let config = DeckConfig::load().expect("Failed to load config");
//!
//! println!("model: {}", config.infra.backend.model);
//! for prompt in &config.bootstrap.prompts {
//!     println!("cc {} -> {}", prompt.cc, prompt.text);
//! }
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/promptdeck/config.toml` (system)
//! 2. `~/.config/promptdeck/config.toml` (user)
//! 3. `./promptdeck.toml` (local override, or the `--config` path)
//! 4. Environment variables (`PROMPTDECK_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [audio]
//! buffer_seconds = 2.0
//! fade_seconds = 0.1
//!
//! [backend]
//! model = "lyria-realtime-exp"
//! api_key_env = "GEMINI_API_KEY"
//! push_interval_ms = 200
//!
//! [telemetry]
//! log_level = "info"
//!
//! [bootstrap.midi]
//! device = "input-0"
//!
//! [[bootstrap.prompts]]
//! text = "Lush Strings"
//! cc = 7
//! color = "#3dffab"
//! weight = 1.0
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{default_prompts, BootstrapConfig, MidiConfig, PromptSeed};
pub use infra::{AudioConfig, BackendConfig, InfraConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete promptdeck configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeckConfig {
    /// Infrastructure - cannot change at runtime.
    #[serde(flatten)]
    pub infra: InfraConfig,

    /// Bootstrap - seeds runtime state.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl DeckConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with `config_path` replacing the local override.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = DeckConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.infra.backend.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# promptdeck configuration\n\n");

        let audio = &self.infra.audio;
        output.push_str("[audio]\n");
        output.push_str(&format!("sample_rate = {}\n", audio.sample_rate));
        output.push_str(&format!("channels = {}\n", audio.channels));
        output.push_str(&format!("buffer_seconds = {:?}\n", audio.buffer_seconds));
        output.push_str(&format!("fade_seconds = {:?}\n", audio.fade_seconds));
        output.push_str(&format!("block_frames = {}\n", audio.block_frames));

        let backend = &self.infra.backend;
        output.push_str("\n[backend]\n");
        output.push_str(&format!("endpoint = \"{}\"\n", backend.endpoint));
        output.push_str(&format!("model = \"{}\"\n", backend.model));
        output.push_str(&format!("api_key_env = \"{}\"\n", backend.api_key_env));
        output.push_str(&format!("push_interval_ms = {}\n", backend.push_interval_ms));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.infra.telemetry.log_level
        ));

        output.push_str("\n[bootstrap.midi]\n");
        if let Some(device) = &self.bootstrap.midi.device {
            output.push_str(&format!("device = \"{}\"\n", device));
        }

        for prompt in &self.bootstrap.prompts {
            output.push_str("\n[[bootstrap.prompts]]\n");
            output.push_str(&format!("text = \"{}\"\n", prompt.text));
            output.push_str(&format!("cc = {}\n", prompt.cc));
            output.push_str(&format!("color = \"{}\"\n", prompt.color));
            output.push_str(&format!("weight = {:?}\n", prompt.weight));
        }

        output
    }
}
