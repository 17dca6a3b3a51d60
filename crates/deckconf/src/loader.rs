//! Config file discovery, loading, and environment variable overlay.

use crate::bootstrap::{BootstrapConfig, MidiConfig, PromptSeed};
use crate::infra::{AudioConfig, BackendConfig, InfraConfig, TelemetryConfig};
use crate::{ConfigError, DeckConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/promptdeck/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("promptdeck/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("promptdeck.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<DeckConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

fn parse_error(path: &Path, message: impl Into<String>) -> ConfigError {
    ConfigError::Parse {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// Parse config from TOML string.
pub(crate) fn parse_toml(contents: &str, path: &Path) -> Result<DeckConfig, ConfigError> {
    let table: toml::Table = contents
        .parse()
        .map_err(|e: toml::de::Error| parse_error(path, e.to_string()))?;

    let mut infra = InfraConfig::default();

    if let Some(audio) = table.get("audio").and_then(|v| v.as_table()) {
        if let Some(v) = audio.get("sample_rate").and_then(|v| v.as_integer()) {
            infra.audio.sample_rate =
                u32::try_from(v).map_err(|_| parse_error(path, "audio.sample_rate out of range"))?;
        }
        if let Some(v) = audio.get("channels").and_then(|v| v.as_integer()) {
            infra.audio.channels =
                u16::try_from(v).map_err(|_| parse_error(path, "audio.channels out of range"))?;
        }
        if let Some(v) = audio.get("buffer_seconds").and_then(as_seconds) {
            infra.audio.buffer_seconds = v;
        }
        if let Some(v) = audio.get("fade_seconds").and_then(as_seconds) {
            infra.audio.fade_seconds = v;
        }
        if let Some(v) = audio.get("block_frames").and_then(|v| v.as_integer()) {
            infra.audio.block_frames =
                u32::try_from(v).map_err(|_| parse_error(path, "audio.block_frames out of range"))?;
        }
    }

    if let Some(backend) = table.get("backend").and_then(|v| v.as_table()) {
        if let Some(v) = backend.get("endpoint").and_then(|v| v.as_str()) {
            infra.backend.endpoint = v.to_string();
        }
        if let Some(v) = backend.get("model").and_then(|v| v.as_str()) {
            infra.backend.model = v.to_string();
        }
        if let Some(v) = backend.get("api_key_env").and_then(|v| v.as_str()) {
            infra.backend.api_key_env = v.to_string();
        }
        if let Some(v) = backend.get("push_interval_ms").and_then(|v| v.as_integer()) {
            infra.backend.push_interval_ms = u64::try_from(v)
                .map_err(|_| parse_error(path, "backend.push_interval_ms must be positive"))?;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            infra.telemetry.log_level = v.to_string();
        }
    }

    let mut bootstrap = BootstrapConfig::default();

    if let Some(section) = table.get("bootstrap").and_then(|v| v.as_table()) {
        if let Some(midi) = section.get("midi").and_then(|v| v.as_table()) {
            if let Some(v) = midi.get("device").and_then(|v| v.as_str()) {
                bootstrap.midi.device = Some(v.to_string());
            }
        }

        if let Some(prompts) = section.get("prompts") {
            bootstrap.prompts = prompts
                .clone()
                .try_into::<Vec<PromptSeed>>()
                .map_err(|e| parse_error(path, format!("bootstrap.prompts: {e}")))?;
        }
    }

    Ok(DeckConfig { infra, bootstrap })
}

fn as_seconds(value: &toml::Value) -> Option<f64> {
    value
        .as_float()
        .or_else(|| value.as_integer().map(|i| i as f64))
}

fn pick<T: PartialEq>(base: T, overlay: T, default: T) -> T {
    if overlay != default {
        overlay
    } else {
        base
    }
}

/// Merge two configs, with `overlay` taking precedence wherever it differs
/// from the compiled default.
pub fn merge_configs(base: DeckConfig, overlay: DeckConfig) -> DeckConfig {
    let audio = AudioConfig::default();
    let backend = BackendConfig::default();
    let telemetry = TelemetryConfig::default();
    let bootstrap = BootstrapConfig::default();

    DeckConfig {
        infra: InfraConfig {
            audio: AudioConfig {
                sample_rate: pick(
                    base.infra.audio.sample_rate,
                    overlay.infra.audio.sample_rate,
                    audio.sample_rate,
                ),
                channels: pick(
                    base.infra.audio.channels,
                    overlay.infra.audio.channels,
                    audio.channels,
                ),
                buffer_seconds: pick(
                    base.infra.audio.buffer_seconds,
                    overlay.infra.audio.buffer_seconds,
                    audio.buffer_seconds,
                ),
                fade_seconds: pick(
                    base.infra.audio.fade_seconds,
                    overlay.infra.audio.fade_seconds,
                    audio.fade_seconds,
                ),
                block_frames: pick(
                    base.infra.audio.block_frames,
                    overlay.infra.audio.block_frames,
                    audio.block_frames,
                ),
            },
            backend: BackendConfig {
                endpoint: pick(
                    base.infra.backend.endpoint,
                    overlay.infra.backend.endpoint,
                    backend.endpoint,
                ),
                model: pick(
                    base.infra.backend.model,
                    overlay.infra.backend.model,
                    backend.model,
                ),
                api_key_env: pick(
                    base.infra.backend.api_key_env,
                    overlay.infra.backend.api_key_env,
                    backend.api_key_env,
                ),
                push_interval_ms: pick(
                    base.infra.backend.push_interval_ms,
                    overlay.infra.backend.push_interval_ms,
                    backend.push_interval_ms,
                ),
            },
            telemetry: TelemetryConfig {
                log_level: pick(
                    base.infra.telemetry.log_level,
                    overlay.infra.telemetry.log_level,
                    telemetry.log_level,
                ),
            },
        },
        bootstrap: BootstrapConfig {
            prompts: pick(
                base.bootstrap.prompts,
                overlay.bootstrap.prompts,
                bootstrap.prompts,
            ),
            midi: MidiConfig {
                device: overlay.bootstrap.midi.device.or(base.bootstrap.midi.device),
            },
        },
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut DeckConfig, sources: &mut ConfigSources) {
    apply_overrides_with(config, sources, |key| env::var(key).ok());
}

/// Apply overrides using an arbitrary variable lookup.
pub(crate) fn apply_overrides_with<F>(config: &mut DeckConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut record = |key: &str| sources.env_overrides.push(key.to_string());

    if let Some(v) = lookup("PROMPTDECK_ENDPOINT") {
        config.infra.backend.endpoint = v;
        record("PROMPTDECK_ENDPOINT");
    }
    if let Some(v) = lookup("PROMPTDECK_MODEL") {
        config.infra.backend.model = v;
        record("PROMPTDECK_MODEL");
    }
    if let Some(v) = lookup("PROMPTDECK_PUSH_INTERVAL_MS") {
        if let Ok(ms) = v.parse() {
            config.infra.backend.push_interval_ms = ms;
            record("PROMPTDECK_PUSH_INTERVAL_MS");
        }
    }
    if let Some(v) = lookup("PROMPTDECK_BUFFER_SECONDS") {
        if let Ok(secs) = v.parse() {
            config.infra.audio.buffer_seconds = secs;
            record("PROMPTDECK_BUFFER_SECONDS");
        }
    }
    if let Some(v) = lookup("PROMPTDECK_MIDI_DEVICE") {
        config.bootstrap.midi.device = Some(v);
        record("PROMPTDECK_MIDI_DEVICE");
    }

    if let Some(v) = lookup("PROMPTDECK_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        record("PROMPTDECK_LOG_LEVEL");
    }
    // RUST_LOG wins over everything else
    if let Some(v) = lookup("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        record("RUST_LOG");
    }
}
