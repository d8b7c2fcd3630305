//! Configuration loading and management
//!
//! Settings live in `config.json` inside the data directory. Every field is
//! optional; a default file is written on first start so users have
//! something to edit.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::services::process::CommandSpec;
use crate::task::TaskSettings;

/// Overrides the data directory
pub const DATA_DIR_ENV: &str = "VISION_ASSIST_DATA_DIR";

/// Overrides the config file location
pub const CONFIG_PATH_ENV: &str = "VISION_ASSIST_CONFIG";

/// One narration backend in fallback order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechBackendConfig {
    pub name: String,
    #[serde(flatten)]
    pub command: CommandSpec,
}

/// On-disk form of the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub tick_interval_ms: u64,
    pub max_recording_secs: u64,
    pub model: String,
    pub capture_command: CommandSpec,
    pub record_command: CommandSpec,
    pub speech_backends: Vec<SpeechBackendConfig>,
    /// Tone player for cues; `null` rings the terminal bell instead
    pub cue_command: Option<CommandSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1200,
            max_recording_secs: 30,
            model: "gemini-2.5-flash".to_string(),
            capture_command: default_capture_command(),
            record_command: default_record_command(),
            speech_backends: default_speech_backends(),
            cue_command: Some(default_cue_command()),
            api_key_file: None,
            socket_path: None,
        }
    }
}

#[cfg(target_os = "macos")]
fn default_capture_command() -> CommandSpec {
    CommandSpec::new("screencapture", &["-x", "-t", "png", "/dev/stdout"])
}

#[cfg(not(target_os = "macos"))]
fn default_capture_command() -> CommandSpec {
    CommandSpec::new("import", &["-window", "root", "png:-"])
}

#[cfg(target_os = "macos")]
fn default_record_command() -> CommandSpec {
    CommandSpec::new("sox", &["-q", "-d", "-r", "16000", "-c", "1", "-t", "wav", "-"])
}

#[cfg(not(target_os = "macos"))]
fn default_record_command() -> CommandSpec {
    CommandSpec::new("arecord", &["-q", "-f", "S16_LE", "-r", "16000", "-c", "1", "-t", "wav", "-"])
}

#[cfg(target_os = "macos")]
fn default_speech_backends() -> Vec<SpeechBackendConfig> {
    vec![SpeechBackendConfig {
        name: "say".to_string(),
        command: CommandSpec::new("say", &["-f", "-"]),
    }]
}

#[cfg(not(target_os = "macos"))]
fn default_speech_backends() -> Vec<SpeechBackendConfig> {
    vec![
        SpeechBackendConfig {
            name: "espeak-ng".to_string(),
            command: CommandSpec::new("espeak-ng", &["--stdin"]),
        },
        SpeechBackendConfig {
            name: "espeak".to_string(),
            command: CommandSpec::new("espeak", &["--stdin"]),
        },
    ]
}

/// sox's player synthesizes each tone
fn default_cue_command() -> CommandSpec {
    CommandSpec::new("play", &["-q", "-n", "synth", "{secs}", "sine", "{freq}"])
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Where the settings were read from
    pub config_path: PathBuf,

    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Plain-text file holding the Gemini API key
    pub api_key_file: PathBuf,

    pub model: String,
    pub tick_interval: Duration,
    pub max_recording: Duration,
    pub capture_command: CommandSpec,
    pub record_command: CommandSpec,

    /// Narration backends, tried in order
    pub speech_backends: Vec<SpeechBackendConfig>,

    /// Tone player for cues, if any
    pub cue_command: Option<CommandSpec>,
}

/// Resolve the data directory from the environment
pub fn data_dir() -> Result<PathBuf> {
    match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => {
            let home = std::env::var("HOME").context("HOME is not set")?;
            Ok(PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("vision-assist"))
        }
    }
}

impl Config {
    /// Load configuration for `data_dir`, honouring the config path override
    pub fn load(data_dir: PathBuf) -> Result<Self> {
        let config_path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("config.json"));

        Self::load_from(data_dir, config_path)
    }

    /// Load `config_path`, writing the defaults there first if it is missing
    pub fn load_from(data_dir: PathBuf, config_path: PathBuf) -> Result<Self> {
        let file = if config_path.exists() {
            read_file_config(&config_path)?
        } else {
            let defaults = FileConfig::default();
            write_file_config(&config_path, &defaults)?;
            info!(path = %config_path.display(), "default configuration written");
            defaults
        };

        Self::from_file(data_dir, config_path, file)
    }

    fn from_file(data_dir: PathBuf, config_path: PathBuf, file: FileConfig) -> Result<Self> {
        ensure!(file.tick_interval_ms > 0, "tick_interval_ms must be greater than zero");
        ensure!(file.max_recording_secs > 0, "max_recording_secs must be greater than zero");
        ensure!(!file.model.trim().is_empty(), "model must not be empty");
        ensure!(
            !file.capture_command.program.is_empty(),
            "capture_command.program must not be empty"
        );
        ensure!(
            !file.record_command.program.is_empty(),
            "record_command.program must not be empty"
        );

        Ok(Self {
            socket_path: file
                .socket_path
                .unwrap_or_else(|| data_dir.join("daemon.sock")),
            api_key_file: file
                .api_key_file
                .unwrap_or_else(|| data_dir.join("api_key")),
            model: file.model,
            tick_interval: Duration::from_millis(file.tick_interval_ms),
            max_recording: Duration::from_secs(file.max_recording_secs),
            capture_command: file.capture_command,
            record_command: file.record_command,
            speech_backends: file.speech_backends,
            cue_command: file.cue_command,
            data_dir,
            config_path,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }

    /// Timing settings for task bodies
    pub fn task_settings(&self) -> TaskSettings {
        TaskSettings {
            tick_interval: self.tick_interval,
            max_recording: self.max_recording,
            ..TaskSettings::default()
        }
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("invalid config in {}", path.display()))
}

fn write_file_config(path: &Path, config: &FileConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
