//! Configuration management
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML file
//! (`callrelay.toml`, or the path in `CALLRELAY_CONFIG`), then environment
//! variables such as `CALLRELAY__REALTIME__MODEL`. `OPENAI_API_KEY` fills the
//! realtime API key when nothing else did.

use crate::domain::audio::RealtimeAudioFormat;
use crate::domain::shared::error::RelayError;
use crate::domain::shared::result::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "CALLRELAY_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "callrelay.toml";
pub const ENV_PREFIX: &str = "CALLRELAY";
pub const API_KEY_FALLBACK_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub realtime: RealtimeConfig,
    pub telephony: TelephonyConfig,
    pub session: SessionConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// WebSocket endpoint; the model is appended as `?model=`
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub voice: String,
    pub instructions: String,
    pub audio_format: RealtimeAudioFormat,
    /// Empty disables caller transcription
    pub transcription_model: String,
    pub temperature: f32,
    pub turn_detection: TurnDetectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnDetectionConfig {
    /// `server_vad` or `semantic_vad`
    pub mode: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    /// Semantic VAD only
    pub eagerness: Option<String>,
    pub create_response: bool,
    pub interrupt_response: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelephonyConfig {
    pub speech_detection: SpeechDetectionConfig,
}

/// Local energy-based speech detection on caller audio
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechDetectionConfig {
    pub enabled: bool,
    /// RMS level (0..32767) above which a frame counts as speech
    pub energy_threshold: f32,
    pub min_speech_ms: u32,
    pub min_silence_ms: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub handshake_timeout_ms: u64,
    pub truncate_timeout_ms: u64,
    pub grace_period_ms: u64,
    pub queue_capacity: usize,
    pub frame_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub backend: PersistenceBackend,
    pub directory: PathBuf,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            base_url: "wss://api.openai.com/v1/realtime".to_string(),
            model: "gpt-4o-realtime-preview".to_string(),
            api_key: String::new(),
            voice: "alloy".to_string(),
            instructions: "You are a helpful voice assistant answering a phone call. Keep answers short.".to_string(),
            audio_format: RealtimeAudioFormat::G711Ulaw,
            transcription_model: "whisper-1".to_string(),
            temperature: 0.8,
            turn_detection: TurnDetectionConfig::default(),
        }
    }
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        Self {
            mode: "server_vad".to_string(),
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            eagerness: None,
            create_response: true,
            interrupt_response: true,
        }
    }
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            speech_detection: SpeechDetectionConfig::default(),
        }
    }
}

impl Default for SpeechDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            energy_threshold: 1200.0,
            min_speech_ms: 200,
            min_silence_ms: 400,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
            truncate_timeout_ms: 2_000,
            grace_period_ms: 2_000,
            queue_capacity: 512,
            frame_ms: 20,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: PersistenceBackend::File,
            directory: PathBuf::from("./data/calls"),
            queue_capacity: 1024,
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

impl Config {
    /// Load from the default file location and the process environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        let fallback_key = std::env::var(API_KEY_FALLBACK_ENV).ok();

        Self::load_from(Some(&path), None, fallback_key)
    }

    /// Load with explicit sources.
    ///
    /// `env` replaces the process environment when given. A missing file is
    /// skipped; an unreadable or malformed one is an error.
    pub fn load_from(
        file: Option<&Path>,
        env: Option<HashMap<String, String>>,
        fallback_api_key: Option<String>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let mut config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RelayError::Configuration(e.to_string()))?;

        if config.realtime.api_key.is_empty() {
            if let Some(key) = fallback_api_key {
                config.realtime.api_key = key;
            }
        }

        Ok(config)
    }

    /// Reject configurations the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.realtime.api_key.trim().is_empty() {
            return Err(RelayError::Configuration(format!(
                "realtime.api_key is not set (or set {})",
                API_KEY_FALLBACK_ENV
            )));
        }

        let url = &self.realtime.base_url;
        if !(url.starts_with("wss://") || url.starts_with("ws://")) {
            return Err(RelayError::Configuration(format!(
                "realtime.base_url must be a ws:// or wss:// URL, got '{}'",
                url
            )));
        }
        if self.realtime.model.trim().is_empty() {
            return Err(RelayError::Configuration("realtime.model is empty".to_string()));
        }

        let td = &self.realtime.turn_detection;
        if !matches!(td.mode.as_str(), "server_vad" | "semantic_vad") {
            return Err(RelayError::Configuration(format!(
                "realtime.turn_detection.mode must be server_vad or semantic_vad, got '{}'",
                td.mode
            )));
        }
        if !(0.0..=1.0).contains(&td.threshold) {
            return Err(RelayError::Configuration(
                "realtime.turn_detection.threshold must be within 0.0..=1.0".to_string(),
            ));
        }

        let s = &self.session;
        let zero = [
            ("session.handshake_timeout_ms", s.handshake_timeout_ms),
            ("session.truncate_timeout_ms", s.truncate_timeout_ms),
            ("session.grace_period_ms", s.grace_period_ms),
            ("session.queue_capacity", s.queue_capacity as u64),
            ("session.frame_ms", s.frame_ms as u64),
            ("persistence.queue_capacity", self.persistence.queue_capacity as u64),
            ("persistence.max_attempts", self.persistence.max_attempts as u64),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0);
        if let Some((field, _)) = zero {
            return Err(RelayError::Configuration(format!("{} must be greater than zero", field)));
        }

        if self.persistence.backend == PersistenceBackend::File {
            self.check_persistence_directory()?;
        }

        Ok(())
    }

    fn check_persistence_directory(&self) -> Result<()> {
        let dir = &self.persistence.directory;
        std::fs::create_dir_all(dir).map_err(|e| {
            RelayError::Configuration(format!(
                "persistence.directory {} is unusable: {}",
                dir.display(),
                e
            ))
        })?;

        let metadata = std::fs::metadata(dir).map_err(|e| {
            RelayError::Configuration(format!("persistence.directory {}: {}", dir.display(), e))
        })?;
        if metadata.permissions().readonly() {
            return Err(RelayError::Configuration(format!(
                "persistence.directory {} is read-only",
                dir.display()
            )));
        }
        Ok(())
    }

    /// Address the HTTP server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl RealtimeConfig {
    /// Full connection URL including the model query parameter
    pub fn connect_url(&self) -> String {
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        format!("{}{}model={}", self.base_url, separator, self.model)
    }
}

impl SessionConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn truncate_timeout(&self) -> Duration {
        Duration::from_millis(self.truncate_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_ms as u64)
    }
}
