//! Engine configuration (`<config dir>/audio.toml`)
//!
//! Every field has a serde default so partial or empty files parse. Settings
//! live in the platform-specific config directory next to other fathom tools.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AudioError, Result};

/// File name used inside [`config_dir`]
pub const CONFIG_FILE: &str = "audio.toml";

/// Buffers owned by every streaming channel. Not configurable.
pub const STREAM_BUFFER_COUNT: usize = 4;

/// Audio engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AudioConfig {
    /// Output device and master settings
    #[serde(default)]
    pub output: OutputConfig,
    /// Hardware slot pool sizes
    #[serde(default)]
    pub pools: PoolConfig,
    /// Streaming worker tuning
    #[serde(default)]
    pub streaming: StreamingConfig,
    /// Voice chat ingress/egress
    #[serde(default)]
    pub voice: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output device name (default: host default device)
    #[serde(default)]
    pub device: Option<String>,
    /// Listener gain (default: 1.0, range: 0.0-1.0)
    #[serde(default = "default_volume")]
    pub master_volume: f32,
    /// Scale the listener gain down when many loud sounds overlap (default: false)
    #[serde(default)]
    pub dynamic_range_compression: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Slots shared by sound effects, ambience and music (default: 32)
    #[serde(default = "default_general_slots")]
    pub general: usize,
    /// Slots reserved for voice chat (default: 16)
    #[serde(default = "default_voice_slots")]
    pub voice: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Samples per refill chunk for file streams (default: 8820)
    #[serde(default = "default_chunk_samples")]
    pub chunk_samples: usize,
    /// Streaming worker wake period in milliseconds (default: 20)
    #[serde(default = "default_worker_period")]
    pub worker_period_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Voice sample rate (default: 48000)
    #[serde(default = "default_voice_rate")]
    pub sample_rate: u32,
    /// Samples per encoded voice frame (default: 960, 20 ms at 48 kHz)
    #[serde(default = "default_frame_samples")]
    pub frame_samples: usize,
    /// Frames held by a voice queue (default: 8)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Consecutive missing frames before a voice stream ends (default: 120)
    #[serde(default = "default_miss_threshold")]
    pub miss_threshold: u32,
    /// Trailing samples reused when the microphone underruns (default: 240)
    #[serde(default = "default_repeat_margin")]
    pub repeat_margin: usize,
    /// Capture device name (default: host default input)
    #[serde(default)]
    pub capture_device: Option<String>,
    /// Microphone gain (default: 1.0)
    #[serde(default = "default_volume")]
    pub microphone_gain: f32,
    /// Duck other categories while someone is speaking (default: true)
    #[serde(default = "default_true")]
    pub attenuation_enabled: bool,
}

fn default_true() -> bool {
    true
}
fn default_volume() -> f32 {
    1.0
}
fn default_general_slots() -> usize {
    32
}
fn default_voice_slots() -> usize {
    16
}
fn default_chunk_samples() -> usize {
    8820
}
fn default_worker_period() -> u64 {
    20
}
fn default_voice_rate() -> u32 {
    48_000
}
fn default_frame_samples() -> usize {
    960
}
fn default_queue_capacity() -> usize {
    8
}
fn default_miss_threshold() -> u32 {
    120
}
fn default_repeat_margin() -> usize {
    240
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: None,
            master_volume: default_volume(),
            dynamic_range_compression: false,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            general: default_general_slots(),
            voice: default_voice_slots(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_samples: default_chunk_samples(),
            worker_period_ms: default_worker_period(),
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_voice_rate(),
            frame_samples: default_frame_samples(),
            queue_capacity: default_queue_capacity(),
            miss_threshold: default_miss_threshold(),
            repeat_margin: default_repeat_margin(),
            capture_device: None,
            microphone_gain: default_volume(),
            attenuation_enabled: default_true(),
        }
    }
}

impl AudioConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.streaming.chunk_samples == 0 {
            return Err(AudioError::Config("streaming.chunk_samples must be > 0".into()));
        }
        if self.voice.frame_samples == 0 || self.voice.frame_samples > fathom_qoa::MAX_FRAME_SAMPLES
        {
            return Err(AudioError::Config(format!(
                "voice.frame_samples must be in 1..={}",
                fathom_qoa::MAX_FRAME_SAMPLES
            )));
        }
        if self.voice.queue_capacity < 2 {
            return Err(AudioError::Config("voice.queue_capacity must be >= 2".into()));
        }
        if self.voice.repeat_margin > self.voice.frame_samples {
            return Err(AudioError::Config(
                "voice.repeat_margin cannot exceed voice.frame_samples".into(),
            ));
        }
        if self.pools.general == 0 && self.pools.voice == 0 {
            return Err(AudioError::Config("at least one slot pool must be non-empty".into()));
        }
        Ok(())
    }
}

/// Returns the platform-specific configuration directory.
///
/// On Windows: `%APPDATA%\Fathom\config`
/// On macOS: `~/Library/Application Support/io.fathom.Fathom`
/// On Linux: `~/.config/Fathom`
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.fathom", "", "Fathom")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Loads the configuration from the config directory.
///
/// Returns default values if the file doesn't exist or cannot be parsed.
pub fn load() -> AudioConfig {
    let Some(path) = config_dir().map(|dir| dir.join(CONFIG_FILE)) else {
        return AudioConfig::default();
    };
    if !path.exists() {
        return AudioConfig::default();
    }
    match load_from(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!("Ignoring {}: {}", path.display(), e);
            AudioConfig::default()
        }
    }
}

/// Loads and validates a configuration file, surfacing every failure.
pub fn load_from(path: &Path) -> Result<AudioConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AudioConfig =
        toml::from_str(&content).map_err(|e| AudioError::Config(e.to_string()))?;
    config.validate()?;
    debug!("Loaded audio config from {}", path.display());
    Ok(config)
}

/// Saves the configuration to the config directory, creating it if needed.
///
/// Returns the path written, or `None` when there is no config directory.
pub fn save(config: &AudioConfig) -> Result<Option<PathBuf>> {
    let Some(dir) = config_dir() else {
        return Ok(None);
    };
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(CONFIG_FILE);
    save_to(config, &path)?;
    Ok(Some(path))
}

/// Writes the configuration to an explicit path.
pub fn save_to(config: &AudioConfig, path: &Path) -> Result<()> {
    let content =
        toml::to_string_pretty(config).map_err(|e| AudioError::Config(e.to_string()))?;
    std::fs::write(path, content)?;
    Ok(())
}
