// Engine settings management and persistence
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::SettingsError;

/// Speaker layout the hardware mixes every channel into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Stereo,
    Mono,
}

/// Output device settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputSettings {
    pub device: Option<String>, // None = system default device
    pub mode: OutputMode,
}

/// Ring buffer sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferSettings {
    pub slice_duration_ms: u32, // duration of one ring slice
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            slice_duration_ms: 120,
        }
    }
}

/// Stream worker thread settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub stack_size: usize,
    /// Most urgent priority a worker may be raised to
    pub priority_ceiling: i32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            stack_size: 256 * 1024,
            priority_ceiling: 2, // THREAD_PRIORITY_HIGHEST
        }
    }
}

/// Main engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub version: i32, // Settings schema version for future migrations
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub buffering: BufferSettings,
    #[serde(default)]
    pub worker: WorkerSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            version: 1,
            output: OutputSettings::default(),
            buffering: BufferSettings::default(),
            worker: WorkerSettings::default(),
        }
    }
}

impl EngineSettings {
    /// Get the settings file path
    pub fn settings_path(dir: &Path) -> PathBuf {
        dir.join("settings.json")
    }

    /// Load settings from file, or return defaults if file doesn't exist
    pub fn load(dir: &Path) -> Result<Self, SettingsError> {
        let path = Self::settings_path(dir);

        if !path.exists() {
            debug!(path = %path.display(), "No settings file found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let settings: EngineSettings = serde_json::from_str(&content)?;

        info!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Save settings to file
    pub fn save(&self, dir: &Path) -> Result<(), SettingsError> {
        fs::create_dir_all(dir)?;

        let path = Self::settings_path(dir);
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;

        info!(path = %path.display(), "Saved settings");
        Ok(())
    }
}
