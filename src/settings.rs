//! Runtime settings for the reload pipeline.
//!
//! Settings are read from an optional JSON file (`--config`). Every field has a
//! default so a partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::debounce::DebouncePolicy;
use crate::figure::FigureSize;

/// Default quiet period before a burst of change events triggers a reload.
fn default_quiet_period_ms() -> u64 {
    250
}

/// Default figure size in inches, used when a routine carries no size hint.
fn default_size() -> FigureSize {
    FigureSize::new(8.0, 8.0)
}

/// Default pixels per inch for raster output.
fn default_dpi() -> f32 {
    100.0
}

/// Default operation budget for a single load or figure run.
fn default_max_operations() -> u64 {
    1_000_000
}

/// Default maximum array length scripts may build (data series can be long).
fn default_max_array_size() -> usize {
    1_000_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,

    #[serde(default)]
    pub debounce_policy: DebouncePolicy,

    #[serde(default = "default_size")]
    pub default_size: FigureSize,

    #[serde(default = "default_dpi")]
    pub dpi: f32,

    #[serde(default = "default_max_operations")]
    pub max_operations: u64,

    #[serde(default = "default_max_array_size")]
    pub max_array_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            quiet_period_ms: default_quiet_period_ms(),
            debounce_policy: DebouncePolicy::default(),
            default_size: default_size(),
            dpi: default_dpi(),
            max_operations: default_max_operations(),
            max_array_size: default_max_array_size(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read settings file {:?}: {}", path, e))?;
        let settings: Settings = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse settings file {:?}: {}", path, e))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.quiet_period_ms == 0 {
            return Err("Quiet period must be positive".to_string());
        }
        if !(self.dpi > 0.0) {
            return Err("DPI must be positive".to_string());
        }
        if !self.default_size.is_valid() {
            return Err(format!(
                "Default size must be positive, got {}x{}",
                self.default_size.width, self.default_size.height
            ));
        }
        if self.max_operations == 0 {
            return Err("Operation budget must be positive".to_string());
        }
        Ok(())
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}
