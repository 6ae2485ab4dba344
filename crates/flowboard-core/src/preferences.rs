//! Locally persisted UI preferences.
//!
//! Stored as a versioned JSON record. Reading never fails on content: older
//! layouts are migrated, unknown fields are ignored and malformed fields fall
//! back to their defaults.

use crate::energy::EnergyMode;
use crate::entities::DrawTool;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current layout version.
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("preferences I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("preferences are not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    System,
    Light,
    Dark,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub version: u32,
    pub theme: Theme,
    /// Last pen tool used for freehand drawing.
    pub pen_tool: DrawTool,
    pub monitoring_mode: bool,
    pub block_done_tasks: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            theme: Theme::default(),
            pen_tool: DrawTool::Pen,
            monitoring_mode: false,
            block_done_tasks: false,
        }
    }
}

fn field<T: DeserializeOwned + Default>(object: &Map<String, Value>, key: &str) -> T {
    object
        .get(key)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default()
}

impl Preferences {
    /// Read preferences from any stored layout.
    ///
    /// Version 1 stored the theme as a `darkMode` flag and the pen tool as
    /// `tool`.
    pub fn from_value(raw: &Value) -> Self {
        let Some(object) = raw.as_object() else {
            return Self::default();
        };
        let version = object
            .get("version")
            .and_then(Value::as_u64)
            .map_or(1, |v| v as u32);

        let mut prefs = Self {
            version: SCHEMA_VERSION,
            monitoring_mode: field(object, "monitoringMode"),
            block_done_tasks: field(object, "blockDoneTasks"),
            ..Self::default()
        };
        if version < 2 {
            if let Some(dark) = object.get("darkMode").and_then(Value::as_bool) {
                prefs.theme = if dark { Theme::Dark } else { Theme::Light };
            }
            prefs.pen_tool = field(object, "tool");
            log::info!("migrated preferences from version {version}");
        } else {
            prefs.theme = field(object, "theme");
            prefs.pen_tool = field(object, "penTool");
        }
        prefs
    }

    /// Default file location: `<config dir>/flowboard/preferences.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("flowboard").join("preferences.json"))
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, PreferencesError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path)?;
        let raw: Value = serde_json::from_str(&json)?;
        Ok(Self::from_value(&raw))
    }

    /// Write to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), PreferencesError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Energy mode implied by the UI flags. Monitoring always blocks done tasks.
    pub fn energy_mode(&self) -> EnergyMode {
        EnergyMode {
            block_done_tasks: self.monitoring_mode || self.block_done_tasks,
        }
    }
}
