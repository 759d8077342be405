//! The `modmap.json` settings file.
//!
//! Loader configuration keys sit at the top level. Two CLI-only sections
//! stand in for a running loader: `conditions` (exports of condition modules)
//! and `registry` (names already present in the module registry).

use indexmap::IndexMap;
use miette::{IntoDiagnostic, Result, WrapErr};
use modmap_core::{ConfigUpdate, Error};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Settings file looked up in the working directory when `--config` is absent.
pub const DEFAULT_SETTINGS_FILE: &str = "modmap.json";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(flatten)]
    pub loader: ConfigUpdate,

    /// Condition module name (relative to the working directory or absolute)
    /// to its exports.
    pub conditions: IndexMap<String, Value>,

    pub registry: Vec<String>,
}

impl Settings {
    /// Parse settings from JSON text. `source` names the text in errors.
    pub fn from_json(source: &str, text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::ConfigParse {
                path: source.to_string(),
                message: e.to_string(),
            })
            .into_diagnostic()
    }

    /// Read settings from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&path.display().to_string(), &text)
    }

    /// Load `explicit`, or the default settings file in `cwd` if there is one.
    pub fn discover(cwd: &Path, explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(&resolve_against(cwd, path));
        }

        let default = cwd.join(DEFAULT_SETTINGS_FILE);
        if default.is_file() {
            tracing::debug!(path = %default.display(), "using settings file");
            return Self::load(&default);
        }
        Ok(Self::default())
    }
}

fn resolve_against(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}
