//! Recipe JSON load/save with field-level error reporting

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info};

use super::{Recipe, SUPPORTED_VERSIONS};
use crate::error::{LyraError, Result};

const RECIPE_FIELDS: &[&str] = &["sample_rate", "global_key_shift_semitones", "segments"];

const SEGMENT_FIELDS: &[&str] = &[
    "t0",
    "t1",
    "time_warp_points",
    "pitch_target_curve",
    "confidence",
    "pitch_strength",
    "time_strength",
];

const WARNING_FIELDS: &[&str] = &["t0", "t1", "reason"];

impl Recipe {
    /// Pretty-printed JSON text
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| LyraError::invalid(e.to_string()))
    }

    /// Parse and validate a recipe
    ///
    /// Malformed JSON, a missing field, an unknown version, a mistyped value
    /// and a semantic violation each produce a distinct error.
    pub fn from_json_str(text: &str) -> Result<Recipe> {
        let value: Value = serde_json::from_str(text).map_err(|e| LyraError::parse(&e))?;
        let Some(object) = value.as_object() else {
            return Err(LyraError::invalid("recipe must be a JSON object"));
        };

        let version = object.get("version").ok_or_else(|| LyraError::missing("version"))?;
        let version = match version {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if !SUPPORTED_VERSIONS.contains(&version.as_str()) {
            return Err(LyraError::UnsupportedVersion {
                found: version,
                supported: SUPPORTED_VERSIONS.join(", "),
            });
        }

        require_fields(&value, "", RECIPE_FIELDS)?;
        require_entry_fields(&value, "segments", SEGMENT_FIELDS)?;
        require_entry_fields(&value, "warnings", WARNING_FIELDS)?;

        let recipe: Recipe =
            serde_json::from_value(value).map_err(|e| LyraError::invalid(e.to_string()))?;
        recipe.validate()?;
        Ok(recipe)
    }

    /// Validate and write the recipe, creating parent directories as needed
    ///
    /// An invalid recipe is rejected before anything touches the disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.validate()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json_string()?)?;
        info!(path = %path.display(), segments = self.segments.len(), "recipe saved");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Recipe> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let recipe = Self::from_json_str(&text)?;
        debug!(path = %path.display(), segments = recipe.segments.len(), "recipe loaded");
        Ok(recipe)
    }
}

fn require_fields(value: &Value, prefix: &str, fields: &[&str]) -> Result<()> {
    let Some(object) = value.as_object() else {
        // Wrong shapes are reported by typed deserialization
        return Ok(());
    };
    for field in fields {
        if !object.contains_key(*field) {
            return Err(LyraError::missing(if prefix.is_empty() {
                field.to_string()
            } else {
                format!("{prefix}.{field}")
            }));
        }
    }
    Ok(())
}

fn require_entry_fields(value: &Value, key: &str, fields: &[&str]) -> Result<()> {
    let Some(entries) = value.get(key).and_then(Value::as_array) else {
        return Ok(());
    };
    for (i, entry) in entries.iter().enumerate() {
        require_fields(entry, &format!("{key}[{i}]"), fields)?;
    }
    Ok(())
}
