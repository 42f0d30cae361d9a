use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// User preferences consumed by the state machines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Server-side transaction timeout, in minutes
    pub transaction_timeout_mins: u64,
    /// Limit appended to get queries that have none; 0 disables it
    pub get_query_limit: u64,
    pub auto_save: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            transaction_timeout_mins: 60,
            get_query_limit: 1000,
            auto_save: true,
        }
    }
}

impl Preferences {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_mins.saturating_mul(60))
    }

    pub fn query_limit(&self) -> Option<u64> {
        (self.get_query_limit > 0).then_some(self.get_query_limit)
    }
}

/// Load preferences from a JSON file. A missing or empty file yields defaults.
pub async fn load_preferences(file_path: &Path) -> Result<Preferences> {
    let content = match async_fs::read_to_string(file_path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Preferences::default()),
        Err(e) => return Err(e).context("Failed to read preferences file"),
    };

    if content.trim().is_empty() {
        return Ok(Preferences::default());
    }

    serde_json::from_str(&content).context("Failed to parse preferences JSON")
}

pub async fn save_preferences(file_path: &Path, preferences: &Preferences) -> Result<()> {
    if let Some(parent) = file_path.parent() {
        async_fs::create_dir_all(parent)
            .await
            .context("Failed to create preferences directory")?;
    }

    let json_content =
        serde_json::to_string_pretty(preferences).context("Failed to serialize preferences")?;

    async_fs::write(file_path, json_content)
        .await
        .context("Failed to write preferences file")?;

    Ok(())
}

/// Default preferences location (~/.studio/preferences.json)
pub fn preferences_file_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
    Ok(home.join(".studio").join("preferences.json"))
}
