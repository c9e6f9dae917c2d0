use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HealConfig {
    pub model: String,
    pub auto_heal: bool,
    pub runner: String,
    pub reporter: String,
    pub run_timeout_secs: Option<u64>,
    pub ai_timeout_secs: u64,
    pub max_rounds: usize,
    pub revert_unhealed: bool,
    pub parallel: usize,
    pub base_url: Option<String>,
    pub verbose: bool,
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4".into(),
            auto_heal: true,
            runner: "npx playwright".into(),
            reporter: "json".into(),
            run_timeout_secs: None,
            ai_timeout_secs: 60,
            max_rounds: 1,
            revert_unhealed: false,
            parallel: 4,
            base_url: None,
            verbose: false,
        }
    }
}

impl HealConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_timeout_secs.max(1))
    }

    /// Environment overrides, read through `get` so tests can inject values.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(model) = get("PLAYHEAL_MODEL").filter(|m| !m.trim().is_empty()) {
            self.model = model;
        }
        if let Some(v) = get("PLAYHEAL_AUTO_HEAL") {
            self.auto_heal = truthy(&v);
        }
        if let Some(v) = get("PLAYHEAL_VERBOSE") {
            self.verbose = truthy(&v);
        }
    }
}

pub fn truthy(val: &str) -> bool {
    matches!(
        val.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn config_path() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("playheal");
    dir.push("config.toml");
    dir
}

/// Missing file means defaults; an unreadable or invalid file is an error.
pub fn load_from(path: &Path) -> Result<HealConfig, String> {
    if !path.exists() {
        return Ok(HealConfig::default());
    }

    let raw = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    toml::from_str(&raw).map_err(|e| format!("{}: {}", path.display(), e))
}

pub fn load() -> Result<HealConfig, String> {
    let mut cfg = load_from(&config_path())?;
    cfg.apply_env(|k| std::env::var(k).ok());
    Ok(cfg)
}
