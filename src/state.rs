use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::llm::backend::ChatBackend;
use crate::store::{FileStore, StoreError};

pub const MAX_LOGS: usize = 1000;

/* ---------- logging ---------- */

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

impl LogLevel {
    pub fn tag(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Success => " OK ",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERR ",
        }
    }
}

#[derive(Clone, Debug)]
pub struct LogLine {
    pub level: LogLevel,
    pub text: String,
    pub at: DateTime<Local>,
}

impl LogLine {
    pub fn render(&self) -> String {
        format!("{} {} {}", self.at.format("%H:%M:%S"), self.level.tag(), self.text)
    }
}

/* ---------- test target ---------- */

/// One spec file under repair. The source text is the only state a heal
/// attempt mutates.
#[derive(Debug, Clone)]
pub struct TestTarget {
    pub path: PathBuf,
    pub source: String,
}

impl TestTarget {
    pub fn load(store: &dyn FileStore, path: &Path) -> Result<Self, StoreError> {
        let source = store.read(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            source,
        })
    }
}

/* ---------- heal context ---------- */

/// Everything one heal attempt needs besides the runner and file store.
/// Built per target so parallel heals never share mutable state.
pub struct HealContext {
    pub label: String,
    pub backend: Option<Arc<dyn ChatBackend>>,

    /* policy */
    pub max_rounds: usize,
    pub revert_unhealed: bool,

    /* last backend conversation, carried into the run report */
    pub conversation_id: Option<String>,

    /* output */
    pub echo: bool,
    pub logs: VecDeque<LogLine>,
}

impl HealContext {
    pub fn new(label: impl Into<String>, backend: Option<Arc<dyn ChatBackend>>) -> Self {
        Self {
            label: label.into(),
            backend,
            max_rounds: 1,
            revert_unhealed: false,
            conversation_id: None,
            echo: false,
            logs: VecDeque::new(),
        }
    }

    pub fn with_policy(mut self, max_rounds: usize, revert_unhealed: bool) -> Self {
        self.max_rounds = max_rounds.max(1);
        self.revert_unhealed = revert_unhealed;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    #[cfg(test)]
    pub fn has_logged(&self, level: LogLevel, needle: &str) -> bool {
        self.logs
            .iter()
            .any(|l| l.level == level && l.text.contains(needle))
    }
}
