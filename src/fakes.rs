// Scripted stand-ins for the runner, chat backend and file store.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::llm::backend::{ChatBackend, ChatReply};
use crate::llm::prompt::LlmPrompt;
use crate::runner::{Reporter, RunOutcome, RunnerError, TestRunner};
use crate::store::{FileStore, StoreError};

pub const FAILING_REPORT: &str = r#"{"stats":{"expected":0,"unexpected":1},"suites":[{"file":"login.spec.js","specs":[{"ok":false,"tests":[{"errors":[{"message":"selector not found: locator('#submit-button')","location":{"file":"login.spec.js","line":12,"column":4}}]}]}]}]}"#;

pub const PASSING_REPORT: &str = r#"{"stats":{"expected":1,"unexpected":0},"suites":[]}"#;

pub fn passing() -> RunOutcome {
    RunOutcome::from_output(Some(0), PASSING_REPORT.into(), String::new(), Reporter::Json, 1)
}

pub fn failing() -> RunOutcome {
    RunOutcome::from_output(Some(1), FAILING_REPORT.into(), String::new(), Reporter::Json, 1)
}

/* ---------- runner ---------- */

#[derive(Default)]
pub struct ScriptedRunner {
    script: Mutex<VecDeque<Result<RunOutcome, RunnerError>>>,
    calls: Mutex<Vec<PathBuf>>,
}

impl ScriptedRunner {
    pub fn new(script: Vec<Result<RunOutcome, RunnerError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn targets(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }
}

impl TestRunner for ScriptedRunner {
    fn execute(&self, target: &Path) -> Result<RunOutcome, RunnerError> {
        self.calls.lock().unwrap().push(target.to_path_buf());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RunnerError::Io("script exhausted".into())))
    }
}

/// Runner whose outcome depends only on the target path.
pub struct PerTargetRunner {
    pub outcomes: HashMap<PathBuf, RunOutcome>,
    pub fallback: RunOutcome,
    calls: AtomicUsize,
}

impl PerTargetRunner {
    pub fn new(outcomes: HashMap<PathBuf, RunOutcome>, fallback: RunOutcome) -> Self {
        Self {
            outcomes,
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TestRunner for PerTargetRunner {
    fn execute(&self, target: &Path) -> Result<RunOutcome, RunnerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .outcomes
            .get(target)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

/* ---------- chat backend ---------- */

pub struct CannedBackend {
    reply: Result<String, String>,
    prompts: Mutex<Vec<String>>,
}

impl CannedBackend {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(err: &str) -> Self {
        Self {
            reply: Err(err.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

impl ChatBackend for CannedBackend {
    fn name(&self) -> &str {
        "canned"
    }

    fn send_message(&self, prompt: &LlmPrompt) -> Result<ChatReply, String> {
        self.prompts.lock().unwrap().push(prompt.user.clone());
        self.reply.clone().map(|text| ChatReply {
            text,
            conversation_id: Some("conv-1".into()),
        })
    }
}

/* ---------- file store ---------- */

#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<HashMap<PathBuf, String>>,
    writes: AtomicUsize,
    write_limit: Option<usize>,
}

impl MemoryStore {
    pub fn with_file(path: &str, text: &str) -> Self {
        let store = Self::default();
        store
            .files
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), text.to_string());
        store
    }

    /// Writes beyond the first `n` fail.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.write_limit = Some(n);
        self
    }

    pub fn get(&self, path: &Path) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl FileStore for MemoryStore {
    fn read(&self, path: &Path) -> Result<String, StoreError> {
        self.get(path).ok_or_else(|| StoreError {
            path: path.to_path_buf(),
            message: "not found".into(),
        })
    }

    fn write(&self, path: &Path, text: &str) -> Result<(), StoreError> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst);
        if self.write_limit.is_some_and(|limit| n >= limit) {
            return Err(StoreError {
                path: path.to_path_buf(),
                message: "disk full".into(),
            });
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), text.to_string());
        Ok(())
    }
}
