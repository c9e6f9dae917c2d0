//! report.rs
//!
//! Playwright JSON reporter output. Only the fields the heal loop reads are
//! modelled; everything else is ignored. Both the flat shape
//! (`tests[].errors`) and the full reporter shape (`tests[].results[].errors`)
//! are accepted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Report {
    #[serde(default)]
    pub stats: Stats,
    #[serde(default)]
    pub suites: Vec<Suite>,
    #[serde(default)]
    pub errors: Vec<ReportError>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Stats {
    #[serde(default)]
    pub expected: u64,
    #[serde(default)]
    pub unexpected: u64,
    #[serde(default)]
    pub flaky: u64,
    #[serde(default)]
    pub skipped: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Suite {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub specs: Vec<Spec>,
    #[serde(default)]
    pub suites: Vec<Suite>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Spec {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub ok: Option<bool>,
    #[serde(default)]
    pub tests: Vec<ReportTest>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReportTest {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub errors: Vec<ReportError>,
    #[serde(default)]
    pub results: Vec<TestAttempt>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TestAttempt {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub errors: Vec<ReportError>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReportError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl Report {
    pub fn parse(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| e.to_string())
    }

    /// First error with a message, walking suites -> specs -> tests in
    /// document order. Child suites are visited after the suite's own specs.
    pub fn first_error(&self) -> Option<&ReportError> {
        self.suites.iter().find_map(Suite::first_error)
    }

    /// Files of specs that did not pass, deduplicated, in document order.
    pub fn failed_spec_files(&self) -> Vec<String> {
        let mut out = Vec::new();
        for suite in &self.suites {
            suite.collect_failed(None, &mut out);
        }
        out
    }
}

impl Suite {
    fn first_error(&self) -> Option<&ReportError> {
        self.specs
            .iter()
            .flat_map(|s| s.tests.iter())
            .find_map(ReportTest::first_error)
            .or_else(|| self.suites.iter().find_map(Suite::first_error))
    }

    fn collect_failed(&self, parent_file: Option<&str>, out: &mut Vec<String>) {
        let file = self.file.as_deref().or(parent_file);

        for spec in &self.specs {
            if !spec.failed() {
                continue;
            }
            if let Some(f) = spec.file.as_deref().or(file) {
                if !out.iter().any(|known| known == f) {
                    out.push(f.to_string());
                }
            }
        }

        for child in &self.suites {
            child.collect_failed(file, out);
        }
    }
}

impl Spec {
    pub fn failed(&self) -> bool {
        if self.ok == Some(false) {
            return true;
        }
        self.tests.iter().any(|t| {
            t.status.as_deref() == Some("unexpected") || t.first_error().is_some()
        })
    }
}

impl ReportTest {
    pub fn first_error(&self) -> Option<&ReportError> {
        self.errors
            .iter()
            .chain(self.results.iter().flat_map(|r| r.errors.iter()))
            .find(|e| e.message.as_deref().is_some_and(|m| !m.trim().is_empty()))
    }
}
