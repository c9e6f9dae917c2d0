//! extract.rs
//!
//! Turns a failing run into one issue description for the AI, plus the
//! faulty locator literal when the message names one.
//!
//! Never fails: a malformed report degrades to stderr, empty stderr
//! degrades to a fixed sentinel.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::report::ReportError;
use crate::runner::RunOutcome;

pub const MISSING_DETAILS: &str = "Error details not provided by the test runner";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IssueSource {
    Report,
    Stderr,
    Sentinel,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssueDescription {
    pub text: String,
    /// Inner text of the locator literal that failed, when recognizable.
    pub locator: Option<String>,
    pub source: IssueSource,
}

pub fn extract(outcome: &RunOutcome) -> IssueDescription {
    if let Some(err) = outcome.structured_report().and_then(|r| r.first_error()) {
        let text = describe(err);
        if !text.is_empty() {
            return IssueDescription {
                locator: find_locator(&text),
                text,
                source: IssueSource::Report,
            };
        }
    }

    if !outcome.stderr.trim().is_empty() {
        return IssueDescription {
            locator: find_locator(&strip_ansi(&outcome.stderr)),
            text: outcome.stderr.clone(),
            source: IssueSource::Stderr,
        };
    }

    IssueDescription {
        text: MISSING_DETAILS.to_string(),
        locator: None,
        source: IssueSource::Sentinel,
    }
}

fn describe(err: &ReportError) -> String {
    let message = strip_ansi(err.message.as_deref().unwrap_or_default())
        .trim()
        .to_string();

    if message.is_empty() {
        return message;
    }

    match &err.location {
        Some(loc) => format!("{} at {}:{}:{}", message, loc.file, loc.line, loc.column),
        None => message,
    }
}

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("ansi pattern"));

pub fn strip_ansi(s: &str) -> String {
    ANSI_ESCAPE.replace_all(s, "").into_owned()
}

/* ============================================================
   Locator detection
   ============================================================ */

// Calls whose first argument is a selector or visible text. getByRole is
// left out because its first argument is an ARIA role, not a locator.
static LOCATOR_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:locator|\$\$?|click|dblclick|fill|type|press|check|uncheck|hover|waitForSelector|getByText|getByTestId|getByLabel|getByPlaceholder|getByAltText|getByTitle)\(\s*(?:'([^'\n]+)'|"([^"\n]+)"|`([^`\n]+)`)"#)
        .expect("locator call pattern")
});

static SELECTOR_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"selector:?\s*(?:'([^'\n]+)'|"([^"\n]+)"|`([^`\n]+)`)"#).expect("selector pattern")
});

pub fn find_locator(text: &str) -> Option<String> {
    [&*LOCATOR_CALL, &*SELECTOR_WORD].iter().find_map(|re| {
        let caps = re.captures(text)?;
        (1..=3).find_map(|i| caps.get(i)).map(|m| m.as_str().to_string())
    })
}
