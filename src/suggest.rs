//! suggest.rs
//!
//! One stateless AI request per heal round. Every failure mode collapses to
//! `None` and a log line; nothing here retries.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::extract::IssueDescription;
use crate::llm::prompt::build_heal_prompt;
use crate::logger::log;
use crate::state::{HealContext, LogLevel};

#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    /// Text exactly as the backend returned it.
    pub raw: String,
    /// Correction payload handed to the patch applier.
    pub payload: String,
}

pub fn suggest(ctx: &mut HealContext, issue: &IssueDescription) -> Option<Suggestion> {
    let Some(backend) = ctx.backend.clone() else {
        log(ctx, LogLevel::Warn, "AI backend not initialized; no suggestion");
        return None;
    };

    let prompt = build_heal_prompt(issue);
    log(
        ctx,
        LogLevel::Info,
        format!("Asking {} for a corrected locator", backend.name()),
    );

    let reply = match backend.send_message(&prompt) {
        Ok(r) => r,
        Err(e) => {
            log(ctx, LogLevel::Error, format!("AI request failed: {e}"));
            return None;
        }
    };

    if reply.conversation_id.is_some() {
        ctx.conversation_id = reply.conversation_id;
    }

    let payload = normalize(&reply.text);
    if payload.is_empty() {
        log(ctx, LogLevel::Warn, "AI returned an empty suggestion");
        return None;
    }

    log(ctx, LogLevel::Success, format!("AI suggested: {payload}"));

    Some(Suggestion {
        raw: reply.text,
        payload,
    })
}

/* ============================================================
   Payload normalization
   ============================================================ */

/// Reduces a free-text answer to the correction payload: first fenced
/// block (or the whole text), first non-empty line, with a bare
/// `locator('...')` call or a surrounding quote pair unwrapped. Other
/// locator calls are kept whole for the applier.
pub fn normalize(raw: &str) -> String {
    let body = fenced_block(raw).unwrap_or(raw);

    let line = body
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();

    if let Some(inner) = unwrap_locator_call(line) {
        return inner;
    }

    unquote(line.trim_end_matches(';')).trim().to_string()
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip the info string (```js, ```typescript, ...).
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(after.len());
    let body = &after[body_start..];
    let end = body.find("```").unwrap_or(body.len());
    Some(&body[..end])
}

static BARE_LOCATOR_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?:await\s+)?(?:page\.)?(?:locator|\$)\(\s*(?:'([^']*)'|"([^"]*)"|`([^`]*)`)\s*\)\s*;?$"#)
        .expect("bare locator call pattern")
});

fn unwrap_locator_call(line: &str) -> Option<String> {
    let caps = BARE_LOCATOR_CALL.captures(line)?;
    (1..=3)
        .find_map(|i| caps.get(i))
        .map(|m| m.as_str().to_string())
}

fn unquote(s: &str) -> &str {
    for q in ['\'', '"', '`'] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}
