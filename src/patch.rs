//! patch.rs
//!
//! Textual locator replacement. The rewrite is resolved into explicit
//! (span, original, replacement) edits first, then applied in one pass.
//! The resulting source is never parsed.
//!
//! A selector-string correction goes inside the failing literal. A locator
//! call correction (`getByRole(...)`) replaces the call that owns the
//! literal, so `page.click('#x')` becomes `page.getByRole(...).click()`.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use similar::TextDiff;

use crate::state::TestTarget;
use crate::store::{FileStore, StoreError};

/// Any locator-taking call or `selector:` property followed by a string
/// literal. Used when the failing locator is unknown.
static GENERIC_LOCATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:selector:\s*|(?:locator|\$\$?|click|dblclick|fill|type|press|check|uncheck|hover|waitForSelector|getByText|getByTestId|getByLabel|getByPlaceholder|getByAltText|getByTitle)\(\s*)(?:'([^'\n]*)'|"([^"\n]*)"|`([^`\n]*)`)"#)
        .expect("generic locator pattern")
});

/// `receiver.method(` ending right before a literal.
static CALL_SITE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z_$][\w$]*)\.([A-Za-z]+)\(\s*$").expect("call site pattern")
});

static LOCATOR_EXPR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:await\s+)?(?:page\.)?((?:getBy[A-Za-z]+|locator)\(.*\))\s*;?$")
        .expect("locator expression pattern")
});

static TRAILING_ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*\))\.(?:click|dblclick|fill|type|press|check|uncheck|hover)\(.*\)$")
        .expect("trailing action pattern")
});

const QUOTES: [char; 3] = ['\'', '"', '`'];

const LOCATOR_METHODS: &[&str] = &[
    "locator",
    "getByText",
    "getByTestId",
    "getByLabel",
    "getByPlaceholder",
    "getByAltText",
    "getByTitle",
];

const ACTION_METHODS: &[&str] = &[
    "click", "dblclick", "fill", "type", "press", "check", "uncheck", "hover",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub span: Range<usize>,
    pub original: String,
    pub replacement: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoOpReason {
    EmptySuggestion,
    LocatorNotFound,
    /// A locator call was suggested but the locator is not a call argument.
    NoCallSite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchResult {
    Applied { edits: usize, diff: String },
    NoOp(NoOpReason),
}

/// What the suggestion puts in place of the failing locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correction {
    /// Written into the existing string literal.
    Selector(String),
    /// Receiver-less call chain such as `getByRole('button')`.
    Expression(String),
}

impl Correction {
    pub fn classify(payload: &str) -> Self {
        let payload = payload.trim();

        let Some(caps) = LOCATOR_EXPR.captures(payload) else {
            return Correction::Selector(payload.to_string());
        };
        let expr = caps.get(1).map_or(payload, |m| m.as_str());

        // An action chained by the model is re-attached from the call site.
        let expr = TRAILING_ACTION
            .captures(expr)
            .and_then(|c| c.get(1))
            .map_or(expr, |m| m.as_str());

        Correction::Expression(expr.to_string())
    }
}

/* ============================================================
   Planning
   ============================================================ */

/// Resolves the edits for `payload`. A known locator is only ever replaced
/// where it literally occurs; the generic pattern is used only when the
/// locator is unknown.
pub fn plan(
    source: &str,
    locator: Option<&str>,
    payload: &str,
) -> Result<Vec<Replacement>, NoOpReason> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(NoOpReason::EmptySuggestion);
    }

    let known = locator.filter(|l| !l.is_empty());
    let literals = match known {
        Some(loc) => exact_literals(source, loc),
        None => generic_literals(source),
    };
    if literals.is_empty() {
        return Err(NoOpReason::LocatorNotFound);
    }

    match Correction::classify(payload) {
        Correction::Selector(sel) => {
            let edits = literals.iter().map(|lit| inner_edit(source, lit, &sel));
            Ok(match known {
                Some(_) => edits.collect(),
                None => edits.take(1).collect(),
            })
        }
        Correction::Expression(expr) => {
            let mut edits = literals
                .iter()
                .filter_map(|lit| call_edit(source, lit.clone(), &expr));
            let edits = match known {
                Some(_) => Some(edits.collect::<Vec<_>>()).filter(|e| !e.is_empty()),
                None => edits.next().map(|e| vec![e]),
            };
            edits.ok_or(NoOpReason::NoCallSite)
        }
    }
}

/// Quoted occurrences of `locator`, quotes included, sorted by position.
fn exact_literals(source: &str, locator: &str) -> Vec<Range<usize>> {
    let mut out = Vec::new();

    for q in QUOTES {
        let needle = format!("{q}{locator}{q}");
        for (at, _) in source.match_indices(&needle) {
            out.push(at..at + needle.len());
        }
    }

    out.sort_by_key(|r| r.start);
    out
}

fn generic_literals(source: &str) -> Vec<Range<usize>> {
    GENERIC_LOCATOR
        .captures_iter(source)
        .filter_map(|caps| (1..=3).find_map(|i| caps.get(i)))
        .map(|m| m.start() - 1..m.end() + 1)
        .collect()
}

fn inner_edit(source: &str, lit: &Range<usize>, selector: &str) -> Replacement {
    let quote = source[lit.start..].chars().next().unwrap_or('\'');
    let span = lit.start + 1..lit.end - 1;

    Replacement {
        original: source[span.clone()].to_string(),
        span,
        replacement: escape_for(quote, selector),
    }
}

/// Replaces the call owning `lit` with `receiver.expr`. Locator calls are
/// swapped whole; action calls keep their remaining arguments.
fn call_edit(source: &str, lit: Range<usize>, expr: &str) -> Option<Replacement> {
    let line_start = source[..lit.start].rfind('\n').map_or(0, |i| i + 1);
    let caps = CALL_SITE.captures(&source[line_start..lit.start])?;
    let recv = caps.get(1)?;
    let method = caps.get(2)?.as_str();
    let start = line_start + recv.start();

    let rest = &source[lit.end..];
    let tail = rest.trim_start();
    let ws = rest.len() - tail.len();

    let (end, replacement) = if LOCATOR_METHODS.contains(&method) {
        if !tail.starts_with(')') {
            return None;
        }
        (lit.end + ws + 1, format!("{}.{}", recv.as_str(), expr))
    } else if ACTION_METHODS.contains(&method) {
        let end = if let Some(args) = tail.strip_prefix(',') {
            lit.end + ws + 1 + (args.len() - args.trim_start().len())
        } else if tail.starts_with(')') {
            lit.end + ws
        } else {
            return None;
        };
        (end, format!("{}.{}.{}(", recv.as_str(), expr, method))
    } else {
        return None;
    };

    Some(Replacement {
        span: start..end,
        original: source[start..end].to_string(),
        replacement,
    })
}

fn escape_for(quote: char, payload: &str) -> String {
    let mut out = String::with_capacity(payload.len());
    let mut prev_backslash = false;
    for c in payload.chars() {
        if c == quote && !prev_backslash {
            out.push('\\');
        }
        prev_backslash = c == '\\' && !prev_backslash;
        out.push(c);
    }
    out
}

/// Applies non-overlapping edits sorted by span start.
pub fn apply_plan(source: &str, edits: &[Replacement]) -> String {
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;

    for e in edits {
        if e.span.start < cursor {
            continue;
        }
        out.push_str(&source[cursor..e.span.start]);
        out.push_str(&e.replacement);
        cursor = e.span.end;
    }

    out.push_str(&source[cursor..]);
    out
}

/* ============================================================
   Apply to a target
   ============================================================ */

/// Rewrites `target` in place and writes it back through `store`.
/// A no-op never touches the target or the store.
pub fn apply(
    store: &dyn FileStore,
    target: &mut TestTarget,
    locator: Option<&str>,
    payload: &str,
) -> Result<PatchResult, StoreError> {
    let edits = match plan(&target.source, locator, payload) {
        Ok(e) => e,
        Err(reason) => return Ok(PatchResult::NoOp(reason)),
    };

    let updated = apply_plan(&target.source, &edits);
    let diff = unified_diff(&target.path.display().to_string(), &target.source, &updated);

    store.write(&target.path, &updated)?;
    target.source = updated;

    Ok(PatchResult::Applied {
        edits: edits.len(),
        diff,
    })
}

pub fn unified_diff(name: &str, before: &str, after: &str) -> String {
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(2)
        .header(&format!("a/{name}"), &format!("b/{name}"))
        .to_string()
}
