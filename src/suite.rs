//! suite.rs
//!
//! Runs a target once, then heals each failing spec with its own
//! controller and context. Workers pull specs from a shared queue; results
//! come back over a channel and are re-ordered to match the report.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use crossbeam_channel::unbounded;
use serde::Serialize;
use walkdir::WalkDir;

use crate::heal::{HealOutcome, HealState, Healer};
use crate::llm::backend::ChatBackend;
use crate::runner::{RunOutcome, RunnerError, TestRunner};
use crate::state::{HealContext, LogLine, TestTarget};
use crate::store::FileStore;

const SPEC_SUFFIXES: &[&str] = &[
    ".spec.js", ".spec.ts", ".spec.mjs", ".test.js", ".test.ts", ".test.mjs",
];

#[derive(Debug, Clone)]
pub struct SuiteOptions {
    pub auto_heal: bool,
    pub parallel: usize,
    pub max_rounds: usize,
    pub revert_unhealed: bool,
    pub echo: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub path: String,
    pub outcome: String,
    pub healed: bool,
    pub attempts: usize,
    pub exit_code: Option<i32>,
    pub steps: Vec<HealState>,
    pub issue: Option<String>,
    pub suggestion: Option<String>,
    pub error: Option<String>,
    pub conversation_id: Option<String>,
    /// Heal log for this target, oldest first.
    pub logs: Vec<String>,
    #[serde(skip)]
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteSummary {
    pub run_id: String,
    pub target: String,
    pub started_at: String,
    pub finished_at: String,
    pub initial_failed: bool,
    pub auto_heal: bool,
    pub passing: Vec<String>,
    pub healed: Vec<String>,
    pub failed: Vec<String>,
    pub targets: Vec<TargetReport>,
}

impl SuiteSummary {
    fn new(target: &Path, auto_heal: bool) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            target: target.display().to_string(),
            started_at: Utc::now().to_rfc3339(),
            finished_at: String::new(),
            initial_failed: false,
            auto_heal,
            passing: Vec::new(),
            healed: Vec::new(),
            failed: Vec::new(),
            targets: Vec::new(),
        }
    }

    pub fn all_green(&self) -> bool {
        self.failed.is_empty()
    }
}

/* ============================================================
   Entry point
   ============================================================ */

pub fn heal_suite(
    runner: &dyn TestRunner,
    store: &dyn FileStore,
    backend: Option<Arc<dyn ChatBackend>>,
    target: &Path,
    opts: &SuiteOptions,
) -> Result<SuiteSummary, RunnerError> {
    let mut summary = SuiteSummary::new(target, opts.auto_heal);

    let initial = runner.execute(target)?;
    let specs = failing_targets(target, &initial);
    summary.initial_failed = initial.failed();

    if !summary.initial_failed {
        summary.passing = spec_candidates(target).iter().map(|p| p.display().to_string()).collect();
        summary.finished_at = Utc::now().to_rfc3339();
        return Ok(summary);
    }

    if !opts.auto_heal {
        summary.failed = specs.iter().map(|p| p.display().to_string()).collect();
        summary.finished_at = Utc::now().to_rfc3339();
        return Ok(summary);
    }

    for report in heal_all(runner, store, backend, &specs, opts) {
        if report.healed {
            summary.healed.push(report.path.clone());
        } else if report.passed {
            summary.passing.push(report.path.clone());
        } else {
            summary.failed.push(report.path.clone());
        }
        summary.targets.push(report);
    }

    summary.finished_at = Utc::now().to_rfc3339();
    Ok(summary)
}

fn heal_all(
    runner: &dyn TestRunner,
    store: &dyn FileStore,
    backend: Option<Arc<dyn ChatBackend>>,
    specs: &[PathBuf],
    opts: &SuiteOptions,
) -> Vec<TargetReport> {
    let (job_tx, job_rx) = unbounded::<(usize, PathBuf)>();
    let (res_tx, res_rx) = unbounded::<(usize, TargetReport)>();

    for (i, spec) in specs.iter().enumerate() {
        let _ = job_tx.send((i, spec.clone()));
    }
    drop(job_tx);

    let workers = opts.parallel.max(1).min(specs.len().max(1));

    thread::scope(|s| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let res_tx = res_tx.clone();
            let backend = backend.clone();

            s.spawn(move || {
                for (i, spec) in job_rx.iter() {
                    let report = heal_one(runner, store, backend.clone(), &spec, opts);
                    let _ = res_tx.send((i, report));
                }
            });
        }
    });
    drop(res_tx);

    let mut results: Vec<(usize, TargetReport)> = res_rx.iter().collect();
    results.sort_by_key(|(i, _)| *i);
    results.into_iter().map(|(_, r)| r).collect()
}

fn heal_one(
    runner: &dyn TestRunner,
    store: &dyn FileStore,
    backend: Option<Arc<dyn ChatBackend>>,
    spec: &Path,
    opts: &SuiteOptions,
) -> TargetReport {
    let path = spec.display().to_string();
    let mut ctx = HealContext::new(path.clone(), backend)
        .with_policy(opts.max_rounds, opts.revert_unhealed)
        .with_echo(opts.echo);

    let mut report = TargetReport {
        path,
        outcome: "error".into(),
        healed: false,
        attempts: 0,
        exit_code: None,
        steps: Vec::new(),
        issue: None,
        suggestion: None,
        error: None,
        conversation_id: None,
        logs: Vec::new(),
        passed: false,
    };

    let mut target = match TestTarget::load(store, spec) {
        Ok(t) => t,
        Err(e) => {
            report.error = Some(e.to_string());
            return report;
        }
    };

    match Healer::new(runner, store).heal(&mut ctx, &mut target) {
        Ok(result) => {
            report.outcome = result.outcome.label().to_string();
            report.healed = result.healed;
            report.passed = result.outcome == HealOutcome::Passed;
            report.attempts = result.attempts;
            report.exit_code = result.final_outcome.exit_code;
            report.steps = result.steps;
            report.issue = result.issue.map(|i| i.text);
            report.suggestion = result.suggestion.map(|s| s.payload);
        }
        Err(e) => report.error = Some(e.to_string()),
    }

    report.conversation_id = ctx.conversation_id.take();
    report.logs = ctx.logs.iter().map(LogLine::render).collect();
    report
}

/* ============================================================
   Target resolution
   ============================================================ */

/// Spec files under `dir`, sorted, skipping `node_modules`.
pub fn discover_specs(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| e.file_name() != "node_modules")
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            SPEC_SUFFIXES.iter().any(|s| name.ends_with(s))
        })
        .map(|e| e.into_path())
        .collect();

    out.sort();
    out
}

fn spec_candidates(target: &Path) -> Vec<PathBuf> {
    if target.is_dir() {
        discover_specs(target)
    } else {
        vec![target.to_path_buf()]
    }
}

/// Maps the report's failing spec names onto local files. Without usable
/// names every candidate under the target is healed.
pub fn failing_targets(target: &Path, outcome: &RunOutcome) -> Vec<PathBuf> {
    let candidates = spec_candidates(target);

    let mut resolved: Vec<PathBuf> = Vec::new();
    for name in outcome.failed_specs() {
        let hit = candidates
            .iter()
            .find(|c| c.ends_with(&name))
            .cloned()
            .or_else(|| Some(PathBuf::from(&name)).filter(|p| p.is_file()));

        if let Some(p) = hit {
            if !resolved.contains(&p) {
                resolved.push(p);
            }
        }
    }

    if resolved.is_empty() {
        candidates
    } else {
        resolved
    }
}
