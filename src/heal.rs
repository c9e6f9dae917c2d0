//! heal.rs
//!
//! Heal loop state machine:
//!
//! INITIAL_RUN -> PASS | DIAGNOSE
//! DIAGNOSE    -> SUGGEST
//! SUGGEST     -> PATCH | GIVE_UP
//! PATCH       -> RERUN | GIVE_UP
//! RERUN       -> HEALED | STILL_FAILING  (or DIAGNOSE while rounds remain)
//!
//! A patch is always followed by a rerun before success is reported. A
//! runner fault after a patch restores the original source first.

use std::fmt;

use serde::Serialize;

use crate::extract::{extract, IssueDescription};
use crate::logger::{log, log_patch};
use crate::patch::{self, NoOpReason, PatchResult};
use crate::runner::{ReportState, RunOutcome, RunnerError, TestRunner};
use crate::state::{HealContext, LogLevel, TestTarget};
use crate::store::{FileStore, StoreError};
use crate::suggest::{suggest, Suggestion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealState {
    InitialRun,
    Diagnose,
    Suggest,
    Patch,
    Rerun,
    Pass,
    Healed,
    StillFailing,
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GiveUpReason {
    NoSuggestion,
    PatchNoOp(NoOpReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealOutcome {
    /// Initial run passed; nothing was healed.
    Passed,
    Healed,
    StillFailing,
    GaveUp(GiveUpReason),
}

impl HealOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            HealOutcome::Passed => "passed",
            HealOutcome::Healed => "healed",
            HealOutcome::StillFailing => "still failing",
            HealOutcome::GaveUp(GiveUpReason::NoSuggestion) => "gave up: no suggestion",
            HealOutcome::GaveUp(GiveUpReason::PatchNoOp(NoOpReason::EmptySuggestion)) => {
                "gave up: empty suggestion"
            }
            HealOutcome::GaveUp(GiveUpReason::PatchNoOp(NoOpReason::LocatorNotFound)) => {
                "gave up: no locator to replace"
            }
            HealOutcome::GaveUp(GiveUpReason::PatchNoOp(NoOpReason::NoCallSite)) => {
                "gave up: locator is not a call argument"
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealResult {
    pub outcome: HealOutcome,
    pub healed: bool,
    pub final_outcome: RunOutcome,
    /// Runner invocations, initial run included.
    pub attempts: usize,
    pub steps: Vec<HealState>,
    pub issue: Option<IssueDescription>,
    pub suggestion: Option<Suggestion>,
}

/* ---------- errors ---------- */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealError {
    Runner(RunnerError),
    Store(StoreError),
}

impl fmt::Display for HealError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealError::Runner(e) => write!(f, "{e}"),
            HealError::Store(e) => write!(f, "file store: {e}"),
        }
    }
}

impl std::error::Error for HealError {}

impl From<RunnerError> for HealError {
    fn from(e: RunnerError) -> Self {
        HealError::Runner(e)
    }
}

impl From<StoreError> for HealError {
    fn from(e: StoreError) -> Self {
        HealError::Store(e)
    }
}

/* ---------- controller ---------- */

pub struct Healer<'a> {
    runner: &'a dyn TestRunner,
    store: &'a dyn FileStore,
}

struct Run {
    steps: Vec<HealState>,
    attempts: usize,
    original: String,
    issue: Option<IssueDescription>,
    suggestion: Option<Suggestion>,
}

impl<'a> Healer<'a> {
    pub fn new(runner: &'a dyn TestRunner, store: &'a dyn FileStore) -> Self {
        Self { runner, store }
    }

    pub fn heal(&self, ctx: &mut HealContext, target: &mut TestTarget) -> Result<HealResult, HealError> {
        let mut run = Run {
            steps: vec![HealState::InitialRun],
            attempts: 0,
            original: target.source.clone(),
            issue: None,
            suggestion: None,
        };

        log(ctx, LogLevel::Info, format!("Running {}", target.path.display()));
        let mut outcome = self.execute(ctx, target, &mut run)?;

        if !outcome.failed() {
            transition(ctx, &mut run, HealState::Pass);
            return self.finish(ctx, target, run, HealOutcome::Passed, outcome);
        }

        log(ctx, LogLevel::Warn, "Test failed, attempting to auto-heal");

        let mut round = 0;
        loop {
            round += 1;

            transition(ctx, &mut run, HealState::Diagnose);
            if let ReportState::Malformed(e) = &outcome.report {
                log(ctx, LogLevel::Warn, format!("Malformed report, falling back to stderr: {e}"));
            }
            let issue = extract(&outcome);
            log(
                ctx,
                LogLevel::Info,
                format!("Issue ({:?}): {}", issue.source, first_line(&issue.text)),
            );

            transition(ctx, &mut run, HealState::Suggest);
            let suggestion = suggest(ctx, &issue);
            let locator = issue.locator.clone();
            run.issue = Some(issue);

            let Some(suggestion) = suggestion else {
                transition(ctx, &mut run, HealState::GiveUp);
                let why = HealOutcome::GaveUp(GiveUpReason::NoSuggestion);
                return self.finish(ctx, target, run, why, outcome);
            };

            transition(ctx, &mut run, HealState::Patch);
            let patched = patch::apply(self.store, target, locator.as_deref(), &suggestion.payload)?;
            run.suggestion = Some(suggestion);

            match patched {
                PatchResult::NoOp(reason) => {
                    log(ctx, LogLevel::Warn, format!("Patch skipped: {:?}", reason));
                    transition(ctx, &mut run, HealState::GiveUp);
                    let why = HealOutcome::GaveUp(GiveUpReason::PatchNoOp(reason));
                    return self.finish(ctx, target, run, why, outcome);
                }
                PatchResult::Applied { edits, diff } => {
                    log(
                        ctx,
                        LogLevel::Success,
                        format!("Correction applied to {} ({} edit(s))", target.path.display(), edits),
                    );
                    log_patch(ctx, &diff);
                }
            }

            transition(ctx, &mut run, HealState::Rerun);
            outcome = match self.execute(ctx, target, &mut run) {
                Ok(o) => o,
                Err(e) => {
                    log(ctx, LogLevel::Error, format!("Rerun failed to start: {e}"));
                    if let Err(store_err) = self.restore(ctx, target, &run.original) {
                        log(
                            ctx,
                            LogLevel::Error,
                            format!("Could not restore {}: {store_err}", target.path.display()),
                        );
                    }
                    return Err(e.into());
                }
            };

            if !outcome.failed() {
                transition(ctx, &mut run, HealState::Healed);
                return self.finish(ctx, target, run, HealOutcome::Healed, outcome);
            }

            if round >= ctx.max_rounds {
                transition(ctx, &mut run, HealState::StillFailing);
                return self.finish(ctx, target, run, HealOutcome::StillFailing, outcome);
            }

            log(
                ctx,
                LogLevel::Warn,
                format!("Still failing after round {}/{}", round, ctx.max_rounds),
            );
        }
    }

    fn execute(
        &self,
        ctx: &mut HealContext,
        target: &TestTarget,
        run: &mut Run,
    ) -> Result<RunOutcome, RunnerError> {
        run.attempts += 1;
        let outcome = self.runner.execute(&target.path)?;

        log(
            ctx,
            LogLevel::Info,
            format!(
                "Run #{} exit={} in {}ms",
                run.attempts,
                outcome
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".into()),
                outcome.duration_ms
            ),
        );

        Ok(outcome)
    }

    fn restore(&self, ctx: &mut HealContext, target: &mut TestTarget, original: &str) -> Result<(), StoreError> {
        if target.source == original {
            return Ok(());
        }
        self.store.write(&target.path, original)?;
        target.source = original.to_string();
        log(ctx, LogLevel::Info, format!("Restored original {}", target.path.display()));
        Ok(())
    }

    fn finish(
        &self,
        ctx: &mut HealContext,
        target: &mut TestTarget,
        run: Run,
        outcome: HealOutcome,
        final_outcome: RunOutcome,
    ) -> Result<HealResult, HealError> {
        let healed = outcome == HealOutcome::Healed;

        if !healed && ctx.revert_unhealed {
            self.restore(ctx, target, &run.original)?;
        }

        let level = match outcome {
            HealOutcome::Passed | HealOutcome::Healed => LogLevel::Success,
            _ => LogLevel::Error,
        };
        log(ctx, level, format!("Result for {}: {}", target.path.display(), outcome.label()));

        Ok(HealResult {
            outcome,
            healed,
            final_outcome,
            attempts: run.attempts,
            steps: run.steps,
            issue: run.issue,
            suggestion: run.suggestion,
        })
    }
}

fn transition(ctx: &mut HealContext, run: &mut Run, next: HealState) {
    if let Some(prev) = run.steps.last() {
        log(ctx, LogLevel::Info, format!("{:?} -> {:?}", prev, next));
    }
    run.steps.push(next);
}

fn first_line(s: &str) -> &str {
    s.trim().lines().next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{failing, passing, CannedBackend, MemoryStore, ScriptedRunner};
    use crate::runner::Reporter;
    use std::path::Path;
    use std::sync::Arc;

    const PATH: &str = "login.spec.js";
    const SRC: &str = "test('login', async ({ page }) => {\n  await page.click('#submit-button');\n});\n";

    fn setup(reply: Option<CannedBackend>) -> (HealContext, Option<Arc<CannedBackend>>) {
        let backend = reply.map(Arc::new);
        let ctx = HealContext::new(PATH, backend.clone().map(|b| b as Arc<dyn crate::llm::backend::ChatBackend>));
        (ctx, backend)
    }

    fn target(store: &MemoryStore) -> TestTarget {
        TestTarget::load(store, Path::new(PATH)).unwrap()
    }

    #[test]
    fn passing_run_skips_suggestion() {
        let runner = ScriptedRunner::new(vec![Ok(passing())]);
        let store = MemoryStore::with_file(PATH, SRC);
        let (mut ctx, backend) = setup(Some(CannedBackend::replying("#new")));
        let mut t = target(&store);

        let r = Healer::new(&runner, &store).heal(&mut ctx, &mut t).unwrap();

        assert_eq!(r.outcome, HealOutcome::Passed);
        assert!(!r.healed);
        assert!(!r.final_outcome.failed());
        assert_eq!(r.attempts, 1);
        assert_eq!(r.steps, vec![HealState::InitialRun, HealState::Pass]);
        assert_eq!(backend.unwrap().calls(), 0);
    }

    #[test]
    fn locator_failure_is_healed() {
        let runner = ScriptedRunner::new(vec![Ok(failing()), Ok(passing())]);
        let store = MemoryStore::with_file(PATH, SRC);
        let (mut ctx, _) = setup(Some(CannedBackend::replying("```\nbutton[type=submit]\n```")));
        let mut t = target(&store);

        let r = Healer::new(&runner, &store).heal(&mut ctx, &mut t).unwrap();

        assert!(r.healed);
        assert_eq!(r.outcome, HealOutcome::Healed);
        assert_eq!(r.attempts, 2);
        assert_eq!(
            r.steps,
            vec![
                HealState::InitialRun,
                HealState::Diagnose,
                HealState::Suggest,
                HealState::Patch,
                HealState::Rerun,
                HealState::Healed
            ]
        );
        assert!(t.source.contains("page.click('button[type=submit]')"));
        assert_eq!(store.get(Path::new(PATH)), Some(t.source.clone()));
        assert!(r.issue.unwrap().text.contains("selector not found"));
    }

    #[test]
    fn empty_suggestion_gives_up_without_rerun() {
        let runner = ScriptedRunner::new(vec![Ok(failing())]);
        let store = MemoryStore::with_file(PATH, SRC);
        let (mut ctx, _) = setup(Some(CannedBackend::replying("")));
        let mut t = target(&store);

        let r = Healer::new(&runner, &store).heal(&mut ctx, &mut t).unwrap();

        assert!(!r.healed);
        assert_eq!(r.outcome, HealOutcome::GaveUp(GiveUpReason::NoSuggestion));
        assert_eq!(runner.calls(), 1);
        assert_eq!(t.source, SRC);
        assert_eq!(store.writes(), 0);
        assert!(r.final_outcome.failed());
    }

    #[test]
    fn transport_rejection_gives_up_after_one_attempt() {
        let runner = ScriptedRunner::new(vec![Ok(failing())]);
        let store = MemoryStore::with_file(PATH, SRC);
        let (mut ctx, _) = setup(Some(CannedBackend::failing("connection reset")));
        let mut t = target(&store);

        let r = Healer::new(&runner, &store).heal(&mut ctx, &mut t).unwrap();

        assert!(!r.healed);
        assert_eq!(r.attempts, 1);
        assert_eq!(r.steps.last(), Some(&HealState::GiveUp));
    }

    #[test]
    fn malformed_report_uses_stderr_for_suggestion() {
        let broken = RunOutcome::from_output(
            Some(1),
            "{ \"stats\": ".into(),
            "Error: waiting for selector \"#submit-button\"".into(),
            Reporter::Json,
            1,
        );
        let runner = ScriptedRunner::new(vec![Ok(broken), Ok(passing())]);
        let store = MemoryStore::with_file(PATH, SRC);
        let (mut ctx, backend) = setup(Some(CannedBackend::replying("#login")));
        let mut t = target(&store);

        let r = Healer::new(&runner, &store).heal(&mut ctx, &mut t).unwrap();

        assert!(r.healed);
        assert!(ctx.has_logged(LogLevel::Warn, "Malformed report"));
        assert!(backend
            .unwrap()
            .last_prompt()
            .unwrap()
            .contains("Error: waiting for selector \"#submit-button\""));
        assert!(t.source.contains("'#login'"));
    }

    #[test]
    fn unpatchable_source_gives_up() {
        let runner = ScriptedRunner::new(vec![Ok(failing())]);
        let store = MemoryStore::with_file(PATH, "// nothing to patch\n");
        let (mut ctx, _) = setup(Some(CannedBackend::replying("#login")));
        let mut t = target(&store);

        let r = Healer::new(&runner, &store).heal(&mut ctx, &mut t).unwrap();

        assert_eq!(
            r.outcome,
            HealOutcome::GaveUp(GiveUpReason::PatchNoOp(NoOpReason::LocatorNotFound))
        );
        assert_eq!(r.attempts, 1);
        assert!(r.suggestion.is_some());
    }

    #[test]
    fn single_round_by_default() {
        let runner = ScriptedRunner::new(vec![Ok(failing()), Ok(failing()), Ok(passing())]);
        let store = MemoryStore::with_file(PATH, SRC);
        let (mut ctx, backend) = setup(Some(CannedBackend::replying("#login")));
        let mut t = target(&store);

        let r = Healer::new(&runner, &store).heal(&mut ctx, &mut t).unwrap();

        assert_eq!(r.outcome, HealOutcome::StillFailing);
        assert!(r.final_outcome.failed());
        assert_eq!(r.attempts, 2);
        assert_eq!(backend.unwrap().calls(), 1);
        assert!(t.source.contains("'#login'"));
    }

    #[test]
    fn extra_rounds_loop_back_to_diagnose() {
        let runner = ScriptedRunner::new(vec![Ok(failing()), Ok(failing()), Ok(passing())]);
        let store = MemoryStore::with_file(PATH, SRC);
        let (ctx, _) = setup(Some(CannedBackend::replying("#login")));
        let mut ctx = ctx.with_policy(3, false);
        let mut t = target(&store);

        let r = Healer::new(&runner, &store).heal(&mut ctx, &mut t).unwrap();

        assert!(r.healed);
        assert_eq!(r.attempts, 3);
        assert_eq!(
            r.steps.iter().filter(|s| **s == HealState::Diagnose).count(),
            2
        );
    }

    #[test]
    fn revert_restores_source_when_unhealed() {
        let runner = ScriptedRunner::new(vec![Ok(failing()), Ok(failing())]);
        let store = MemoryStore::with_file(PATH, SRC);
        let (ctx, _) = setup(Some(CannedBackend::replying("#login")));
        let mut ctx = ctx.with_policy(1, true);
        let mut t = target(&store);

        let r = Healer::new(&runner, &store).heal(&mut ctx, &mut t).unwrap();

        assert_eq!(r.outcome, HealOutcome::StillFailing);
        assert_eq!(t.source, SRC);
        assert_eq!(store.get(Path::new(PATH)).as_deref(), Some(SRC));
    }

    #[test]
    fn call_form_suggestion_rewrites_the_call() {
        let runner = ScriptedRunner::new(vec![Ok(failing()), Ok(passing())]);
        let store = MemoryStore::with_file(PATH, SRC);
        let (mut ctx, _) = setup(Some(CannedBackend::replying(
            "```js\npage.getByRole('button', { name: 'Submit' })\n```",
        )));
        let mut t = target(&store);

        let r = Healer::new(&runner, &store).heal(&mut ctx, &mut t).unwrap();

        assert!(r.healed);
        assert_eq!(
            t.source,
            "test('login', async ({ page }) => {\n  await page.getByRole('button', { name: 'Submit' }).click();\n});\n"
        );
    }

    #[test]
    fn missing_known_locator_leaves_source_untouched() {
        let src = "test('login', async ({ page }) => {\n  await page.fill('#login', 'u');\n  await page.click(SUBMIT);\n});\n";
        let runner = ScriptedRunner::new(vec![Ok(failing())]);
        let store = MemoryStore::with_file(PATH, src);
        let (mut ctx, _) = setup(Some(CannedBackend::replying("#submit")));
        let mut t = target(&store);

        let r = Healer::new(&runner, &store).heal(&mut ctx, &mut t).unwrap();

        assert_eq!(
            r.outcome,
            HealOutcome::GaveUp(GiveUpReason::PatchNoOp(NoOpReason::LocatorNotFound))
        );
        assert_eq!(runner.calls(), 1);
        assert_eq!(t.source, src);
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn runner_fault_survives_failed_restore() {
        let runner = ScriptedRunner::new(vec![
            Ok(failing()),
            Err(RunnerError::TimedOut {
                target: PATH.into(),
                after: std::time::Duration::from_secs(1),
            }),
        ]);
        let store = MemoryStore::with_file(PATH, SRC).failing_after(1);
        let (mut ctx, _) = setup(Some(CannedBackend::replying("#login")));
        let mut t = target(&store);

        let err = Healer::new(&runner, &store).heal(&mut ctx, &mut t).unwrap_err();

        assert!(matches!(err, HealError::Runner(RunnerError::TimedOut { .. })));
        assert!(ctx.has_logged(LogLevel::Error, "Could not restore"));
    }

    #[test]
    fn runner_unavailable_surfaces() {
        let runner = ScriptedRunner::new(vec![Err(RunnerError::Spawn {
            program: "npx".into(),
            message: "not found".into(),
        })]);
        let store = MemoryStore::with_file(PATH, SRC);
        let (mut ctx, _) = setup(None);
        let mut t = target(&store);

        let err = Healer::new(&runner, &store).heal(&mut ctx, &mut t).unwrap_err();
        assert!(matches!(err, HealError::Runner(RunnerError::Spawn { .. })));
    }

    #[test]
    fn rerun_fault_restores_patched_source() {
        let runner = ScriptedRunner::new(vec![
            Ok(failing()),
            Err(RunnerError::TimedOut {
                target: PATH.into(),
                after: std::time::Duration::from_secs(1),
            }),
        ]);
        let store = MemoryStore::with_file(PATH, SRC);
        let (mut ctx, _) = setup(Some(CannedBackend::replying("#login")));
        let mut t = target(&store);

        let err = Healer::new(&runner, &store).heal(&mut ctx, &mut t).unwrap_err();

        assert!(matches!(err, HealError::Runner(RunnerError::TimedOut { .. })));
        assert_eq!(t.source, SRC);
        assert_eq!(store.get(Path::new(PATH)).as_deref(), Some(SRC));
    }
}
