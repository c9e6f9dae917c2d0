mod config;
mod extract;
mod heal;
mod llm;
mod logger;
mod patch;
mod persistence;
mod report;
mod runner;
mod state;
mod store;
mod suggest;
mod suite;

#[cfg(test)]
mod fakes;

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};

use crate::config::HealConfig;
use crate::llm::backend::{select_backend, BackendSettings};
use crate::runner::{PlaywrightRunner, Reporter};
use crate::store::FsStore;
use crate::suite::{SuiteOptions, SuiteSummary};

#[derive(Parser)]
#[command(
    name = "playheal",
    version,
    about = "Runs Playwright tests and repairs broken locators with an LLM."
)]
struct Cli {
    #[arg(long, help = "Path to the spec file (or directory of specs) to run")]
    test_file: PathBuf,

    #[arg(short, long, help = "AI model used for suggestions (gpt-4, gpt-3, claude, ...)")]
    model: Option<String>,

    #[arg(short = 'a', long, action = ArgAction::Set, help = "Enable auto-healing (true/false)")]
    auto_heal: Option<bool>,

    #[arg(long, help = "Test launcher command, e.g. \"npx playwright\"")]
    runner: Option<String>,

    #[arg(long, help = "Reporter requested from the runner: json | dot")]
    reporter: Option<String>,

    #[arg(long, help = "Heal rounds per spec before giving up")]
    max_rounds: Option<usize>,

    #[arg(long, help = "Kill a test run after this many seconds")]
    run_timeout: Option<u64>,

    #[arg(long, help = "Specs healed concurrently")]
    parallel: Option<usize>,

    #[arg(long, default_value_t = false, help = "Restore the original source of specs that stay red")]
    revert_unhealed: bool,

    #[arg(short, long, default_value_t = false, help = "Echo heal logs to stderr")]
    verbose: bool,

    #[arg(long, help = "Where to write the JSON run report")]
    report: Option<PathBuf>,

    #[arg(long, help = "Config file (default: <config dir>/playheal/config.toml)")]
    config: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, cfg: &mut HealConfig) {
        if let Some(m) = &self.model {
            cfg.model = m.clone();
        }
        if let Some(a) = self.auto_heal {
            cfg.auto_heal = a;
        }
        if let Some(r) = &self.runner {
            cfg.runner = r.clone();
        }
        if let Some(r) = &self.reporter {
            cfg.reporter = r.clone();
        }
        if let Some(n) = self.max_rounds {
            cfg.max_rounds = n;
        }
        if let Some(t) = self.run_timeout {
            cfg.run_timeout_secs = Some(t);
        }
        if let Some(p) = self.parallel {
            cfg.parallel = p;
        }
        cfg.revert_unhealed |= self.revert_unhealed;
        cfg.verbose |= self.verbose;
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("playheal: {e}");
            ExitCode::from(2)
        }
    }
}

fn run() -> Result<ExitCode, Box<dyn Error>> {
    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => {
            let mut cfg = config::load_from(path)?;
            cfg.apply_env(|k| std::env::var(k).ok());
            cfg
        }
        None => config::load()?,
    };
    cli.apply(&mut cfg);

    let reporter = Reporter::parse(&cfg.reporter)
        .ok_or_else(|| format!("unknown reporter `{}` (expected json or dot)", cfg.reporter))?;
    let runner = PlaywrightRunner::new(&cfg.runner, reporter)?.with_timeout(cfg.run_timeout());

    let backend = if cfg.auto_heal {
        let settings = BackendSettings::from_env(&cfg.model, cfg.base_url.clone(), cfg.ai_timeout());
        match select_backend(&settings) {
            Ok(b) => Some(b),
            Err(e) => {
                eprintln!("warning: AI backend unavailable ({e}); failing tests cannot be healed");
                None
            }
        }
    } else {
        None
    };

    let opts = SuiteOptions {
        auto_heal: cfg.auto_heal,
        parallel: cfg.parallel,
        max_rounds: cfg.max_rounds,
        revert_unhealed: cfg.revert_unhealed,
        echo: cfg.verbose,
    };

    let summary = suite::heal_suite(&runner, &FsStore, backend, &cli.test_file, &opts)?;
    print_summary(&summary);

    let report_path = match cli.report {
        Some(p) => p,
        None => persistence::default_report_path(&std::env::current_dir()?),
    };
    if let Err(e) = persistence::save_report(&report_path, &summary) {
        eprintln!("warning: could not write report {}: {e}", report_path.display());
    }

    Ok(if summary.all_green() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_summary(s: &SuiteSummary) {
    if !s.initial_failed {
        println!("All tests passed; nothing to heal.");
        return;
    }

    if !s.auto_heal {
        println!("Auto-healing is not enabled. {} failing spec(s):", s.failed.len());
        for f in &s.failed {
            println!("  - {f}");
        }
        return;
    }

    println!("Attempted to heal {} failing spec(s).", s.targets.len());
    for t in &s.targets {
        match &t.error {
            Some(e) => println!("Result for {}: error ({e})", t.path),
            None => println!(
                "Result for {}: {} after {} run(s)",
                t.path, t.outcome, t.attempts
            ),
        }
        if let Some(sugg) = &t.suggestion {
            println!("    suggestion: {sugg}");
        }
    }

    println!(
        "passing: {}  healed: {}  failed: {}",
        s.passing.len(),
        s.healed.len(),
        s.failed.len()
    );
}
