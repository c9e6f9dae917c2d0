// Executes one Playwright target and returns raw output + an optional
// parsed report. Interpretation of failures happens in extract.rs.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::report::Report;

/// Substrings in stderr that mark a run as failed even with exit code 0.
const ERROR_MARKERS: &[&str] = &["Error:", "npm ERR!"];

const WATCHDOG_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reporter {
    Json,
    Dot,
}

impl Reporter {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Reporter::Json),
            "dot" => Some(Reporter::Dot),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Reporter::Json => "json",
            Reporter::Dot => "dot",
        }
    }
}

/* ---------- errors ---------- */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    Spawn { program: String, message: String },
    TimedOut { target: PathBuf, after: Duration },
    Io(String),
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerError::Spawn { program, message } => {
                write!(f, "test runner `{}` unavailable: {}", program, message)
            }
            RunnerError::TimedOut { target, after } => write!(
                f,
                "test run for {} killed after {}s",
                target.display(),
                after.as_secs()
            ),
            RunnerError::Io(msg) => write!(f, "test runner io error: {}", msg),
        }
    }
}

impl std::error::Error for RunnerError {}

/* ---------- outcome ---------- */

#[derive(Debug, Clone)]
pub enum ReportState {
    Absent,
    Parsed(Report),
    Malformed(String),
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub report: ReportState,
    pub duration_ms: u64,
}

impl RunOutcome {
    pub fn from_output(
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        reporter: Reporter,
        duration_ms: u64,
    ) -> Self {
        let report = match reporter {
            Reporter::Json => parse_report(&stdout),
            Reporter::Dot => ReportState::Absent,
        };

        Self {
            exit_code,
            stdout,
            stderr,
            report,
            duration_ms,
        }
    }

    pub fn structured_report(&self) -> Option<&Report> {
        match &self.report {
            ReportState::Parsed(r) => Some(r),
            _ => None,
        }
    }

    pub fn failed(&self) -> bool {
        if self.exit_code != Some(0) {
            return true;
        }
        if ERROR_MARKERS.iter().any(|m| self.stderr.contains(m)) {
            return true;
        }
        self.structured_report()
            .is_some_and(|r| r.stats.unexpected > 0)
    }

    /// Failing spec files named by the report. Empty when there is no
    /// parsed report.
    pub fn failed_specs(&self) -> Vec<String> {
        self.structured_report()
            .map(Report::failed_spec_files)
            .unwrap_or_default()
    }
}

fn parse_report(stdout: &str) -> ReportState {
    // Config warnings can precede the JSON document.
    let Some(start) = stdout.find('{') else {
        return ReportState::Absent;
    };

    match Report::parse(stdout[start..].trim_end()) {
        Ok(r) => ReportState::Parsed(r),
        Err(e) => ReportState::Malformed(e),
    }
}

/* ---------- runner ---------- */

pub trait TestRunner: Send + Sync {
    fn execute(&self, target: &Path) -> Result<RunOutcome, RunnerError>;
}

#[derive(Debug, Clone)]
pub struct PlaywrightRunner {
    program: String,
    prefix: Vec<String>,
    reporter: Reporter,
    timeout: Option<Duration>,
}

impl PlaywrightRunner {
    /// `command` is the launcher, e.g. `npx playwright`.
    pub fn new(command: &str, reporter: Reporter) -> Result<Self, String> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| "runner command is empty".to_string())?;

        Ok(Self {
            program,
            prefix: parts.collect(),
            reporter,
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command_line(&self, target: &Path) -> Vec<String> {
        let mut argv = vec![self.program.clone()];
        argv.extend(self.prefix.iter().cloned());
        argv.push("test".into());
        argv.push(target.display().to_string());
        argv.push(format!("--reporter={}", self.reporter.as_str()));
        argv
    }

    fn spawn(&self, target: &Path) -> Result<Child, RunnerError> {
        let argv = self.command_line(target);

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .env("FORCE_COLOR", "0")
            .env("PLAYWRIGHT_FORCE_TTY", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group, so the watchdog reaches the browsers and
        // workers the launcher forks.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        cmd.spawn().map_err(|e| RunnerError::Spawn {
            program: self.program.clone(),
            message: e.to_string(),
        })
    }
}

impl TestRunner for PlaywrightRunner {
    fn execute(&self, target: &Path) -> Result<RunOutcome, RunnerError> {
        let started = Instant::now();
        let mut child = self.spawn(target)?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if let Some(status) = child.try_wait().map_err(|e| RunnerError::Io(e.to_string()))? {
                break status;
            }

            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    kill_tree(&mut child);
                    let _ = join_drain(stdout);
                    let _ = join_drain(stderr);
                    return Err(RunnerError::TimedOut {
                        target: target.to_path_buf(),
                        after: limit,
                    });
                }
            }

            thread::sleep(WATCHDOG_POLL);
        };

        let stdout = join_drain(stdout)?;
        let stderr = join_drain(stderr)?;
        let duration_ms = started.elapsed().as_millis() as u64;

        Ok(RunOutcome::from_output(
            status.code(),
            stdout,
            stderr,
            self.reporter,
            duration_ms,
        ))
    }
}

fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        let _ = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
    }
    let _ = child.kill();
    let _ = child.wait();
}

// Pipes are drained on their own threads so a chatty child cannot block on
// a full pipe while we poll for exit.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<std::io::Result<String>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut p) = pipe {
            p.read_to_end(&mut buf)?;
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    })
}

fn join_drain(h: thread::JoinHandle<std::io::Result<String>>) -> Result<String, RunnerError> {
    h.join()
        .map_err(|_| RunnerError::Io("output reader panicked".into()))?
        .map_err(|e| RunnerError::Io(e.to_string()))
}
