use chrono::Local;

use crate::state::{HealContext, LogLevel, LogLine, MAX_LOGS};

pub fn log(ctx: &mut HealContext, level: LogLevel, msg: impl Into<String>) {
    let line = LogLine {
        level,
        text: msg.into(),
        at: Local::now(),
    };

    if ctx.echo {
        eprintln!("[{}] {}", ctx.label, line.render());
    }

    if ctx.logs.len() >= MAX_LOGS {
        ctx.logs.pop_front();
    }

    ctx.logs.push_back(line);
}

/// Logs a unified diff one line per entry so long patches stay readable.
pub fn log_patch(ctx: &mut HealContext, diff: &str) {
    log(ctx, LogLevel::Info, "__PATCH__");
    for line in diff.lines() {
        log(ctx, LogLevel::Info, line);
    }
}
