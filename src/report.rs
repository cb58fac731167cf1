//! Line-oriented reporting of progress, errors and log messages.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Progress,
    Error,
    Log,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReportKind::Progress => "progress",
            ReportKind::Error => "error",
            ReportKind::Log => "log",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLine {
    pub kind: ReportKind,
    pub trial: Option<u64>,
    pub message: String,
}

/// Receives report lines from every trial. Implementations are shared
/// across worker threads and must return promptly.
pub trait ReportSink: Send + Sync {
    fn report(&self, line: ReportLine);

    fn progress(&self, trial: u64, message: &str) {
        self.report(ReportLine {
            kind: ReportKind::Progress,
            trial: Some(trial),
            message: message.to_string(),
        });
    }

    fn error(&self, trial: Option<u64>, message: &str) {
        self.report(ReportLine {
            kind: ReportKind::Error,
            trial,
            message: message.to_string(),
        });
    }

    fn log(&self, message: &str) {
        self.report(ReportLine {
            kind: ReportKind::Log,
            trial: None,
            message: message.to_string(),
        });
    }
}

/// Forwards report lines to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn report(&self, line: ReportLine) {
        match line.kind {
            ReportKind::Progress => info!(trial = ?line.trial, "{}", line.message),
            ReportKind::Error => error!(trial = ?line.trial, "{}", line.message),
            ReportKind::Log => info!(trial = ?line.trial, "{}", line.message),
        }
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<ReportLine>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<ReportLine> {
        self.lock().clone()
    }

    pub fn lines_of(&self, kind: ReportKind) -> Vec<ReportLine> {
        self.lock()
            .iter()
            .filter(|line| line.kind == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock leaves a usable Vec behind.
    fn lock(&self) -> MutexGuard<'_, Vec<ReportLine>> {
        match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("report sink lock was poisoned");
                poisoned.into_inner()
            }
        }
    }
}

impl ReportSink for MemorySink {
    fn report(&self, line: ReportLine) {
        self.lock().push(line);
    }
}
