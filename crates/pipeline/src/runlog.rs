//! Per-run execution log, written as `run_log.txt` in the staged
//! directory before publish.

use std::path::Path;

use strata_core::{runid::iso8601, RunId, Stage};
use time::OffsetDateTime;

/// Line-oriented log: `RUN_START`, one line per produced file, and a
/// closing `RUN_END` with the final status.
#[derive(Debug, Default)]
pub struct RunLog {
    lines: Vec<String>,
}

impl RunLog {
    pub fn new() -> RunLog {
        RunLog::default()
    }

    fn push(&mut self, message: &str) {
        self.lines
            .push(format!("{} {}", iso8601(OffsetDateTime::now_utc()), message));
    }

    pub fn start(&mut self, stage: Stage, run_id: &RunId) {
        self.push(&format!("RUN_START stage={} run={}", stage, run_id));
    }

    pub fn file(&mut self, name: &str, rows: u64) {
        self.push(&format!("SUCCESS file={} rows={}", name, rows));
    }

    pub fn attempt_rejected(&mut self, attempt: u32, kind: &str, reason: &str) {
        self.push(&format!(
            "REJECTED attempt={} kind={} reason={}",
            attempt, kind, reason
        ));
    }

    pub fn end(&mut self, status: &str) {
        self.push(&format!("RUN_END status={}", status));
    }

    pub fn write_to(&self, dir: &Path) -> std::io::Result<()> {
        let mut content = self.lines.join("\n");
        content.push('\n');
        std::fs::write(dir.join("run_log.txt"), content)
    }
}
