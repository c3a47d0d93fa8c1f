//! Human-facing summaries: the per-run stage report the CLI prints and
//! the markdown profiling report written under `reports/`.

use serde::Serialize;
use strata_core::{ProfileSummary, RunId, Stage};
use strata_store::StageStatus;

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub run_id: RunId,
    pub status: StageStatus,
    pub rows_in: u64,
    pub rows_out: u64,
    pub attempts: u32,
    pub duration_s: f64,
}

/// Summary of one pipeline invocation, stage by stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
}

impl RunReport {
    pub fn push(&mut self, stage: StageReport) {
        self.stages.push(stage);
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for s in &self.stages {
            let status = match s.status {
                StageStatus::Success => "success",
                StageStatus::Failed => "failed",
                StageStatus::Skipped => "skipped",
            };
            out.push_str(&format!(
                "{:<8} {:<10} run={} rows_in={} rows_out={} attempts={} ({:.2}s)\n",
                s.stage, status, s.run_id, s.rows_in, s.rows_out, s.attempts, s.duration_s
            ));
        }
        out
    }
}

/// Render a data profile as markdown for `reports/profile.md`.
pub fn profile_markdown(summary: &ProfileSummary) -> String {
    let mut out = String::from("# Data profile\n");
    for (name, table) in &summary.tables {
        out.push_str(&format!(
            "\n## {} ({} rows, {} duplicate)\n\n",
            name, table.rows, table.duplicate_rows
        ));
        out.push_str("| column | type | nulls | distinct |\n");
        out.push_str("|--------|------|-------|----------|\n");
        for c in &table.columns {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                c.name,
                serde_json::to_value(c.inferred)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
                c.nulls,
                c.distinct
            ));
        }
        if !table.key_candidates.is_empty() {
            out.push_str(&format!(
                "\nKey candidates: {}\n",
                table.key_candidates.join(", ")
            ));
        }
    }
    out
}
