//! Ingest stage: pull the raw CRM and ERP exports into the artifact
//! store, profile them, and open the run lineage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rand::RngCore;
use strata_core::{runid, runid::iso8601, ProfileSummary, RunIdentity, Stage, Table};
use strata_store::{ArtifactManifest, StageStatus};
use time::OffsetDateTime;

use super::{
    check_fingerprint, publish_skipped, record_fingerprint, write_tables, StageContext,
    StageOutcome,
};
use crate::error::PipelineError;
use crate::report::profile_markdown;
use crate::runlog::RunLog;

const INPUT_SET_ID: &str = "sources:crm+erp";

/// Collect `*.csv` exports from both source directories, sorted by
/// file name. A missing directory fails before any identity is minted.
fn collect_sources(ctx: &StageContext) -> Result<Vec<(String, PathBuf)>, PipelineError> {
    let mut sources = Vec::new();
    for dir in [&ctx.config.source_crm, &ctx.config.source_erp] {
        if !dir.is_dir() {
            return Err(PipelineError::precondition(format!(
                "source directory {} does not exist",
                dir.display()
            )));
        }
        let mut files = list_csv(dir)
            .map_err(|e| PipelineError::precondition(format!("{}: {}", dir.display(), e)))?;
        files.sort();
        for path in files {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if sources.iter().any(|(n, _)| *n == name) {
                return Err(PipelineError::precondition(format!(
                    "duplicate source table name `{}`",
                    name
                )));
            }
            sources.push((name, path));
        }
    }
    if sources.is_empty() {
        return Err(PipelineError::precondition(
            "no *.csv exports found in the source directories",
        ));
    }
    Ok(sources)
}

fn list_csv(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "csv") {
            files.push(path);
        }
    }
    Ok(files)
}

pub fn run(
    ctx: &StageContext,
    rng: &mut dyn RngCore,
    run_id_override: Option<&str>,
) -> Result<StageOutcome, PipelineError> {
    let sources = collect_sources(ctx)?;
    let paths: Vec<PathBuf> = sources.iter().map(|(_, p)| p.clone()).collect();
    let check = check_fingerprint(ctx, Stage::Ingest, INPUT_SET_ID, &paths)?;

    let now = OffsetDateTime::now_utc();
    let identity = match run_id_override {
        Some(raw) => RunIdentity {
            id: strata_core::runid::RunId::parse(raw)?,
            stage: Stage::Ingest,
            created_at: iso8601(now),
        },
        None => runid::mint(Stage::Ingest, None, now, rng)?,
    };

    if let Some(prior) = &check.prior {
        return publish_skipped(ctx, &identity, None, prior);
    }

    let started = Instant::now();
    let started_utc = iso8601(now);
    let staged = ctx.store.begin(Stage::Ingest, &identity.id)?;
    let mut log = RunLog::new();
    log.start(Stage::Ingest, &identity.id);

    // Reading through the table layer validates the exports; a ragged
    // export fails the stage here rather than corrupting downstream.
    let mut tables: BTreeMap<String, Table> = BTreeMap::new();
    for (name, path) in &sources {
        let table = Table::read_csv(name, path)
            .map_err(|e| PipelineError::stage(Stage::Ingest, e))?;
        tables.insert(name.clone(), table);
    }
    let rows: u64 = tables.values().map(|t| t.row_count()).sum();

    let files = write_tables(&staged, &tables, &mut log)?;

    let profile = ProfileSummary::of_tables(tables.values());
    std::fs::write(
        staged.reports_dir().join("profile.md"),
        profile_markdown(&profile),
    )
    .map_err(|e| PipelineError::stage(Stage::Ingest, e))?;

    log.end("success");
    log.write_to(staged.path())
        .map_err(|e| PipelineError::stage(Stage::Ingest, e))?;

    let manifest = ArtifactManifest {
        run_id: identity.id.clone(),
        stage: Stage::Ingest,
        status: StageStatus::Success,
        started_utc,
        ended_utc: iso8601(OffsetDateTime::now_utc()),
        duration_s: started.elapsed().as_secs_f64(),
        upstream: None,
        files,
        rows_in: rows,
        rows_out: rows,
        policy_path: None,
        transform_path: None,
        attempts: Vec::new(),
        error: None,
    };
    staged.publish(&manifest)?;
    record_fingerprint(ctx, Stage::Ingest, INPUT_SET_ID, &check, &identity)?;

    Ok(StageOutcome { identity, manifest })
}
