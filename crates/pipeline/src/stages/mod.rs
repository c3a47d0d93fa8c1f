//! Stage runners and the plumbing they share: input loading,
//! fingerprint skip checks, output publishing.

pub mod clean;
pub mod features;
pub mod generated;
pub mod ingest;
pub mod model;
pub mod segment;

use std::collections::BTreeMap;
use std::path::PathBuf;

use strata_core::{runid::iso8601, RunIdentity, Stage, Table};
use strata_engine::TransformGenerator;
use strata_store::{
    combined_fingerprint, sha256_file, ArtifactManifest, ArtifactStore, FileDescriptor,
    FingerprintLedger, FingerprintRecord, StageStatus, StagedRun, UpstreamRef,
};
use time::OffsetDateTime;

use crate::config::Config;
use crate::error::PipelineError;
use crate::runlog::RunLog;

/// Everything a stage runner needs besides its own inputs.
pub struct StageContext<'a> {
    pub store: &'a ArtifactStore,
    pub ledger: &'a FingerprintLedger,
    pub config: &'a Config,
    pub generator: &'a dyn TransformGenerator,
}

/// What a completed stage hands to the next one.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub identity: RunIdentity,
    pub manifest: ArtifactManifest,
}

impl StageOutcome {
    pub fn upstream_ref(&self) -> UpstreamRef {
        UpstreamRef {
            stage: self.identity.stage,
            run_id: self.identity.id.clone(),
        }
    }
}

/// Absolute paths of a run's published data files.
pub(crate) fn data_paths(store: &ArtifactStore, manifest: &ArtifactManifest) -> Vec<PathBuf> {
    manifest
        .files
        .iter()
        .filter(|f| f.path.contains("/data/"))
        .map(|f| store.resolve(&f.path))
        .collect()
}

/// Load a run's published data files as in-memory tables, named by
/// file stem.
pub(crate) fn load_tables(
    store: &ArtifactStore,
    manifest: &ArtifactManifest,
    stage: Stage,
) -> Result<BTreeMap<String, Table>, PipelineError> {
    let mut tables = BTreeMap::new();
    for descriptor in &manifest.files {
        if !descriptor.path.contains("/data/") {
            continue;
        }
        let path = store.resolve(&descriptor.path);
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let table =
            Table::read_csv(&name, &path).map_err(|e| PipelineError::stage(stage, e))?;
        tables.insert(name, table);
    }
    Ok(tables)
}

/// Load the governance policy a run published alongside its data.
pub(crate) fn load_policy(
    store: &ArtifactStore,
    manifest: &ArtifactManifest,
    stage: Stage,
) -> Result<strata_govern::GovernancePolicy, PipelineError> {
    // A governed upstream without an emitted policy is itself a
    // governance gap, not a missing file.
    let relative = manifest.policy_path.as_deref().ok_or_else(|| {
        PipelineError::Governance {
            stage,
            source: strata_govern::GovernError::Violation {
                table: format!("{}/{}", manifest.stage, manifest.run_id),
                column: "*".to_string(),
            },
        }
    })?;
    let path = store.resolve(relative);
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| PipelineError::stage(stage, format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&raw)
        .map_err(|e| PipelineError::stage(stage, format!("{}: {}", path.display(), e)))
}

/// Result of the incremental fingerprint check for one stage.
pub(crate) struct SkipCheck {
    pub fingerprint: String,
    /// Record currently in the ledger; the CAS expectation on update.
    pub stored: Option<FingerprintRecord>,
    /// Prior successful manifest, when the stage can be skipped.
    pub prior: Option<ArtifactManifest>,
}

/// A stage may be skipped only when the input fingerprint matches the
/// ledger and the recorded run is still published with status success.
pub(crate) fn check_fingerprint(
    ctx: &StageContext,
    stage: Stage,
    input_set_id: &str,
    paths: &[PathBuf],
) -> Result<SkipCheck, PipelineError> {
    let fingerprint = combined_fingerprint(paths)?;
    let stored = ctx.ledger.load(stage)?;
    let prior = match &stored {
        Some(record)
            if record.combined_hash == fingerprint && record.input_set_id == input_set_id =>
        {
            match ctx.store.read(stage, &record.last_successful_run_id) {
                Ok(manifest) if manifest.status == StageStatus::Success => Some(manifest),
                _ => None,
            }
        }
        _ => None,
    };
    Ok(SkipCheck {
        fingerprint,
        stored,
        prior,
    })
}

/// Record a fresh successful run in the ledger, compare-and-swap
/// against what the skip check observed.
pub(crate) fn record_fingerprint(
    ctx: &StageContext,
    stage: Stage,
    input_set_id: &str,
    check: &SkipCheck,
    identity: &RunIdentity,
) -> Result<(), PipelineError> {
    let record = FingerprintRecord {
        input_set_id: input_set_id.to_string(),
        combined_hash: check.fingerprint.clone(),
        last_successful_run_id: identity.id.clone(),
    };
    ctx.ledger
        .update(stage, check.stored.as_ref(), &record)
        .map_err(PipelineError::from)
}

/// Publish a manifest-only directory for a skipped stage. The fresh
/// identity gets its own run directory; its file descriptors keep
/// pointing at the prior run's data.
pub(crate) fn publish_skipped(
    ctx: &StageContext,
    identity: &RunIdentity,
    upstream: Option<UpstreamRef>,
    prior: &ArtifactManifest,
) -> Result<StageOutcome, PipelineError> {
    let staged = ctx.store.begin(identity.stage, &identity.id)?;
    let mut log = RunLog::new();
    log.start(identity.stage, &identity.id);
    log.end("skipped");
    log.write_to(staged.path())
        .map_err(|e| PipelineError::stage(identity.stage, e))?;

    let now = iso8601(OffsetDateTime::now_utc());
    let manifest = ArtifactManifest {
        run_id: identity.id.clone(),
        stage: identity.stage,
        status: StageStatus::Skipped,
        started_utc: now.clone(),
        ended_utc: now,
        duration_s: 0.0,
        upstream,
        files: prior.files.clone(),
        rows_in: prior.rows_in,
        rows_out: prior.rows_out,
        policy_path: prior.policy_path.clone(),
        transform_path: prior.transform_path.clone(),
        attempts: Vec::new(),
        error: None,
    };
    staged.publish(&manifest)?;
    Ok(StageOutcome {
        identity: identity.clone(),
        manifest,
    })
}

/// Write output tables under the staged `data/` directory and describe
/// them for the manifest.
pub(crate) fn write_tables(
    staged: &StagedRun,
    tables: &BTreeMap<String, Table>,
    log: &mut RunLog,
) -> Result<Vec<FileDescriptor>, PipelineError> {
    let stage = staged.stage();
    let mut files = Vec::new();
    for (name, table) in tables {
        let file_name = format!("{}.csv", name);
        let path = staged.data_dir().join(&file_name);
        table
            .write_csv(&path)
            .map_err(|e| PipelineError::stage(stage, e))?;
        let sha256 = sha256_file(&path)?;
        files.push(FileDescriptor {
            path: format!(
                "{}/{}/data/{}",
                stage.dir_name(),
                staged.run_id(),
                file_name
            ),
            rows: table.row_count(),
            columns: table.columns.clone(),
            sha256,
        });
        log.file(&file_name, table.row_count());
    }
    Ok(files)
}

/// Publish a failed manifest so exhausted or violated runs leave a
/// first-class audit record, then hand back the error mapping.
pub(crate) fn publish_failed(
    ctx: &StageContext,
    identity: &RunIdentity,
    upstream: Option<UpstreamRef>,
    rows_in: u64,
    started_utc: String,
    duration_s: f64,
    attempts: Vec<strata_store::AttemptRecord>,
    error: String,
) -> Result<(), PipelineError> {
    let staged = ctx.store.begin(identity.stage, &identity.id)?;
    let mut log = RunLog::new();
    log.start(identity.stage, &identity.id);
    for a in &attempts {
        log.attempt_rejected(a.attempt, &a.kind, &a.reason);
    }
    log.end("failed");
    log.write_to(staged.path())
        .map_err(|e| PipelineError::stage(identity.stage, e))?;

    let manifest = ArtifactManifest {
        run_id: identity.id.clone(),
        stage: identity.stage,
        status: StageStatus::Failed,
        started_utc,
        ended_utc: iso8601(OffsetDateTime::now_utc()),
        duration_s,
        upstream,
        files: Vec::new(),
        rows_in,
        rows_out: 0,
        policy_path: None,
        transform_path: None,
        attempts,
        error: Some(error),
    };
    staged.publish(&manifest)?;
    Ok(())
}
