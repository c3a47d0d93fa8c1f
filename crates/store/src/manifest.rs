//! Run manifests -- the append-only, per-run, per-stage record of what
//! a stage produced, where it came from, and how the attempt went.

use serde::{Deserialize, Serialize};
use strata_core::{RunId, Stage};

/// Final status of a stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Success,
    Failed,
    Skipped,
}

/// One produced (or referenced) artifact file.
///
/// `path` is always relative to the artifact root, so a skipped run's
/// manifest can reference the prior run's files without copying them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub path: String,
    pub rows: u64,
    pub columns: Vec<String>,
    pub sha256: String,
}

/// Reference to the upstream run this stage derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamRef {
    pub stage: Stage,
    pub run_id: RunId,
}

/// Audit record of one generation attempt that was rejected.
///
/// Kept in the manifest even when a later attempt succeeded -- the
/// rejection history is first-class audit material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub kind: String,
    pub reason: String,
}

/// Structured record of a stage invocation, persisted as
/// `_meta/manifest.json` inside the run directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub run_id: RunId,
    pub stage: Stage,
    pub status: StageStatus,
    pub started_utc: String,
    pub ended_utc: String,
    pub duration_s: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamRef>,
    pub files: Vec<FileDescriptor>,
    pub rows_in: u64,
    pub rows_out: u64,
    /// Relative path of the governance policy artifact, when one was emitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_path: Option<String>,
    /// Relative path of the persisted accepted transform source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<AttemptRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ArtifactManifest {
    pub fn total_output_rows(&self) -> u64 {
        self.files.iter().map(|f| f.rows).sum()
    }
}
