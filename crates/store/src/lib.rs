//! Artifact contract store -- the filesystem layout every stage writes
//! to and every downstream stage reads from.
//!
//! Layout per run, per stage:
//!
//! ```text
//! <root>/<stage>/<run_id>/
//!     data/                 output tables (delimited)
//!     reports/              human-readable summaries
//!     _meta/manifest.json   structured run manifest
//!     _meta/data_policy.json  governance policy, when applicable
//!     _meta/transform.json  accepted transform source, when applicable
//!     run_log.txt           execution log
//! <root>/_fingerprints/<stage>.json   fingerprint ledger
//! ```
//!
//! Writes are atomic at stage-directory granularity: files are staged
//! into a temporary sibling directory and published with a single
//! rename only after the manifest is finalized. Published directories
//! are write-once; a second write for the same (stage, run) pair fails
//! with [`StoreError::DuplicateRun`].

pub mod error;
pub mod fingerprint;
pub mod manifest;
pub mod store;

pub use error::StoreError;
pub use fingerprint::{combined_fingerprint, sha256_file, FingerprintLedger, FingerprintRecord};
pub use manifest::{ArtifactManifest, AttemptRecord, FileDescriptor, StageStatus, UpstreamRef};
pub use store::{ArtifactStore, StagedRun};
