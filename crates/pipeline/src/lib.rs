//! Pipeline orchestration: configuration, stage runners, sequencing,
//! and the run report.
//!
//! A pipeline invocation is strictly sequential -- ingest the raw
//! exports, clean them under governance, conform marts, build features,
//! segment -- with run identities threading the lineage, the contract
//! store making every stage auditable, and content fingerprints
//! skipping stages whose inputs are unchanged.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod runlog;
pub mod stages;

pub use config::{Config, DEFAULT_CONFIG_PATH};
pub use error::PipelineError;
pub use orchestrator::{run_pipeline, RunOptions};
pub use report::{RunReport, StageReport};
