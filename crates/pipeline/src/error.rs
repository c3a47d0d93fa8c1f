//! Pipeline error taxonomy and the process exit codes it maps to.

use strata_core::Stage;
use strata_govern::GovernError;
use strata_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Broken before any identity was minted: missing sources, bad
    /// configuration, malformed upstream lineage. Never retried.
    #[error("precondition failed: {message}")]
    Precondition { message: String },

    /// The artifact contract was violated: duplicate run, lost
    /// fingerprint race, unreadable store state. Never retried.
    #[error("contract violation: {0}")]
    Contract(#[from] StoreError),

    /// Personal data escaped or could not be protected. Fatal for the
    /// stage, never retried.
    #[error("governance violation at {stage}: {source}")]
    Governance { stage: Stage, source: GovernError },

    /// A stage failed -- the generation engine exhausted its retry
    /// ceiling, or IO under the stage broke.
    #[error("stage {stage} failed: {message}")]
    Stage { stage: Stage, message: String },
}

impl PipelineError {
    pub fn precondition(message: impl Into<String>) -> PipelineError {
        PipelineError::Precondition {
            message: message.into(),
        }
    }

    pub fn stage(stage: Stage, message: impl std::fmt::Display) -> PipelineError {
        PipelineError::Stage {
            stage,
            message: message.to_string(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Precondition { .. } => 2,
            PipelineError::Contract(_) => 3,
            PipelineError::Governance { .. } => 4,
            PipelineError::Stage { stage, .. } => stage.exit_code(),
        }
    }
}

impl From<strata_core::RunIdError> for PipelineError {
    fn from(e: strata_core::RunIdError) -> PipelineError {
        PipelineError::precondition(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_taxonomy() {
        assert_eq!(PipelineError::precondition("x").exit_code(), 2);
        assert_eq!(
            PipelineError::Contract(StoreError::FingerprintRace {
                stage: "clean".into()
            })
            .exit_code(),
            3
        );
        assert_eq!(
            PipelineError::Governance {
                stage: Stage::Model,
                source: GovernError::Violation {
                    table: "t".into(),
                    column: "email".into()
                }
            }
            .exit_code(),
            4
        );
        assert_eq!(PipelineError::stage(Stage::Ingest, "boom").exit_code(), 20);
        assert_eq!(PipelineError::stage(Stage::Segment, "boom").exit_code(), 24);
    }
}
