//! Clean stage: generated standardization plus governance enforcement.
//! This is the only stage that sees raw personal data; nothing leaves
//! it unprotected.

use strata_core::{RunId, Stage};

use super::generated::{self, GeneratedStage, GovernanceMode};
use super::{StageContext, StageOutcome};
use crate::error::PipelineError;

const OBJECTIVE: &str = "\
Standardize every export for downstream use: trim stray whitespace in \
text columns, normalize date columns to YYYY-MM-DD and drop rows whose \
dates do not parse, normalize numeric columns, and remove duplicate \
rows. Produce one output per input table, named like the input.";

pub fn run(
    ctx: &StageContext,
    lineage: &RunId,
    upstream: &StageOutcome,
) -> Result<StageOutcome, PipelineError> {
    generated::run(
        ctx,
        GeneratedStage {
            stage: Stage::Clean,
            objective: OBJECTIVE,
            mode: GovernanceMode::Enforce,
        },
        lineage,
        upstream,
    )
}
