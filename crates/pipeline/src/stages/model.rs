//! Model stage: conform the cleaned tables into keyed dimensions.

use strata_core::{RunId, Stage};

use super::generated::{self, GeneratedStage, GovernanceMode};
use super::{load_policy, StageContext, StageOutcome};
use crate::error::PipelineError;

const OBJECTIVE: &str = "\
Conform the cleaned tables into analysis-ready marts: for every table \
with an identifier column, produce dim_<entity> deduplicated on that \
identifier so each entity appears exactly once. Keep all remaining \
columns.";

pub fn run(
    ctx: &StageContext,
    lineage: &RunId,
    upstream: &StageOutcome,
) -> Result<StageOutcome, PipelineError> {
    let policy = load_policy(ctx.store, &upstream.manifest, Stage::Model)?;
    generated::run(
        ctx,
        GeneratedStage {
            stage: Stage::Model,
            objective: OBJECTIVE,
            mode: GovernanceMode::Audit(&policy),
        },
        lineage,
        upstream,
    )
}
