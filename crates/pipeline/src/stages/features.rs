//! Feature stage: per-entity aggregates over the conformed marts.

use strata_core::{RunId, Stage};

use super::generated::{self, GeneratedStage, GovernanceMode};
use super::{load_policy, StageContext, StageOutcome};
use crate::error::PipelineError;

const OBJECTIVE: &str = "\
Build per-entity feature tables: for every keyed mart, group by the \
identifier and produce a record count plus the sum and mean of each \
numeric measure, named <measure>_sum and <measure>_mean.";

pub fn run(
    ctx: &StageContext,
    lineage: &RunId,
    upstream: &StageOutcome,
) -> Result<StageOutcome, PipelineError> {
    let policy = load_policy(ctx.store, &upstream.manifest, Stage::Feature)?;
    generated::run(
        ctx,
        GeneratedStage {
            stage: Stage::Feature,
            objective: OBJECTIVE,
            mode: GovernanceMode::Audit(&policy),
        },
        lineage,
        upstream,
    )
}
