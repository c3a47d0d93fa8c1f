//! Shared runner for the stages whose transforms are drafted by the
//! generation engine (clean, model, feature). The stages differ only
//! in objective and in how governance participates.

use std::collections::BTreeSet;
use std::time::Instant;

use strata_core::{runid, runid::iso8601, RunId, Stage};
use strata_engine::EngineError;
use strata_govern::{apply, audit, classify, salt_fingerprint, GovernError, GovernancePolicy};
use strata_store::{ArtifactManifest, AttemptRecord, StageStatus};
use time::OffsetDateTime;

use super::{
    check_fingerprint, data_paths, load_tables, publish_failed, publish_skipped,
    record_fingerprint, write_tables, StageContext, StageOutcome,
};
use crate::error::PipelineError;
use crate::runlog::RunLog;

/// How governance participates in a generated stage.
pub enum GovernanceMode<'a> {
    /// Classify and rewrite the outputs, emitting a fresh policy.
    Enforce,
    /// Re-classify the outputs and fail on anything the upstream
    /// policy does not cover; carry the policy forward.
    Audit(&'a GovernancePolicy),
}

pub struct GeneratedStage<'a> {
    pub stage: Stage,
    pub objective: &'a str,
    pub mode: GovernanceMode<'a>,
}

pub(crate) struct NullRng;

impl rand::RngCore for NullRng {
    fn next_u32(&mut self) -> u32 {
        0
    }
    fn next_u64(&mut self) -> u64 {
        0
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        dest.fill(0)
    }
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        dest.fill(0);
        Ok(())
    }
}

pub fn run(
    ctx: &StageContext,
    spec: GeneratedStage,
    lineage: &RunId,
    upstream: &StageOutcome,
) -> Result<StageOutcome, PipelineError> {
    let input_set_id = format!(
        "{}<-{}",
        spec.stage.dir_name(),
        upstream.identity.stage.dir_name()
    );
    let paths = data_paths(ctx.store, &upstream.manifest);
    let check = check_fingerprint(ctx, spec.stage, &input_set_id, &paths)?;

    let now = OffsetDateTime::now_utc();
    // Non-clean stages reuse the lineage id verbatim; the RNG is never
    // consulted past ingest.
    let identity = runid::mint(spec.stage, Some(lineage), now, &mut NullRng)?;

    if let Some(prior) = &check.prior {
        return publish_skipped(ctx, &identity, Some(upstream.upstream_ref()), prior);
    }

    let started = Instant::now();
    let started_utc = iso8601(now);
    let inputs = load_tables(ctx.store, &upstream.manifest, spec.stage)?;
    let rows_in: u64 = inputs.values().map(|t| t.row_count()).sum();

    let forbidden: Vec<String> = match &spec.mode {
        GovernanceMode::Enforce => Vec::new(),
        GovernanceMode::Audit(policy) => policy.removed.iter().cloned().collect(),
    };

    let outcome = match strata_engine::run(
        ctx.generator,
        spec.stage,
        spec.objective,
        &inputs,
        &forbidden,
        &ctx.config.engine_config(),
    ) {
        Ok(outcome) => outcome,
        Err(err @ EngineError::Exhausted { .. }) => {
            let attempts = attempt_records(err.rejections());
            let message = err.to_string();
            publish_failed(
                ctx,
                &identity,
                Some(upstream.upstream_ref()),
                rows_in,
                started_utc,
                started.elapsed().as_secs_f64(),
                attempts,
                message.clone(),
            )?;
            return Err(PipelineError::stage(spec.stage, message));
        }
    };

    let mut outputs = outcome.outputs;

    // Governance pass over the accepted outputs.
    let policy = match &spec.mode {
        GovernanceMode::Enforce => {
            let mut personal_fields = BTreeSet::new();
            let mut pseudonymized = BTreeSet::new();
            let mut removed = BTreeSet::new();
            let mut any_personal = false;

            for (_, table) in outputs.iter_mut() {
                let found = classify(table, &ctx.config.governance);
                if found.is_empty() {
                    continue;
                }
                any_personal = true;
                let salt = match ctx.config.salt.as_deref() {
                    Some(salt) => salt,
                    None => {
                        let source = GovernError::MissingSalt {
                            table: table.name.clone(),
                        };
                        let message = source.to_string();
                        publish_failed(
                            ctx,
                            &identity,
                            Some(upstream.upstream_ref()),
                            rows_in,
                            started_utc.clone(),
                            started.elapsed().as_secs_f64(),
                            attempt_records(&outcome.rejections),
                            message,
                        )?;
                        return Err(PipelineError::Governance {
                            stage: spec.stage,
                            source,
                        });
                    }
                };
                let (governed, table_policy) = apply(table, &found, salt)
                    .map_err(|source| PipelineError::Governance {
                        stage: spec.stage,
                        source,
                    })?;
                *table = governed;
                personal_fields.extend(table_policy.personal_fields);
                pseudonymized.extend(table_policy.pseudonymized);
                removed.extend(table_policy.removed);
            }

            GovernancePolicy {
                personal_fields,
                pseudonymized,
                removed,
                salt_fingerprint: if any_personal {
                    ctx.config
                        .salt
                        .as_deref()
                        .map(salt_fingerprint)
                        .unwrap_or_default()
                } else {
                    String::new()
                },
            }
        }
        GovernanceMode::Audit(policy) => {
            for table in outputs.values() {
                if let Err(source) = audit(table, Some(policy), &ctx.config.governance) {
                    let message = source.to_string();
                    publish_failed(
                        ctx,
                        &identity,
                        Some(upstream.upstream_ref()),
                        rows_in,
                        started_utc.clone(),
                        started.elapsed().as_secs_f64(),
                        attempt_records(&outcome.rejections),
                        message,
                    )?;
                    return Err(PipelineError::Governance {
                        stage: spec.stage,
                        source,
                    });
                }
            }
            (*policy).clone()
        }
    };

    let staged = ctx.store.begin(spec.stage, &identity.id)?;
    let mut log = RunLog::new();
    log.start(spec.stage, &identity.id);
    for r in &outcome.rejections {
        log.attempt_rejected(r.attempt, &r.kind.to_string(), &r.reason);
    }

    let files = write_tables(&staged, &outputs, &mut log)?;
    let rows_out: u64 = outputs.values().map(|t| t.row_count()).sum();

    staged.write_meta("data_policy.json", &policy)?;
    staged.write_meta("transform.json", &outcome.transform)?;

    log.end("success");
    log.write_to(staged.path())
        .map_err(|e| PipelineError::stage(spec.stage, e))?;

    let meta_base = format!("{}/{}/_meta", spec.stage.dir_name(), identity.id);
    let manifest = ArtifactManifest {
        run_id: identity.id.clone(),
        stage: spec.stage,
        status: StageStatus::Success,
        started_utc,
        ended_utc: iso8601(OffsetDateTime::now_utc()),
        duration_s: started.elapsed().as_secs_f64(),
        upstream: Some(upstream.upstream_ref()),
        files,
        rows_in,
        rows_out,
        policy_path: Some(format!("{}/data_policy.json", meta_base)),
        transform_path: Some(format!("{}/transform.json", meta_base)),
        attempts: attempt_records(&outcome.rejections),
        error: None,
    };
    staged.publish(&manifest)?;
    record_fingerprint(ctx, spec.stage, &input_set_id, &check, &identity)?;

    Ok(StageOutcome { identity, manifest })
}

fn attempt_records(rejections: &[strata_engine::Rejection]) -> Vec<AttemptRecord> {
    rejections
        .iter()
        .map(|r| AttemptRecord {
            attempt: r.attempt,
            kind: r.kind.to_string(),
            reason: r.reason.clone(),
        })
        .collect()
}
