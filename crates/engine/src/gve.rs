//! The generate-validate-execute loop.
//!
//! Drafting, static validation, sandboxed execution, and acceptance
//! run as one bounded retry loop. Every rejection is recorded and the
//! complete history rides along into the next draft, so the generator
//! never repeats a mistake it has already been told about. The loop is
//! bounded by the retry ceiling; exhaustion surfaces every rejection.

use std::collections::BTreeMap;

use strata_core::{ProfileSummary, Stage, Table};
use thiserror::Error;

use crate::exec::{execute, ExecLimits};
use crate::generator::{
    DraftRequest, GeneratedTransform, Rejection, RejectionKind, TransformGenerator,
    ValidationStatus,
};
use crate::plan::TransformPlan;
use crate::validate::validate;

pub const DEFAULT_RETRY_CEILING: u32 = 3;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub retry_ceiling: u32,
    pub limits: ExecLimits,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            retry_ceiling: DEFAULT_RETRY_CEILING,
            limits: ExecLimits::default(),
        }
    }
}

/// An accepted transform with everything the stage needs to publish.
#[derive(Debug)]
pub struct EngineOutcome {
    pub transform: GeneratedTransform,
    pub plan: TransformPlan,
    pub outputs: BTreeMap<String, Table>,
    /// Rejections that preceded acceptance; part of the audit trail.
    pub rejections: Vec<Rejection>,
    pub attempts_used: u32,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("stage `{stage}` exhausted {ceiling} attempts; last rejection: {last}")]
    Exhausted {
        stage: Stage,
        ceiling: u32,
        rejections: Vec<Rejection>,
        last: String,
    },
}

impl EngineError {
    pub fn rejections(&self) -> &[Rejection] {
        match self {
            EngineError::Exhausted { rejections, .. } => rejections,
        }
    }
}

/// Run the loop for one stage.
///
/// `forbidden_columns` are names governance has removed upstream; a
/// candidate whose outputs resurrect one is rejected at acceptance.
pub fn run(
    generator: &dyn TransformGenerator,
    stage: Stage,
    objective: &str,
    inputs: &BTreeMap<String, Table>,
    forbidden_columns: &[String],
    config: &EngineConfig,
) -> Result<EngineOutcome, EngineError> {
    let profile = ProfileSummary::of_tables(inputs.values());
    let available: Vec<String> = inputs.keys().cloned().collect();
    let mut rejections: Vec<Rejection> = Vec::new();

    for attempt in 1..=config.retry_ceiling {
        let request = DraftRequest {
            stage,
            objective,
            profile: &profile,
            forbidden_columns,
            rejections: &rejections,
        };

        let mut transform = match generator.draft(&request) {
            Ok(t) => t,
            Err(e) => {
                rejections.push(Rejection {
                    attempt,
                    kind: RejectionKind::Generation,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let plan = match validate(&transform, &available) {
            Ok(plan) => {
                transform.validation_status = ValidationStatus::Passed;
                plan
            }
            Err(reason) => {
                rejections.push(Rejection {
                    attempt,
                    kind: RejectionKind::Validation,
                    reason,
                });
                continue;
            }
        };

        let outputs = match execute(&plan, inputs, &config.limits) {
            Ok(outputs) => outputs,
            Err(failure) => {
                rejections.push(Rejection {
                    attempt,
                    kind: RejectionKind::Execution,
                    reason: failure.to_string(),
                });
                continue;
            }
        };

        if let Err(reason) = accept(&plan, inputs, &outputs, forbidden_columns) {
            rejections.push(Rejection {
                attempt,
                kind: RejectionKind::Acceptance,
                reason,
            });
            continue;
        }

        return Ok(EngineOutcome {
            transform,
            plan,
            outputs,
            rejections,
            attempts_used: attempt,
        });
    }

    let last = rejections
        .last()
        .map(|r| format!("{}: {}", r.kind, r.reason))
        .unwrap_or_else(|| "no attempts recorded".to_string());
    Err(EngineError::Exhausted {
        stage,
        ceiling: config.retry_ceiling,
        rejections,
        last,
    })
}

/// Post-execution acceptance predicates.
fn accept(
    plan: &TransformPlan,
    inputs: &BTreeMap<String, Table>,
    outputs: &BTreeMap<String, Table>,
    forbidden_columns: &[String],
) -> Result<(), String> {
    for (name, table) in outputs {
        for column in &table.columns {
            if forbidden_columns.contains(column) {
                return Err(format!(
                    "output `{}` resurrects governance-removed column `{}`",
                    name, column
                ));
            }
        }
    }

    let inputs_populated = inputs.values().any(|t| !t.rows.is_empty());
    if inputs_populated {
        for spec in &plan.outputs {
            if spec.intentional_filter {
                continue;
            }
            let empty = outputs
                .get(&spec.name)
                .map(|t| t.rows.is_empty())
                .unwrap_or(true);
            if empty {
                return Err(format!(
                    "output `{}` came back empty from populated inputs without declaring a filter",
                    spec.name
                ));
            }
        }
    }
    Ok(())
}
