//! Profile-driven transform drafting without a remote model.
//!
//! Plans are constructed deterministically from the data profile, so
//! the same inputs always yield the same plan. This backs the
//! `--skip-generation` mode and the test suites.

use strata_core::{InferredType, Stage, TableProfile};

use crate::generator::{
    transform_from_source, DraftRequest, GeneratedTransform, GenerateError, TransformGenerator,
};
use crate::plan::{AggFunc, Aggregate, OutputSpec, Step, TransformPlan};

pub struct HeuristicGenerator;

impl TransformGenerator for HeuristicGenerator {
    fn draft(&self, request: &DraftRequest) -> Result<GeneratedTransform, GenerateError> {
        let plan = match request.stage {
            Stage::Clean => clean_plan(request),
            Stage::Model => model_plan(request),
            Stage::Feature => feature_plan(request),
            other => return Err(GenerateError::UnsupportedStage(other)),
        };
        Ok(transform_from_source(request.stage, plan.to_json()))
    }
}

fn date_like(profile: &TableProfile, column: &str) -> bool {
    let lower = column.to_ascii_lowercase();
    profile
        .columns
        .iter()
        .find(|c| c.name == column)
        .map(|c| c.inferred == InferredType::Date)
        .unwrap_or(false)
        || lower.contains("date")
        || lower.ends_with("_at")
}

fn numeric(profile: &TableProfile, column: &str) -> bool {
    profile
        .columns
        .iter()
        .find(|c| c.name == column)
        .map(|c| matches!(c.inferred, InferredType::Integer | InferredType::Float))
        .unwrap_or(false)
}

/// Standardize each export: trim text, normalize dates and drop rows
/// whose dates do not parse, normalize numerics, drop duplicate rows.
fn clean_plan(request: &DraftRequest) -> TransformPlan {
    let mut outputs = Vec::new();
    for (name, profile) in &request.profile.tables {
        let text_columns: Vec<String> = profile
            .columns
            .iter()
            .filter(|c| c.inferred == InferredType::Text)
            .map(|c| c.name.clone())
            .collect();

        let mut steps = Vec::new();
        if !text_columns.is_empty() {
            steps.push(Step::Trim {
                columns: text_columns,
            });
        }
        for column in &profile.columns {
            if date_like(profile, &column.name) {
                steps.push(Step::FilterDateParses {
                    column: column.name.clone(),
                });
                steps.push(Step::ParseDate {
                    column: column.name.clone(),
                });
            } else if numeric(profile, &column.name) {
                steps.push(Step::ParseNumber {
                    column: column.name.clone(),
                });
            }
        }
        steps.push(Step::Dedup { subset: Vec::new() });

        outputs.push(OutputSpec {
            name: name.clone(),
            from: name.clone(),
            steps,
            intentional_filter: true,
        });
    }

    TransformPlan {
        inputs: request.profile.table_names(),
        outputs,
    }
}

/// One conformed dimension per keyed table; unkeyed tables become
/// whole-row-deduplicated facts.
fn model_plan(request: &DraftRequest) -> TransformPlan {
    let mut outputs = Vec::new();
    for (name, profile) in &request.profile.tables {
        match profile.key_candidates.first() {
            Some(key) => outputs.push(OutputSpec {
                name: format!("dim_{}", entity_name(name)),
                from: name.clone(),
                steps: vec![Step::Dedup {
                    subset: vec![key.clone()],
                }],
                intentional_filter: true,
            }),
            None => outputs.push(OutputSpec {
                name: format!("fact_{}", entity_name(name)),
                from: name.clone(),
                steps: vec![Step::Dedup { subset: Vec::new() }],
                intentional_filter: true,
            }),
        }
    }

    TransformPlan {
        inputs: request.profile.table_names(),
        outputs,
    }
}

/// Per-entity aggregates over every keyed table: a record count plus
/// sum and mean of each numeric measure.
fn feature_plan(request: &DraftRequest) -> TransformPlan {
    let mut outputs = Vec::new();
    for (name, profile) in &request.profile.tables {
        let key = match profile.key_candidates.first() {
            Some(key) => key.clone(),
            None => continue,
        };

        let mut aggregates = vec![Aggregate {
            column: None,
            func: AggFunc::Count,
            name: "records".to_string(),
        }];
        for column in &profile.columns {
            if column.name != key && numeric(profile, &column.name) {
                aggregates.push(Aggregate {
                    column: Some(column.name.clone()),
                    func: AggFunc::Sum,
                    name: format!("{}_sum", column.name),
                });
                aggregates.push(Aggregate {
                    column: Some(column.name.clone()),
                    func: AggFunc::Mean,
                    name: format!("{}_mean", column.name),
                });
            }
        }

        outputs.push(OutputSpec {
            name: format!("features_{}", entity_name(name)),
            from: name.clone(),
            steps: vec![Step::Aggregate {
                group_by: vec![key],
                aggregates,
            }],
            intentional_filter: false,
        });
    }

    TransformPlan {
        inputs: request.profile.table_names(),
        outputs,
    }
}

/// `dim_customers` reads better than `dim_dim_customers`.
fn entity_name(table: &str) -> &str {
    table
        .strip_prefix("dim_")
        .or_else(|| table.strip_prefix("fact_"))
        .unwrap_or(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::validate;
    use strata_core::{ProfileSummary, Table};

    fn profile() -> ProfileSummary {
        let mut customers = Table::new(
            "customers",
            vec![
                "customer_id".into(),
                "region".into(),
                "signup_date".into(),
                "spend".into(),
            ],
        );
        customers.rows.push(vec![
            "c1".into(),
            " north ".into(),
            "2023-01-05".into(),
            "10.5".into(),
        ]);
        customers.rows.push(vec![
            "c2".into(),
            "south".into(),
            "2023-02-11".into(),
            "4".into(),
        ]);
        ProfileSummary::of_tables([&customers])
    }

    fn request(stage: Stage, profile: &ProfileSummary) -> DraftRequest {
        DraftRequest {
            stage,
            objective: "",
            profile,
            forbidden_columns: &[],
            rejections: &[],
        }
    }

    #[test]
    fn drafts_are_deterministic() {
        let profile = profile();
        let a = HeuristicGenerator
            .draft(&request(Stage::Clean, &profile))
            .unwrap();
        let b = HeuristicGenerator
            .draft(&request(Stage::Clean, &profile))
            .unwrap();
        assert_eq!(a.source_text, b.source_text);
    }

    #[test]
    fn clean_plan_survives_validation() {
        let profile = profile();
        let transform = HeuristicGenerator
            .draft(&request(Stage::Clean, &profile))
            .unwrap();
        let plan = validate(&transform, &profile.table_names()).unwrap();
        assert_eq!(plan.output_names(), vec!["customers"]);
        assert!(plan.outputs[0]
            .steps
            .iter()
            .any(|s| matches!(s, Step::FilterDateParses { .. })));
    }

    #[test]
    fn model_plan_builds_one_dim_per_keyed_table() {
        let profile = profile();
        let transform = HeuristicGenerator
            .draft(&request(Stage::Model, &profile))
            .unwrap();
        assert_eq!(transform.declared_outputs, vec!["dim_customers"]);
    }

    #[test]
    fn feature_plan_aggregates_numeric_measures() {
        let profile = profile();
        let transform = HeuristicGenerator
            .draft(&request(Stage::Feature, &profile))
            .unwrap();
        assert_eq!(transform.declared_outputs, vec!["features_customers"]);
        assert!(transform.source_text.contains("spend_sum"));
        assert!(transform.source_text.contains("spend_mean"));
        assert!(!transform.source_text.contains("customer_id_sum"));
    }

    #[test]
    fn segment_stage_is_not_drafted() {
        let profile = profile();
        let err = HeuristicGenerator
            .draft(&request(Stage::Segment, &profile))
            .unwrap_err();
        assert!(matches!(err, GenerateError::UnsupportedStage(_)));
    }
}
