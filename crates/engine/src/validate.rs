//! Static vetting of a drafted transform, before anything executes.

use std::collections::BTreeSet;

use crate::generator::GeneratedTransform;
use crate::plan::{Step, TransformPlan};

/// Substrings that must never appear in plan text. Only path and URL
/// shapes belong here -- anything that can occur inside a column or
/// table identifier (`processed_at`, `shell_weight`) must not, or valid
/// plans become unvalidatable. Process and filesystem access are ruled
/// out structurally: the tagged [`Step`] vocabulary has no such
/// operation and unknown fields fail to parse.
const FORBIDDEN_TOKENS: &[&str] = &["://", "../", "/etc/", "/tmp/", "/var/", "~/"];

/// Validate a candidate against the tables available to its stage.
/// Returns the parsed plan, or the first reason it must be rejected.
pub fn validate(
    transform: &GeneratedTransform,
    available_tables: &[String],
) -> Result<TransformPlan, String> {
    let lowered = transform.source_text.to_ascii_lowercase();
    for token in FORBIDDEN_TOKENS {
        if lowered.contains(token) {
            return Err(format!("plan text contains forbidden token `{}`", token));
        }
    }

    let plan = TransformPlan::parse(&transform.source_text)
        .map_err(|e| format!("plan does not parse: {}", e))?;

    let available: BTreeSet<&str> = available_tables.iter().map(String::as_str).collect();
    for input in &plan.inputs {
        if !available.contains(input.as_str()) {
            return Err(format!(
                "declared input `{}` is not available to this stage (available: {})",
                input,
                available_tables.join(", ")
            ));
        }
    }

    if plan.outputs.is_empty() {
        return Err("plan declares no outputs".to_string());
    }
    if transform.declared_outputs != plan.output_names() {
        return Err("declared outputs do not match the plan's outputs".to_string());
    }
    if transform.declared_inputs != plan.inputs {
        return Err("declared inputs do not match the plan's inputs".to_string());
    }

    // Every table a step reads must be a declared input or an output
    // built earlier in the plan.
    let mut known: BTreeSet<&str> = plan.inputs.iter().map(String::as_str).collect();
    let mut produced: BTreeSet<&str> = BTreeSet::new();
    for output in &plan.outputs {
        if !known.contains(output.from.as_str()) {
            return Err(format!(
                "output `{}` starts from unknown table `{}`",
                output.name, output.from
            ));
        }
        for step in &output.steps {
            if let Some(table) = step.referenced_table() {
                if !known.contains(table) {
                    return Err(format!(
                        "output `{}` joins unknown table `{}`",
                        output.name, table
                    ));
                }
            }
            if let Step::Aggregate { aggregates, .. } = step {
                for agg in aggregates {
                    if agg.column.is_none() && !matches!(agg.func, crate::plan::AggFunc::Count) {
                        return Err(format!(
                            "aggregate `{}` needs a source column",
                            agg.name
                        ));
                    }
                }
            }
        }
        if !produced.insert(output.name.as_str()) {
            return Err(format!("duplicate output name `{}`", output.name));
        }
        known.insert(output.name.as_str());
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::transform_from_source;
    use strata_core::Stage;

    fn candidate(source: &str) -> GeneratedTransform {
        transform_from_source(Stage::Clean, source.to_string())
    }

    fn available() -> Vec<String> {
        vec!["customers".to_string(), "products".to_string()]
    }

    #[test]
    fn accepts_a_well_formed_plan() {
        let t = candidate(
            r#"{"inputs": ["customers"], "outputs": [
                {"name": "clean_customers", "from": "customers", "steps": [
                    {"op": "dedup"}
                ]}
            ]}"#,
        );
        let plan = validate(&t, &available()).unwrap();
        assert_eq!(plan.output_names(), vec!["clean_customers"]);
    }

    #[test]
    fn rejects_unavailable_inputs() {
        let t = candidate(r#"{"inputs": ["orders"], "outputs": [
            {"name": "o", "from": "orders", "steps": []}]}"#);
        let reason = validate(&t, &available()).unwrap_err();
        assert!(reason.contains("not available"));
    }

    #[test]
    fn rejects_forbidden_tokens_before_parsing() {
        for source in [
            r#"{"inputs": ["https://exfil.example"], "outputs": []}"#,
            r#"{"inputs": ["../secrets"], "outputs": []}"#,
        ] {
            let reason = validate(&candidate(source), &available()).unwrap_err();
            assert!(reason.contains("forbidden token"), "{}", source);
        }
    }

    #[test]
    fn accepts_identifiers_that_embed_banned_words() {
        // Column names like `processed_at` or `shell_weight` are
        // ordinary export vocabulary and must pass the raw-text scan.
        let t = candidate(
            r#"{"inputs": ["customers"], "outputs": [
                {"name": "clean_customers", "from": "customers", "steps": [
                    {"op": "parse_date", "column": "processed_at"},
                    {"op": "trim", "columns": ["shell_weight", "import_batch"]},
                    {"op": "dedup"}
                ]}
            ]}"#,
        );
        validate(&t, &available()).unwrap();
    }

    #[test]
    fn rejects_empty_outputs() {
        let t = candidate(r#"{"inputs": ["customers"], "outputs": []}"#);
        let reason = validate(&t, &available()).unwrap_err();
        assert!(reason.contains("no outputs"));
    }

    #[test]
    fn rejects_join_against_undeclared_table() {
        let t = candidate(
            r#"{"inputs": ["customers"], "outputs": [
                {"name": "o", "from": "customers", "steps": [
                    {"op": "join", "right": "products", "kind": "inner",
                     "left_on": "product_id", "right_on": "product_id"}
                ]}
            ]}"#,
        );
        let reason = validate(&t, &available()).unwrap_err();
        assert!(reason.contains("joins unknown table"));
    }

    #[test]
    fn later_outputs_may_read_earlier_ones() {
        let t = candidate(
            r#"{"inputs": ["customers", "products"], "outputs": [
                {"name": "base", "from": "customers", "steps": []},
                {"name": "joined", "from": "base", "steps": [
                    {"op": "join", "right": "products", "kind": "left",
                     "left_on": "product_id", "right_on": "product_id"}
                ]}
            ]}"#,
        );
        validate(&t, &available()).unwrap();
    }

    #[test]
    fn rejects_duplicate_output_names() {
        let t = candidate(
            r#"{"inputs": ["customers"], "outputs": [
                {"name": "o", "from": "customers", "steps": []},
                {"name": "o", "from": "customers", "steps": []}
            ]}"#,
        );
        let reason = validate(&t, &available()).unwrap_err();
        assert!(reason.contains("duplicate output name"));
    }
}
