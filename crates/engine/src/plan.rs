//! The transform plan vocabulary.
//!
//! A plan is a JSON document naming its input tables and a list of
//! outputs, each built from a starting table through an ordered list of
//! allow-listed steps. The vocabulary is the whole capability surface
//! of generated code: no step can touch the filesystem, the network, or
//! anything outside the in-memory tables handed to the interpreter.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformPlan {
    pub inputs: Vec<String>,
    pub outputs: Vec<OutputSpec>,
}

impl TransformPlan {
    pub fn parse(source: &str) -> Result<TransformPlan, serde_json::Error> {
        serde_json::from_str(source)
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|o| o.name.clone()).collect()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// One output table: a starting table plus a step chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSpec {
    pub name: String,
    pub from: String,
    pub steps: Vec<Step>,
    /// Declares that this output is allowed to contain fewer rows than
    /// its input, or none at all.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub intentional_filter: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    Select { columns: Vec<String> },
    Drop { columns: Vec<String> },
    Rename { from: String, to: String },
    Trim { columns: Vec<String> },
    Uppercase { columns: Vec<String> },
    MapValues { column: String, mapping: BTreeMap<String, String> },
    /// Normalize a date column; values that do not parse become null.
    ParseDate { column: String },
    /// Drop rows whose value in the column does not parse as a date.
    FilterDateParses { column: String },
    /// Normalize a numeric column; values that do not parse become null.
    ParseNumber { column: String },
    Filter { column: String, predicate: Predicate },
    Dedup {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        subset: Vec<String>,
    },
    Derive { column: String, expr: Expr },
    Join {
        right: String,
        kind: JoinKind,
        left_on: String,
        right_on: String,
    },
    Aggregate {
        group_by: Vec<String>,
        aggregates: Vec<Aggregate>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmp", rename_all = "snake_case", deny_unknown_fields)]
pub enum Predicate {
    NotNull,
    Eq { value: String },
    Ne { value: String },
    Gt { value: f64 },
    Ge { value: f64 },
    Lt { value: f64 },
    Le { value: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Aggregate {
    /// Source column; `count` needs none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub func: AggFunc,
    #[serde(rename = "as")]
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Count,
    CountDistinct,
    Sum,
    Min,
    Max,
    Mean,
}

/// Arithmetic over columns and constants for derived columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum Expr {
    Column { name: String },
    Constant { value: f64 },
    Add { left: Box<Expr>, right: Box<Expr> },
    Sub { left: Box<Expr>, right: Box<Expr> },
    Mul { left: Box<Expr>, right: Box<Expr> },
    Div { left: Box<Expr>, right: Box<Expr> },
}

impl Expr {
    /// Column names the expression reads.
    pub fn columns(&self, out: &mut Vec<String>) {
        match self {
            Expr::Column { name } => out.push(name.clone()),
            Expr::Constant { .. } => {}
            Expr::Add { left, right }
            | Expr::Sub { left, right }
            | Expr::Mul { left, right }
            | Expr::Div { left, right } => {
                left.columns(out);
                right.columns(out);
            }
        }
    }
}

impl Step {
    /// The other table a step reads, if any.
    pub fn referenced_table(&self) -> Option<&str> {
        match self {
            Step::Join { right, .. } => Some(right),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_representative_plan() {
        let source = r#"{
            "inputs": ["customers"],
            "outputs": [{
                "name": "dim_customer",
                "from": "customers",
                "steps": [
                    {"op": "trim", "columns": ["region"]},
                    {"op": "parse_date", "column": "signup_date"},
                    {"op": "filter_date_parses", "column": "signup_date"},
                    {"op": "dedup", "subset": ["customer_id"]},
                    {"op": "derive", "column": "spend_eur", "expr":
                        {"kind": "mul",
                         "left": {"kind": "column", "name": "spend"},
                         "right": {"kind": "constant", "value": 0.92}}}
                ],
                "intentional_filter": true
            }]
        }"#;
        let plan = TransformPlan::parse(source).unwrap();
        assert_eq!(plan.inputs, vec!["customers"]);
        assert_eq!(plan.output_names(), vec!["dim_customer"]);
        assert_eq!(plan.outputs[0].steps.len(), 5);
        assert!(plan.outputs[0].intentional_filter);
    }

    #[test]
    fn rejects_steps_outside_the_vocabulary() {
        let source = r#"{
            "inputs": ["t"],
            "outputs": [{"name": "o", "from": "t", "steps": [
                {"op": "shell", "command": "rm"}
            ]}]
        }"#;
        assert!(TransformPlan::parse(source).is_err());
    }

    #[test]
    fn rejects_unknown_fields() {
        let source = r#"{"inputs": [], "outputs": [], "exfiltrate_to": "x"}"#;
        assert!(TransformPlan::parse(source).is_err());
    }

    #[test]
    fn plan_round_trips_through_json() {
        let plan = TransformPlan {
            inputs: vec!["orders".into()],
            outputs: vec![OutputSpec {
                name: "orders_by_day".into(),
                from: "orders".into(),
                steps: vec![Step::Aggregate {
                    group_by: vec!["day".into()],
                    aggregates: vec![Aggregate {
                        column: None,
                        func: AggFunc::Count,
                        name: "orders".into(),
                    }],
                }],
                intentional_filter: false,
            }],
        };
        let back = TransformPlan::parse(&plan.to_json()).unwrap();
        assert_eq!(back, plan);
    }
}
