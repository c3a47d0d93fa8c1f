//! The drafting seam: anything that can turn a stage objective plus a
//! data profile into a candidate transform plan.

use serde::{Deserialize, Serialize};
use strata_core::{ProfileSummary, Stage};
use thiserror::Error;

/// A drafted candidate. `source_text` is the plan JSON exactly as the
/// generator produced it; parsing and vetting happen in validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedTransform {
    pub stage: Stage,
    pub source_text: String,
    pub declared_inputs: Vec<String>,
    pub declared_outputs: Vec<String>,
    pub validation_status: ValidationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Pending,
    Passed,
    Failed,
}

/// Everything a generator may see. Profiles carry shapes and counts
/// only, so no raw cell value ever reaches a remote generator.
#[derive(Debug)]
pub struct DraftRequest<'a> {
    pub stage: Stage,
    pub objective: &'a str,
    pub profile: &'a ProfileSummary,
    pub forbidden_columns: &'a [String],
    /// Full rejection history of this stage's engine run, oldest first.
    pub rejections: &'a [Rejection],
}

/// Why a candidate was turned away, recorded in the manifest audit
/// trail and replayed into the next draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub attempt: u32,
    pub kind: RejectionKind,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectionKind {
    Generation,
    Validation,
    Execution,
    Acceptance,
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectionKind::Generation => "generation",
            RejectionKind::Validation => "validation",
            RejectionKind::Execution => "execution",
            RejectionKind::Acceptance => "acceptance",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("generation request failed: {0}")]
    Api(String),

    #[error("generation response unusable: {0}")]
    Response(String),

    #[error("no generator available for stage `{0}`")]
    UnsupportedStage(Stage),
}

pub trait TransformGenerator {
    fn draft(&self, request: &DraftRequest) -> Result<GeneratedTransform, GenerateError>;
}

/// Build a `GeneratedTransform` from raw plan text, extracting the
/// declared input and output names with a tolerant parse. Unparseable
/// text yields empty declarations and is caught by validation.
pub fn transform_from_source(stage: Stage, source_text: String) -> GeneratedTransform {
    let (inputs, outputs) = match serde_json::from_str::<serde_json::Value>(&source_text) {
        Ok(value) => {
            let names = |key: &str, name_key: Option<&str>| -> Vec<String> {
                value
                    .get(key)
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|item| match name_key {
                                Some(k) => item.get(k).and_then(|n| n.as_str()),
                                None => item.as_str(),
                            })
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default()
            };
            (names("inputs", None), names("outputs", Some("name")))
        }
        Err(_) => (Vec::new(), Vec::new()),
    };

    GeneratedTransform {
        stage,
        source_text,
        declared_inputs: inputs,
        declared_outputs: outputs,
        validation_status: ValidationStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declarations_extracted_from_plan_text() {
        let t = transform_from_source(
            Stage::Clean,
            r#"{"inputs": ["a", "b"], "outputs": [{"name": "c", "from": "a", "steps": []}]}"#
                .to_string(),
        );
        assert_eq!(t.declared_inputs, vec!["a", "b"]);
        assert_eq!(t.declared_outputs, vec!["c"]);
        assert_eq!(t.validation_status, ValidationStatus::Pending);
    }

    #[test]
    fn unparseable_text_declares_nothing() {
        let t = transform_from_source(Stage::Clean, "not json".to_string());
        assert!(t.declared_inputs.is_empty());
        assert!(t.declared_outputs.is_empty());
    }
}
