//! LLM-backed transform drafting over the Anthropic Messages API.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::generator::{
    transform_from_source, DraftRequest, GeneratedTransform, GenerateError, TransformGenerator,
};

/// Anthropic Messages API endpoint.
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Required API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default model for transform drafting.
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Anthropic API key.
    pub api_key: String,
    pub model: String,
    /// Wall-clock budget for the whole request.
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_model(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct LlmGenerator {
    config: LlmConfig,
    agent: ureq::Agent,
}

impl LlmGenerator {
    pub fn new(config: LlmConfig) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .build()
            .new_agent();
        Self { config, agent }
    }
}

impl TransformGenerator for LlmGenerator {
    fn draft(&self, request: &DraftRequest) -> Result<GeneratedTransform, GenerateError> {
        let system_prompt = build_system_prompt();
        let user_prompt = build_user_prompt(request);
        let response_text = self.call_api(&system_prompt, &user_prompt)?;
        let source = strip_code_fences(&response_text).to_string();
        Ok(transform_from_source(request.stage, source))
    }
}

impl LlmGenerator {
    fn call_api(&self, system_prompt: &str, user_prompt: &str) -> Result<String, GenerateError> {
        let request_body = MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: 4096,
            system: system_prompt.to_string(),
            messages: vec![ApiMessage {
                role: "user".to_string(),
                content: user_prompt.to_string(),
            }],
        };

        let response = self
            .agent
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .send_json(&request_body)
            .map_err(|e| GenerateError::Api(format!("API request failed: {}", e)))?;

        let resp: MessagesResponse = response
            .into_body()
            .read_json()
            .map_err(|e| GenerateError::Response(format!("failed to parse API response: {}", e)))?;

        resp.content
            .first()
            .and_then(|block| block.text.clone())
            .ok_or_else(|| {
                GenerateError::Response("API response contained no text content".to_string())
            })
    }
}

// ── Prompt construction ──────────────────────────────────────────────────────

fn build_system_prompt() -> String {
    r#"You are a data-pipeline expert drafting transform plans for tabular data.

A transform plan is a JSON object:
{
  "inputs": ["<table name>", ...],
  "outputs": [
    {
      "name": "<output table name>",
      "from": "<input or earlier output name>",
      "steps": [<step>, ...],
      "intentional_filter": <true if this output may drop rows>
    }
  ]
}

Allowed steps (the "op" field selects the step; nothing else exists):
- {"op": "select", "columns": [..]}
- {"op": "drop", "columns": [..]}
- {"op": "rename", "from": "a", "to": "b"}
- {"op": "trim", "columns": [..]}
- {"op": "uppercase", "columns": [..]}
- {"op": "map_values", "column": "c", "mapping": {"old": "new"}}
- {"op": "parse_date", "column": "c"}            (unparseable values become null)
- {"op": "filter_date_parses", "column": "c"}    (drops rows whose value is not a date)
- {"op": "parse_number", "column": "c"}
- {"op": "filter", "column": "c", "predicate": {"cmp": "not_null" | "eq" | "ne" | "gt" | "ge" | "lt" | "le", ...}}
  (eq/ne take {"value": "<string>"}; gt/ge/lt/le take {"value": <number>})
- {"op": "dedup", "subset": [..]}                (empty or omitted subset = whole row)
- {"op": "derive", "column": "c", "expr": <expr>}
  (expr: {"kind": "column" | "constant" | "add" | "sub" | "mul" | "div", ...})
- {"op": "join", "right": "t", "kind": "inner" | "left", "left_on": "a", "right_on": "b"}
- {"op": "aggregate", "group_by": [..], "aggregates": [{"column": "c", "func": "count" | "count_distinct" | "sum" | "min" | "max" | "mean", "as": "name"}]}
  ("count" needs no column)

Rules:
- Return ONLY the JSON plan. No explanation, no markdown, no code fences.
- Reference only the tables and columns listed in the data profile.
- Never reference files, paths, URLs, or anything outside the given tables.
- Set "intentional_filter": true on any output that may legitimately drop rows.
- If earlier attempts were rejected, the rejection list tells you exactly
  what to fix; do not repeat a rejected construction."#
        .to_string()
}

fn build_user_prompt(request: &DraftRequest) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("## Objective ({} stage)\n\n", request.stage));
    prompt.push_str(request.objective);
    prompt.push_str("\n\n## Data profile\n\n");
    prompt.push_str(
        &serde_json::to_string_pretty(request.profile).unwrap_or_default(),
    );
    prompt.push('\n');

    if !request.forbidden_columns.is_empty() {
        prompt.push_str("\n## Forbidden columns\n\n");
        prompt.push_str(
            "These columns were removed by governance and must not appear in any output:\n",
        );
        for column in request.forbidden_columns {
            prompt.push_str(&format!("- {}\n", column));
        }
    }

    if !request.rejections.is_empty() {
        prompt.push_str("\n## Rejected earlier attempts\n\n");
        for rejection in request.rejections {
            prompt.push_str(&format!(
                "- attempt {} ({}): {}\n",
                rejection.attempt, rejection.kind, rejection.reason
            ));
        }
    }

    prompt
}

// ── API types ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<ApiMessage>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[allow(dead_code)] // Required by serde for correct JSON deserialization
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

/// Strip markdown code fences (```json ... ```) from the response.
fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    if text.starts_with("```") {
        let after_open = if let Some(nl) = text.find('\n') {
            &text[nl + 1..]
        } else {
            return text;
        };
        if let Some(close) = after_open.rfind("```") {
            return after_open[..close].trim();
        }
        return after_open.trim();
    }
    text
}
