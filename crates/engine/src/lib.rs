//! The generate-validate-execute engine.
//!
//! A stage hands the engine its input tables, an objective, and the
//! columns governance forbids; the engine drafts a transform plan
//! (remote model or deterministic heuristics), vets it statically, runs
//! it in a sandbox, checks the results, and retries with the full
//! rejection history until acceptance or the retry ceiling.

pub mod exec;
pub mod generator;
pub mod gve;
pub mod heuristic;
pub mod llm;
pub mod plan;
pub mod validate;

pub use exec::{ExecFailure, ExecFailureKind, ExecLimits};
pub use generator::{
    DraftRequest, GeneratedTransform, GenerateError, Rejection, RejectionKind, TransformGenerator,
    ValidationStatus,
};
pub use gve::{run, EngineConfig, EngineError, EngineOutcome, DEFAULT_RETRY_CEILING};
pub use heuristic::HeuristicGenerator;
pub use llm::{LlmConfig, LlmGenerator};
pub use plan::TransformPlan;
