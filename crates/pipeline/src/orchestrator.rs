//! Stage sequencing for one pipeline invocation.
//!
//! Strictly sequential: ingest, clean, model, feature, segment. The
//! first failure halts the run; every stage that ran has already left
//! its manifest behind, so the failure is fully auditable.

use strata_engine::{HeuristicGenerator, LlmConfig, LlmGenerator, TransformGenerator};
use strata_store::{ArtifactStore, FingerprintLedger};

use crate::config::Config;
use crate::error::PipelineError;
use crate::report::{RunReport, StageReport};
use crate::stages::{self, StageContext, StageOutcome};

/// Per-invocation knobs from the CLI.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub seed: u64,
    pub run_id: Option<String>,
    pub skip_generation: bool,
}

impl Default for RunOptions {
    fn default() -> RunOptions {
        RunOptions {
            seed: 42,
            run_id: None,
            skip_generation: false,
        }
    }
}

/// Pick the transform generator: the remote drafting model normally,
/// deterministic heuristics under `--skip-generation` or when no API
/// key is configured.
fn make_generator(config: &Config, options: &RunOptions) -> Box<dyn TransformGenerator> {
    if options.skip_generation {
        return Box::new(HeuristicGenerator);
    }
    match config.api_key.clone() {
        Some(api_key) => {
            let llm = match config.model.clone() {
                Some(model) => LlmConfig::with_model(api_key, model),
                None => LlmConfig::new(api_key),
            };
            Box::new(LlmGenerator::new(llm))
        }
        None => Box::new(HeuristicGenerator),
    }
}

/// Run the whole pipeline. Returns the per-stage report; the report of
/// stages completed before a failure is lost only to the caller, never
/// to the store.
pub fn run_pipeline(config: &Config, options: &RunOptions) -> Result<RunReport, PipelineError> {
    let store = ArtifactStore::new(&config.artifacts);
    let ledger = FingerprintLedger::new(store.root());
    let generator = make_generator(config, options);
    let ctx = StageContext {
        store: &store,
        ledger: &ledger,
        config,
        generator: generator.as_ref(),
    };

    // Identity suffixes come from real entropy; the seed only steers
    // segmentation, so back-to-back invocations never collide.
    let mut rng = rand::thread_rng();
    let mut report = RunReport::default();

    let ingest = stages::ingest::run(&ctx, &mut rng, options.run_id.as_deref())?;
    push_stage(&mut report, &ingest);
    let lineage = ingest.identity.id.clone();

    let clean = stages::clean::run(&ctx, &lineage, &ingest)?;
    push_stage(&mut report, &clean);

    let model = stages::model::run(&ctx, &lineage, &clean)?;
    push_stage(&mut report, &model);

    let features = stages::features::run(&ctx, &lineage, &model)?;
    push_stage(&mut report, &features);

    let segments = stages::segment::run(&ctx, &lineage, &features, options.seed)?;
    push_stage(&mut report, &segments);

    Ok(report)
}

fn push_stage(report: &mut RunReport, outcome: &StageOutcome) {
    let attempts = outcome
        .manifest
        .attempts
        .last()
        .map(|a| a.attempt + 1)
        .unwrap_or(1);
    report.push(StageReport {
        stage: outcome.identity.stage,
        run_id: outcome.identity.id.clone(),
        status: outcome.manifest.status,
        rows_in: outcome.manifest.rows_in,
        rows_out: outcome.manifest.rows_out,
        attempts,
        duration_s: outcome.manifest.duration_s,
    });
}
