//! Segment stage: seeded k-means over the feature tables.
//!
//! Segmentation is deliberately not generated -- its determinism
//! contract (same inputs, same seed, same clusters) is easier to hold
//! with a fixed implementation than with a drafted plan.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use strata_core::{runid, runid::iso8601, values, InferredType, RunId, Stage, Table};
use strata_govern::audit;
use strata_store::{ArtifactManifest, StageStatus};
use time::OffsetDateTime;

use super::generated::NullRng;
use super::{
    check_fingerprint, data_paths, load_policy, load_tables, publish_skipped, record_fingerprint,
    write_tables, StageContext, StageOutcome,
};
use crate::error::PipelineError;
use crate::runlog::RunLog;

const DEFAULT_K: usize = 3;
const MAX_ITERATIONS: usize = 100;

#[derive(Debug, Serialize)]
struct ModelMetadata {
    algorithm: &'static str,
    k: usize,
    seed: u64,
    iterations: usize,
    inertia: f64,
    features: Vec<String>,
}

pub fn run(
    ctx: &StageContext,
    lineage: &RunId,
    upstream: &StageOutcome,
    seed: u64,
) -> Result<StageOutcome, PipelineError> {
    let input_set_id = format!("segment<-{}", upstream.identity.stage.dir_name());
    let paths = data_paths(ctx.store, &upstream.manifest);
    let check = check_fingerprint(ctx, Stage::Segment, &input_set_id, &paths)?;

    let now = OffsetDateTime::now_utc();
    let identity = runid::mint(Stage::Segment, Some(lineage), now, &mut NullRng)?;

    if let Some(prior) = &check.prior {
        return publish_skipped(ctx, &identity, Some(upstream.upstream_ref()), prior);
    }

    let started = Instant::now();
    let started_utc = iso8601(now);
    let policy = load_policy(ctx.store, &upstream.manifest, Stage::Segment)?;
    let inputs = load_tables(ctx.store, &upstream.manifest, Stage::Segment)?;
    let rows_in: u64 = inputs.values().map(|t| t.row_count()).sum();

    let source = inputs
        .values()
        .find(|t| !numeric_columns(t).is_empty())
        .ok_or_else(|| {
            PipelineError::stage(Stage::Segment, "no table with numeric features to segment")
        })?;

    let feature_columns = numeric_columns(source);
    let (segmented, metadata) = segment_table(source, &feature_columns, seed)?;

    audit(&segmented, Some(&policy), &ctx.config.governance).map_err(|source| {
        PipelineError::Governance {
            stage: Stage::Segment,
            source,
        }
    })?;

    let staged = ctx.store.begin(Stage::Segment, &identity.id)?;
    let mut log = RunLog::new();
    log.start(Stage::Segment, &identity.id);

    let mut outputs = std::collections::BTreeMap::new();
    outputs.insert("segments".to_string(), segmented);
    let files = write_tables(&staged, &outputs, &mut log)?;
    let rows_out: u64 = outputs.values().map(|t| t.row_count()).sum();

    staged.write_meta("model_metadata.json", &metadata)?;
    staged.write_meta("data_policy.json", &policy)?;

    log.end("success");
    log.write_to(staged.path())
        .map_err(|e| PipelineError::stage(Stage::Segment, e))?;

    let meta_base = format!("segment/{}/_meta", identity.id);
    let manifest = ArtifactManifest {
        run_id: identity.id.clone(),
        stage: Stage::Segment,
        status: StageStatus::Success,
        started_utc,
        ended_utc: iso8601(OffsetDateTime::now_utc()),
        duration_s: started.elapsed().as_secs_f64(),
        upstream: Some(upstream.upstream_ref()),
        files,
        rows_in,
        rows_out,
        policy_path: Some(format!("{}/data_policy.json", meta_base)),
        transform_path: None,
        attempts: Vec::new(),
        error: None,
    };
    staged.publish(&manifest)?;
    record_fingerprint(ctx, Stage::Segment, &input_set_id, &check, &identity)?;

    Ok(StageOutcome { identity, manifest })
}

// A fully-unique measure is still a measure; only identifier-named
// columns are kept out of the feature space.
fn numeric_columns(table: &Table) -> Vec<String> {
    let profile = strata_core::profile::profile_table(table);
    profile
        .columns
        .iter()
        .filter(|c| matches!(c.inferred, InferredType::Integer | InferredType::Float))
        .filter(|c| {
            let lower = c.name.to_ascii_lowercase();
            !(lower == "id" || lower.ends_with("_id") || lower.ends_with("key"))
        })
        .map(|c| c.name.clone())
        .collect()
}

/// Cluster a table on its numeric feature columns. Rows with a missing
/// feature value keep an empty segment label and do not participate in
/// fitting.
fn segment_table(
    table: &Table,
    feature_columns: &[String],
    seed: u64,
) -> Result<(Table, ModelMetadata), PipelineError> {
    let idx: Vec<usize> = feature_columns
        .iter()
        .filter_map(|c| table.column_index(c))
        .collect();

    let mut points = Vec::new();
    let mut point_rows = Vec::new();
    for (row_i, row) in table.rows.iter().enumerate() {
        let vals: Option<Vec<f64>> = idx.iter().map(|&i| values::parse_number(&row[i])).collect();
        if let Some(vals) = vals {
            points.push(vals);
            point_rows.push(row_i);
        }
    }
    if points.is_empty() {
        return Err(PipelineError::stage(
            Stage::Segment,
            "no complete rows to segment",
        ));
    }

    standardize(&mut points);
    let k = DEFAULT_K.min(distinct_points(&points));
    let mut rng = StdRng::seed_from_u64(seed);
    let fit = kmeans(&points, k, &mut rng);

    let mut out = table.clone();
    out.name = "segments".to_string();
    out.columns.push("segment".to_string());
    for row in &mut out.rows {
        row.push(String::new());
    }
    for (p, &row_i) in fit.assignments.iter().zip(&point_rows) {
        let last = out.columns.len() - 1;
        out.rows[row_i][last] = p.to_string();
    }

    let metadata = ModelMetadata {
        algorithm: "kmeans",
        k,
        seed,
        iterations: fit.iterations,
        inertia: fit.inertia,
        features: feature_columns.to_vec(),
    };
    Ok((out, metadata))
}

/// Per-column z-score standardization; constant columns become zeros.
fn standardize(points: &mut [Vec<f64>]) {
    if points.is_empty() {
        return;
    }
    let dims = points[0].len();
    let n = points.len() as f64;
    for d in 0..dims {
        let mean = points.iter().map(|p| p[d]).sum::<f64>() / n;
        let var = points.iter().map(|p| (p[d] - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();
        for p in points.iter_mut() {
            p[d] = if std > 0.0 { (p[d] - mean) / std } else { 0.0 };
        }
    }
}

fn distinct_points(points: &[Vec<f64>]) -> usize {
    let mut seen: Vec<&[f64]> = Vec::new();
    for p in points {
        if !seen.iter().any(|s| *s == p.as_slice()) {
            seen.push(p);
        }
    }
    seen.len().max(1)
}

struct KmeansFit {
    assignments: Vec<usize>,
    iterations: usize,
    inertia: f64,
}

fn kmeans(points: &[Vec<f64>], k: usize, rng: &mut StdRng) -> KmeansFit {
    let dims = points[0].len();

    // Initial centroids: the first k distinct points in a seeded
    // shuffle of the row order.
    let mut order: Vec<usize> = (0..points.len()).collect();
    order.shuffle(rng);
    let mut centroids: Vec<Vec<f64>> = Vec::new();
    for &i in &order {
        if centroids.len() == k {
            break;
        }
        if !centroids.iter().any(|c| *c == points[i]) {
            centroids.push(points[i].clone());
        }
    }

    let mut assignments = vec![0usize; points.len()];
    let mut iterations = 0;
    for iter in 1..=MAX_ITERATIONS {
        iterations = iter;
        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let nearest = nearest_centroid(p, &centroids);
            if assignments[i] != nearest {
                assignments[i] = nearest;
                changed = true;
            }
        }

        let mut sums = vec![vec![0.0; dims]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (i, p) in points.iter().enumerate() {
            counts[assignments[i]] += 1;
            for d in 0..dims {
                sums[assignments[i]][d] += p[d];
            }
        }
        for (c, centroid) in centroids.iter_mut().enumerate() {
            // An emptied cluster keeps its old centroid.
            if counts[c] > 0 {
                for d in 0..dims {
                    centroid[d] = sums[c][d] / counts[c] as f64;
                }
            }
        }

        if !changed && iter > 1 {
            break;
        }
    }

    let inertia = points
        .iter()
        .zip(&assignments)
        .map(|(p, &a)| squared_distance(p, &centroids[a]))
        .sum();

    KmeansFit {
        assignments,
        iterations,
        inertia,
    }
}

fn nearest_centroid(point: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = squared_distance(point, c);
        if d < best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}
