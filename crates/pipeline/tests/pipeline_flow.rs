//! End-to-end orchestrator runs over a small CRM + ERP fixture, using
//! the deterministic generator so no network is involved.

use std::fs;
use std::path::Path;
use std::time::Duration;

use strata_core::Stage;
use strata_pipeline::{run_pipeline, Config, PipelineError, RunOptions, RunReport};
use strata_store::{ArtifactStore, StageStatus};

const CUSTOMERS_CSV: &str = "\
customer_id,name,email,signup_date,spend
c1,Ada Lovelace,ada@example.com,2023-01-05,120.50
c2,Grace Hopper,grace@example.com,2023-01-09,80.00
c3,Alan Turing,alan@example.com,2023-02-01,43.25
c4,Edsger Dijkstra,edsger@example.com,2023-02-14,12.00
c5,Barbara Liskov,barbara@example.com,2023-03-03,99.99
c6,Donald Knuth,don@example.com,2023-03-21,150.00
c7,Tony Hoare,tony@example.com,2023-04-02,7.50
c8,Frances Allen,fran@example.com,2023-04-19,61.40
c9,John Backus,john@example.com,2023-05-06,88.10
c10,Ken Thompson,ken@example.com,not-a-date,30.00
";

const PRODUCTS_CSV: &str = "\
product_id,title,category,price
p1,Widget,tools,9.99
p2,Gadget,tools,19.99
p3,Doohickey,parts,4.50
p4,Gizmo,parts,14.00
";

fn write_sources(root: &Path) {
    fs::create_dir_all(root.join("crm")).unwrap();
    fs::create_dir_all(root.join("erp")).unwrap();
    fs::write(root.join("crm").join("customers.csv"), CUSTOMERS_CSV).unwrap();
    fs::write(root.join("erp").join("products.csv"), PRODUCTS_CSV).unwrap();
}

fn test_config(root: &Path) -> Config {
    Config {
        artifacts: root.join("artifacts"),
        source_crm: root.join("crm"),
        source_erp: root.join("erp"),
        retry_ceiling: 3,
        exec_timeout: Duration::from_secs(30),
        exec_max_cells: 10_000_000,
        model: None,
        api_key: None,
        salt: Some("test-salt".into()),
        governance: Default::default(),
    }
}

fn options() -> RunOptions {
    RunOptions {
        skip_generation: true,
        ..RunOptions::default()
    }
}

fn stage_report(report: &RunReport, stage: Stage) -> &strata_pipeline::StageReport {
    report
        .stages
        .iter()
        .find(|s| s.stage == stage)
        .unwrap_or_else(|| panic!("no report for {}", stage))
}

#[test]
fn full_run_covers_all_five_stages() {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());
    let config = test_config(dir.path());

    let report = run_pipeline(&config, &options()).unwrap();

    let stages: Vec<Stage> = report.stages.iter().map(|s| s.stage).collect();
    assert_eq!(
        stages,
        vec![
            Stage::Ingest,
            Stage::Clean,
            Stage::Model,
            Stage::Feature,
            Stage::Segment
        ]
    );
    for s in &report.stages {
        assert_eq!(s.status, StageStatus::Success, "{} should succeed", s.stage);
    }

    // 14 source rows; cleaning drops the one customer with an
    // unparseable signup date.
    let ingest = stage_report(&report, Stage::Ingest);
    assert_eq!(ingest.rows_in, 14);
    assert_eq!(ingest.rows_out, 14);
    let clean = stage_report(&report, Stage::Clean);
    assert_eq!(clean.rows_in, 14);
    assert_eq!(clean.rows_out, 13);
    let model = stage_report(&report, Stage::Model);
    assert_eq!(model.rows_out, 13);
    let feature = stage_report(&report, Stage::Feature);
    assert_eq!(feature.rows_out, 13);
    // Segmentation runs over the per-customer feature mart only.
    let segment = stage_report(&report, Stage::Segment);
    assert_eq!(segment.rows_out, 9);
}

#[test]
fn lineage_binds_downstream_stages_to_the_ingestion() {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());
    let config = test_config(dir.path());

    let report = run_pipeline(&config, &options()).unwrap();

    let ingest = &stage_report(&report, Stage::Ingest).run_id;
    let clean = &stage_report(&report, Stage::Clean).run_id;
    assert_eq!(clean.suffix(), ingest.suffix());
    for stage in [Stage::Model, Stage::Feature, Stage::Segment] {
        assert_eq!(
            &stage_report(&report, stage).run_id,
            ingest,
            "{} must reuse the ingest identity",
            stage
        );
    }
}

#[test]
fn governance_strips_personal_columns_from_clean_output() {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());
    let config = test_config(dir.path());

    let report = run_pipeline(&config, &options()).unwrap();
    let clean = stage_report(&report, Stage::Clean);

    let store = ArtifactStore::new(&config.artifacts);
    let manifest = store.read(Stage::Clean, &clean.run_id).unwrap();
    assert_eq!(manifest.status, StageStatus::Success);
    assert!(manifest.policy_path.is_some());
    assert!(manifest.transform_path.is_some());

    let customers = manifest
        .files
        .iter()
        .find(|f| f.path.ends_with("customers.csv"))
        .unwrap();
    let text = fs::read_to_string(store.resolve(&customers.path)).unwrap();
    let header = text.lines().next().unwrap();
    assert_eq!(header, "customer_id,signup_date,spend");
    assert!(!text.contains('@'), "raw emails must not survive cleaning");
    assert!(!text.contains("Ada"), "raw names must not survive cleaning");

    // Ids are pseudonymized: 16 lowercase hex characters, never the raw token.
    for line in text.lines().skip(1) {
        let id = line.split(',').next().unwrap();
        assert_eq!(id.len(), 16);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    let policy: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(store.resolve(manifest.policy_path.as_deref().unwrap())).unwrap(),
    )
    .unwrap();
    assert!(policy["removed"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v == "email"));
    assert!(policy["pseudonymized"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v == "customer_id"));
    // The policy carries a salt fingerprint, never the salt itself.
    assert_ne!(policy["salt_fingerprint"], "test-salt");
}

#[test]
fn operational_column_names_survive_transform_vetting() {
    // Exports routinely carry columns like `processed_at`; their names
    // must not trip the generated-transform vetting, or the clean stage
    // could never converge for such a source.
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());
    let orders = "\
order_id,customer_id,amount,processed_at
o1,c1,19.99,2023-01-06
o2,c2,5.00,2023-01-10
o3,c3,12.75,2023-02-03
";
    fs::write(dir.path().join("erp").join("orders.csv"), orders).unwrap();
    let config = test_config(dir.path());

    let report = run_pipeline(&config, &options()).unwrap();
    let clean = stage_report(&report, Stage::Clean);
    assert_eq!(clean.status, StageStatus::Success);

    let store = ArtifactStore::new(&config.artifacts);
    let manifest = store.read(Stage::Clean, &clean.run_id).unwrap();
    let cleaned = manifest
        .files
        .iter()
        .find(|f| f.path.ends_with("orders.csv"))
        .unwrap();
    let text = fs::read_to_string(store.resolve(&cleaned.path)).unwrap();
    let header = text.lines().next().unwrap();
    assert!(header.contains("processed_at"), "header was {}", header);
    assert_eq!(text.lines().count(), 4);
}

#[test]
fn unchanged_sources_skip_every_stage_under_fresh_identities() {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());
    let config = test_config(dir.path());

    let first = run_pipeline(&config, &options()).unwrap();
    let second = run_pipeline(&config, &options()).unwrap();

    for s in &second.stages {
        assert_eq!(s.status, StageStatus::Skipped, "{} should skip", s.stage);
    }
    // A skipped stage still gets its own identity.
    assert_ne!(
        stage_report(&first, Stage::Ingest).run_id,
        stage_report(&second, Stage::Ingest).run_id
    );
    // Skipped runs keep the prior row accounting.
    assert_eq!(stage_report(&second, Stage::Clean).rows_out, 13);
}

#[test]
fn source_change_invalidates_the_skip() {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());
    let config = test_config(dir.path());

    run_pipeline(&config, &options()).unwrap();

    let customers = dir.path().join("crm").join("customers.csv");
    let mut text = fs::read_to_string(&customers).unwrap();
    text.push_str("c11,Ada Byron,byron@example.com,2023-06-01,55.00\n");
    fs::write(&customers, text).unwrap();

    let report = run_pipeline(&config, &options()).unwrap();
    assert_eq!(
        stage_report(&report, Stage::Ingest).status,
        StageStatus::Success
    );
    assert_eq!(
        stage_report(&report, Stage::Clean).status,
        StageStatus::Success
    );
    assert_eq!(stage_report(&report, Stage::Clean).rows_out, 14);
}

#[test]
fn missing_source_directory_is_a_precondition_failure() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("crm")).unwrap();
    fs::write(dir.path().join("crm").join("customers.csv"), CUSTOMERS_CSV).unwrap();
    let config = test_config(dir.path());

    let err = run_pipeline(&config, &options()).unwrap_err();
    assert!(matches!(err, PipelineError::Precondition { .. }));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn run_logs_and_metadata_land_under_the_run_directory() {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());
    let config = test_config(dir.path());

    let report = run_pipeline(&config, &options()).unwrap();
    let store = ArtifactStore::new(&config.artifacts);

    let clean = stage_report(&report, Stage::Clean);
    let run_dir = store.run_dir(Stage::Clean, &clean.run_id);
    assert!(run_dir.join("_meta").join("manifest.json").is_file());
    assert!(run_dir.join("_meta").join("data_policy.json").is_file());
    assert!(run_dir.join("_meta").join("transform.json").is_file());
    let log = fs::read_to_string(run_dir.join("run_log.txt")).unwrap();
    assert!(log.contains("RUN_START stage=clean"));
    assert!(log.contains("RUN_END status=success"));

    let ingest_dir = store.run_dir(Stage::Ingest, &stage_report(&report, Stage::Ingest).run_id);
    assert!(ingest_dir.join("reports").join("profile.md").is_file());

    let segment_dir = store.run_dir(Stage::Segment, &stage_report(&report, Stage::Segment).run_id);
    let metadata: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(segment_dir.join("_meta").join("model_metadata.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(metadata["algorithm"], "kmeans");
    assert_eq!(metadata["seed"], 42);
}
