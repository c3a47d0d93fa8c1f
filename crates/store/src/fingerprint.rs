//! Content fingerprints over stage input sets, and the ledger that
//! remembers the fingerprint of each stage's last successful run.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strata_core::{RunId, Stage};

use crate::error::StoreError;

/// SHA-256 of a file's contents, hex-encoded.
pub fn sha256_file(path: &Path) -> Result<String, StoreError> {
    let mut file = fs::File::open(path).map_err(|e| StoreError::io(path.display(), e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| StoreError::io(path.display(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Combined fingerprint over an input file set.
///
/// Hashes the ordered list of (file name, content hash, size) tuples;
/// ordering is by file name so directory-listing order never leaks into
/// the fingerprint. Any content or size change in any file changes the
/// combined hash.
pub fn combined_fingerprint(paths: &[PathBuf]) -> Result<String, StoreError> {
    let mut entries = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let size = fs::metadata(path)
            .map_err(|e| StoreError::io(path.display(), e))?
            .len();
        entries.push((name, sha256_file(path)?, size));
    }
    entries.sort();

    let mut hasher = Sha256::new();
    for (name, hash, size) in &entries {
        hasher.update(name.as_bytes());
        hasher.update([0]);
        hasher.update(hash.as_bytes());
        hasher.update(size.to_le_bytes());
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Ledger entry for one stage's input set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub input_set_id: String,
    pub combined_hash: String,
    pub last_successful_run_id: RunId,
}

/// One JSON file per stage under `<root>/_fingerprints/`, updated with
/// a compare-and-swap discipline: the caller presents the record it
/// observed, and the update fails if the stored record changed since.
#[derive(Debug, Clone)]
pub struct FingerprintLedger {
    dir: PathBuf,
}

impl FingerprintLedger {
    pub fn new(artifact_root: &Path) -> FingerprintLedger {
        FingerprintLedger {
            dir: artifact_root.join("_fingerprints"),
        }
    }

    fn record_path(&self, stage: Stage) -> PathBuf {
        self.dir.join(format!("{}.json", stage.dir_name()))
    }

    /// Load the stored record for a stage, if any.
    pub fn load(&self, stage: Stage) -> Result<Option<FingerprintRecord>, StoreError> {
        let path = self.record_path(stage);
        match fs::read_to_string(&path) {
            Ok(raw) => {
                let record =
                    serde_json::from_str(&raw).map_err(|e| StoreError::json(path.display(), e))?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path.display(), e)),
        }
    }

    /// Store a new record, failing if the current stored record differs
    /// from `expected` (two concurrent runs must not both believe they
    /// were first to process an input set).
    pub fn update(
        &self,
        stage: Stage,
        expected: Option<&FingerprintRecord>,
        new: &FingerprintRecord,
    ) -> Result<(), StoreError> {
        let current = self.load(stage)?;
        if current.as_ref() != expected {
            return Err(StoreError::FingerprintRace {
                stage: stage.to_string(),
            });
        }

        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(self.dir.display(), e))?;
        let path = self.record_path(stage);
        let json =
            serde_json::to_string_pretty(new).map_err(|e| StoreError::json(path.display(), e))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| StoreError::io(tmp.display(), e))?;
        fs::rename(&tmp, &path).map_err(|e| StoreError::io(path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(hash: &str) -> FingerprintRecord {
        FingerprintRecord {
            input_set_id: "ingest:raw".into(),
            combined_hash: hash.into(),
            last_successful_run_id: RunId::parse("20250114_093010_#a1b2c3").unwrap(),
        }
    }

    #[test]
    fn combined_fingerprint_is_order_independent_and_content_sensitive() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, "id\n1\n").unwrap();
        fs::write(&b, "id\n2\n").unwrap();

        let fwd = combined_fingerprint(&[a.clone(), b.clone()]).unwrap();
        let rev = combined_fingerprint(&[b.clone(), a.clone()]).unwrap();
        assert_eq!(fwd, rev);

        // A single changed byte must change the fingerprint.
        fs::write(&b, "id\n3\n").unwrap();
        assert_ne!(combined_fingerprint(&[a, b]).unwrap(), fwd);
    }

    #[test]
    fn ledger_load_is_none_before_first_update() {
        let dir = TempDir::new().unwrap();
        let ledger = FingerprintLedger::new(dir.path());
        assert_eq!(ledger.load(Stage::Ingest).unwrap(), None);
    }

    #[test]
    fn ledger_update_round_trips() {
        let dir = TempDir::new().unwrap();
        let ledger = FingerprintLedger::new(dir.path());
        let first = record("aaaa");
        ledger.update(Stage::Ingest, None, &first).unwrap();
        assert_eq!(ledger.load(Stage::Ingest).unwrap(), Some(first.clone()));

        let second = record("bbbb");
        ledger.update(Stage::Ingest, Some(&first), &second).unwrap();
        assert_eq!(ledger.load(Stage::Ingest).unwrap(), Some(second));
    }

    #[test]
    fn ledger_update_fails_when_expectation_is_stale() {
        let dir = TempDir::new().unwrap();
        let ledger = FingerprintLedger::new(dir.path());
        let first = record("aaaa");
        ledger.update(Stage::Ingest, None, &first).unwrap();

        // A concurrent run that still expects the empty ledger loses.
        let err = ledger.update(Stage::Ingest, None, &record("cccc")).unwrap_err();
        assert!(matches!(err, StoreError::FingerprintRace { .. }));
        assert_eq!(ledger.load(Stage::Ingest).unwrap(), Some(first));
    }
}
