//! Write-once run directories with atomic publish.

use std::fs;
use std::path::{Path, PathBuf};

use strata_core::{RunId, Stage};
use tempfile::TempDir;

use crate::error::StoreError;
use crate::manifest::ArtifactManifest;

/// Handle to the artifact root. Cheap to clone; all state lives on disk.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> ArtifactStore {
        ArtifactStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Published directory for a (stage, run) pair.
    pub fn run_dir(&self, stage: Stage, run_id: &RunId) -> PathBuf {
        self.root.join(stage.dir_name()).join(run_id.to_string())
    }

    /// Resolve a manifest-relative file path against the artifact root.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Begin staging a new run. Fails immediately if the target is
    /// already published; the definitive check happens again at publish
    /// time, since another run may race us to the rename.
    pub fn begin(&self, stage: Stage, run_id: &RunId) -> Result<StagedRun, StoreError> {
        let target = self.run_dir(stage, run_id);
        if target.exists() {
            return Err(StoreError::DuplicateRun {
                stage: stage.to_string(),
                run_id: run_id.to_string(),
            });
        }

        let stage_dir = self.root.join(stage.dir_name());
        fs::create_dir_all(&stage_dir).map_err(|e| StoreError::io(stage_dir.display(), e))?;

        // Staging directory is a sibling of the target so the publish
        // rename never crosses a filesystem boundary.
        let temp = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&stage_dir)
            .map_err(|e| StoreError::io(stage_dir.display(), e))?;
        for sub in ["data", "reports", "_meta"] {
            let dir = temp.path().join(sub);
            fs::create_dir_all(&dir).map_err(|e| StoreError::io(dir.display(), e))?;
        }

        Ok(StagedRun {
            temp,
            stage,
            run_id: run_id.clone(),
            target,
        })
    }

    /// Read a published manifest.
    pub fn read(&self, stage: Stage, run_id: &RunId) -> Result<ArtifactManifest, StoreError> {
        let path = self.run_dir(stage, run_id).join("_meta").join("manifest.json");
        let raw = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::RunNotFound {
                    stage: stage.to_string(),
                    run_id: run_id.to_string(),
                }
            } else {
                StoreError::io(path.display(), e)
            }
        })?;
        serde_json::from_str(&raw).map_err(|e| StoreError::json(path.display(), e))
    }

    /// All published run ids for a stage, in identity order (timestamp
    /// component, then suffix) -- never filesystem mtime.
    pub fn list(&self, stage: Stage) -> Result<Vec<RunId>, StoreError> {
        let stage_dir = self.root.join(stage.dir_name());
        if !stage_dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&stage_dir).map_err(|e| StoreError::io(stage_dir.display(), e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(stage_dir.display(), e))?;
            if !entry.path().is_dir() {
                continue;
            }
            // Staging leftovers and foreign directories do not parse as
            // run ids and are ignored.
            if let Ok(id) = RunId::parse(&entry.file_name().to_string_lossy()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// The most recent published run id for a stage, if any.
    pub fn latest(&self, stage: Stage) -> Result<Option<RunId>, StoreError> {
        Ok(self.list(stage)?.into_iter().next_back())
    }
}

/// An in-progress stage write. Files accumulate under a temporary
/// directory; nothing is visible to readers until [`StagedRun::publish`]
/// renames the whole directory into place.
#[derive(Debug)]
pub struct StagedRun {
    temp: TempDir,
    stage: Stage,
    run_id: RunId,
    target: PathBuf,
}

impl StagedRun {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Root of the staging directory.
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.temp.path().join("data")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.temp.path().join("reports")
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.temp.path().join("_meta")
    }

    /// Write a serializable value under `_meta/<name>`.
    pub fn write_meta<T: serde::Serialize>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let path = self.meta_dir().join(name);
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| StoreError::json(path.display(), e))?;
        fs::write(&path, json).map_err(|e| StoreError::io(path.display(), e))
    }

    /// Finalize the manifest and publish atomically. Consumes the
    /// staging handle: after this the directory is write-once.
    pub fn publish(self, manifest: &ArtifactManifest) -> Result<PathBuf, StoreError> {
        self.write_meta("manifest.json", manifest)?;

        let staged = self.temp.keep();
        match fs::rename(&staged, &self.target) {
            Ok(()) => Ok(self.target),
            Err(e) => {
                // Losing the rename race means someone else published this
                // (stage, run) pair first -- a contract violation, not a
                // transient condition. Clean up our staging directory.
                let _ = fs::remove_dir_all(&staged);
                if self.target.exists() {
                    Err(StoreError::DuplicateRun {
                        stage: self.stage.to_string(),
                        run_id: self.run_id.to_string(),
                    })
                } else {
                    Err(StoreError::io(self.target.display(), e))
                }
            }
        }
    }
}
