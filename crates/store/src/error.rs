/// All errors a store operation can return. Duplicate runs and lost
/// fingerprint races are contract violations -- surfaced immediately,
/// never retried, since retrying could mask a lineage corruption.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A published directory already exists for this (stage, run) pair.
    #[error("duplicate run: stage '{stage}' already published run '{run_id}'")]
    DuplicateRun { stage: String, run_id: String },

    /// No published run directory for the given (stage, run) pair.
    #[error("run not found: stage '{stage}', run '{run_id}'")]
    RunNotFound { stage: String, run_id: String },

    /// Compare-and-swap update of a fingerprint record lost a race --
    /// another run updated the record concurrently.
    #[error("fingerprint record for stage '{stage}' was modified concurrently")]
    FingerprintRace { stage: String },

    #[error("io error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("json error on '{path}': {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl std::fmt::Display, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_string(),
            source,
        }
    }

    pub(crate) fn json(path: impl std::fmt::Display, source: serde_json::Error) -> StoreError {
        StoreError::Json {
            path: path.to_string(),
            source,
        }
    }
}
