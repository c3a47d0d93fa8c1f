/// Errors raised when parsing or minting run identities.
///
/// A malformed or missing upstream identity is a configuration fault,
/// not a transient condition -- callers treat it as fatal and never
/// retry (it halts the pipeline before anything is minted).
#[derive(Debug, thiserror::Error)]
pub enum RunIdError {
    /// The supplied string does not match the `<timestamp>_#<hex>` shape.
    #[error("malformed run id '{raw}': expected <YYYYMMDD_HHMMSS>_#<hex suffix>")]
    Malformed { raw: String },

    /// The stage requires an upstream identity but none was supplied.
    #[error("stage '{stage}' requires an upstream run identity")]
    MissingUpstream { stage: String },

    /// An upstream identity was supplied to a stage that mints fresh ones.
    #[error("stage '{stage}' does not accept an upstream run identity")]
    UnexpectedUpstream { stage: String },
}

/// Errors raised reading or writing delimited tables.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("io error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error on '{path}': {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// A data row's field count disagrees with the header.
    #[error("ragged row in '{path}': row {row} has {found} fields, header has {expected}")]
    RaggedRow {
        path: String,
        row: usize,
        found: usize,
        expected: usize,
    },
}
