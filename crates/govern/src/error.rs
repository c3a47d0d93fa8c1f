use thiserror::Error;

#[derive(Debug, Error)]
pub enum GovernError {
    #[error("personal column `{column}` in table `{table}` is not covered by a governance policy")]
    Violation { table: String, column: String },

    #[error("pseudonymization salt is not configured but table `{table}` carries personal data")]
    MissingSalt { table: String },

    #[error("governance policy lists `{column}` as handled but not as a personal field")]
    PolicyInvariant { column: String },
}
