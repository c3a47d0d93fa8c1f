//! Governance enforcement -- personal-data classification and the
//! remove/pseudonymize pass applied before any table leaves cleaning.
//!
//! Classification combines a configurable name vocabulary with value
//! shape sniffing, so a personal column slips through neither by being
//! renamed nor by carrying an innocuous header. The applied policy is
//! persisted next to the data it governs; downstream stages re-classify
//! their inputs and treat an uncovered personal column as fatal.

pub mod apply;
pub mod classify;
pub mod error;

pub use apply::{apply, pseudonymize, salt_fingerprint, GovernancePolicy};
pub use classify::{classify, Action, GovernanceConfig, PersonalColumn, Signal};
pub use error::GovernError;

use strata_core::Table;

/// Re-classify a table that already passed governance and check every
/// detected personal column against the emitted policy. A personal
/// column the policy does not account for is a fatal violation.
pub fn audit(
    table: &Table,
    policy: Option<&GovernancePolicy>,
    config: &GovernanceConfig,
) -> Result<(), GovernError> {
    for found in classify(table, config) {
        let covered = policy
            .map(|p| p.pseudonymized.contains(&found.column))
            .unwrap_or(false);
        if !covered {
            return Err(GovernError::Violation {
                table: table.name.clone(),
                column: found.column,
            });
        }
    }
    Ok(())
}
