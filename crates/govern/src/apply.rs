//! Policy application: drop removed columns, pseudonymize the rest,
//! and emit the `data_policy.json` record.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strata_core::{values, Table};

use crate::classify::{Action, PersonalColumn};
use crate::error::GovernError;

/// The record persisted as `_meta/data_policy.json` beside governed
/// data. Carries only a salt fingerprint, never the salt itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernancePolicy {
    pub personal_fields: BTreeSet<String>,
    pub pseudonymized: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub salt_fingerprint: String,
}

impl GovernancePolicy {
    /// Every handled column must also be listed as personal.
    fn check_invariant(&self) -> Result<(), GovernError> {
        for column in self.pseudonymized.union(&self.removed) {
            if !self.personal_fields.contains(column) {
                return Err(GovernError::PolicyInvariant {
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Salted hash of a single value, truncated to sixteen hex chars.
/// Stable across runs for the same salt, so pseudonymized identifiers
/// keep joining.
pub fn pseudonymize(salt: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(value.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}

/// Fingerprint of the salt itself, safe to persist.
pub fn salt_fingerprint(salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}

/// Apply a classification to a table: removed columns are dropped,
/// pseudonymized columns are rewritten value by value (nulls stay
/// empty). Returns the governed table and the policy to persist.
pub fn apply(
    table: &Table,
    found: &[PersonalColumn],
    salt: &str,
) -> Result<(Table, GovernancePolicy), GovernError> {
    let mut removed = BTreeSet::new();
    let mut pseudonymized = BTreeSet::new();
    for p in found {
        match p.action {
            Action::Remove => removed.insert(p.column.clone()),
            Action::Pseudonymize => pseudonymized.insert(p.column.clone()),
        };
    }

    let keep: Vec<usize> = (0..table.columns.len())
        .filter(|&i| !removed.contains(&table.columns[i]))
        .collect();

    let mut out = Table::new(
        table.name.clone(),
        keep.iter().map(|&i| table.columns[i].clone()).collect(),
    );
    for row in &table.rows {
        let mut cells = Vec::with_capacity(keep.len());
        for &i in &keep {
            let v = &row[i];
            if pseudonymized.contains(&table.columns[i]) && !values::is_null(v) {
                cells.push(pseudonymize(salt, v));
            } else {
                cells.push(v.clone());
            }
        }
        out.rows.push(cells);
    }

    let policy = GovernancePolicy {
        personal_fields: found.iter().map(|p| p.column.clone()).collect(),
        pseudonymized,
        removed,
        salt_fingerprint: salt_fingerprint(salt),
    };
    policy.check_invariant()?;
    Ok((out, policy))
}
