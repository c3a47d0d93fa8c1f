//! Personal-column detection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strata_core::values;
use strata_core::Table;

/// What to do with a personal column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Replace each value with a salted hash; keeps joins stable.
    Pseudonymize,
    /// Drop the column entirely.
    Remove,
}

/// Why a column was classified personal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Vocabulary,
    EmailShape,
    PhoneShape,
    BirthDateShape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonalColumn {
    pub column: String,
    pub action: Action,
    pub signal: Signal,
}

/// Classification settings: the name vocabulary plus per-column action
/// overrides. Deserialized from the `[governance]` config section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GovernanceConfig {
    pub vocabulary: Vec<String>,
    pub overrides: BTreeMap<String, Action>,
}

impl Default for GovernanceConfig {
    fn default() -> GovernanceConfig {
        GovernanceConfig {
            vocabulary: [
                "name",
                "email",
                "phone",
                "address",
                "birth",
                "dob",
                "ssn",
                "social_security",
                "passport",
                "customer_id",
                "user_id",
                "account_id",
            ]
            .iter()
            .map(|t| t.to_string())
            .collect(),
            overrides: BTreeMap::new(),
        }
    }
}

// Shape sniffing threshold over non-null values.
const SHAPE_MAJORITY: f64 = 0.8;

/// Detect personal columns in a table.
///
/// A column is personal when its lowercased name contains a vocabulary
/// term, or when a clear majority of its non-null values is email- or
/// phone-shaped, or when a birth-hinting name carries date-shaped
/// values. Identifier columns are pseudonymized so downstream joins
/// survive; everything else is removed. Both defaults yield to an
/// explicit per-column override.
pub fn classify(table: &Table, config: &GovernanceConfig) -> Vec<PersonalColumn> {
    let mut found = Vec::new();
    for (i, column) in table.columns.iter().enumerate() {
        let lower = column.to_ascii_lowercase();
        let signal = if config.vocabulary.iter().any(|t| lower.contains(t.as_str())) {
            Some(Signal::Vocabulary)
        } else if shape_majority(table, i, values::looks_like_email) {
            Some(Signal::EmailShape)
        } else if shape_majority(table, i, values::looks_like_phone) {
            Some(Signal::PhoneShape)
        } else if (lower.contains("birth") || lower.contains("dob"))
            && shape_majority(table, i, |v| values::parse_date(v).is_some())
        {
            Some(Signal::BirthDateShape)
        } else {
            None
        };

        if let Some(signal) = signal {
            let action = config
                .overrides
                .get(column)
                .copied()
                .unwrap_or(if identifier_like(&lower) {
                    Action::Pseudonymize
                } else {
                    Action::Remove
                });
            found.push(PersonalColumn {
                column: column.clone(),
                action,
                signal,
            });
        }
    }
    found
}

fn identifier_like(lower: &str) -> bool {
    lower == "id" || lower.ends_with("_id")
}

fn shape_majority(table: &Table, col: usize, shape: fn(&str) -> bool) -> bool {
    let mut seen = 0u64;
    let mut hits = 0u64;
    for row in &table.rows {
        let v = &row[col];
        if values::is_null(v) {
            continue;
        }
        seen += 1;
        if shape(v) {
            hits += 1;
        }
    }
    seen > 0 && hits as f64 / seen as f64 >= SHAPE_MAJORITY
}
