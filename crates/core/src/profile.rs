//! Data profiling -- schema overview, inferred types, null and
//! duplicate statistics, key candidates.
//!
//! Profiles are the only description of staged data that ever leaves
//! the pipeline boundary (they feed the drafting prompt of the
//! generation engine), so they carry statistics and shapes only --
//! never raw cell values.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::table::Table;
use crate::values;

/// Type inferred for a column from its value shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferredType {
    Integer,
    Float,
    Date,
    Boolean,
    Text,
    /// All values null.
    Unknown,
}

/// Per-column statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub inferred: InferredType,
    pub nulls: u64,
    pub distinct: u64,
}

/// Per-table statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableProfile {
    pub table: String,
    pub rows: u64,
    pub columns: Vec<ColumnProfile>,
    pub duplicate_rows: u64,
    pub key_candidates: Vec<String>,
}

/// Profile of every table available to a stage, keyed by table name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub tables: BTreeMap<String, TableProfile>,
}

impl ProfileSummary {
    pub fn of_tables<'a>(tables: impl IntoIterator<Item = &'a Table>) -> ProfileSummary {
        let mut summary = ProfileSummary::default();
        for table in tables {
            summary
                .tables
                .insert(table.name.clone(), profile_table(table));
        }
        summary
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }
}

/// Profile a single table.
pub fn profile_table(table: &Table) -> TableProfile {
    let rows = table.row_count();
    let mut columns = Vec::with_capacity(table.columns.len());
    let mut key_candidates = Vec::new();

    for (idx, name) in table.columns.iter().enumerate() {
        let mut nulls = 0u64;
        let mut distinct: BTreeSet<&str> = BTreeSet::new();
        for row in &table.rows {
            let cell = row[idx].as_str();
            if values::is_null(cell) {
                nulls += 1;
            } else {
                distinct.insert(cell);
            }
        }
        let distinct = distinct.len() as u64;
        let inferred = infer_column_type(table, idx);

        let unique_non_null = nulls == 0 && distinct == rows && rows > 0;
        let id_like = {
            let lower = name.to_ascii_lowercase();
            lower.ends_with("_id") || lower.ends_with("key") || lower == "id"
        };
        // An id-shaped column with near-total uniqueness still counts;
        // exports occasionally carry a duplicated key row.
        let near_unique = rows > 0 && distinct as f64 / rows as f64 >= 0.98;
        if unique_non_null || (id_like && near_unique) {
            key_candidates.push(name.clone());
        }

        columns.push(ColumnProfile {
            name: name.clone(),
            inferred,
            nulls,
            distinct,
        });
    }

    let mut seen: BTreeSet<&[String]> = BTreeSet::new();
    let mut duplicate_rows = 0u64;
    for row in &table.rows {
        if !seen.insert(row.as_slice()) {
            duplicate_rows += 1;
        }
    }

    TableProfile {
        table: table.name.clone(),
        rows,
        columns,
        duplicate_rows,
        key_candidates,
    }
}

/// Infer a column type: a 90% majority of non-null values must agree.
fn infer_column_type(table: &Table, idx: usize) -> InferredType {
    let non_null: Vec<&str> = table
        .rows
        .iter()
        .map(|r| r[idx].as_str())
        .filter(|v| !values::is_null(v))
        .collect();
    if non_null.is_empty() {
        return InferredType::Unknown;
    }

    let total = non_null.len() as f64;
    let numeric = non_null
        .iter()
        .filter(|v| values::parse_number(v).is_some())
        .count() as f64;
    let dates = non_null
        .iter()
        .filter(|v| values::parse_date(v).is_some())
        .count() as f64;
    let bools = non_null
        .iter()
        .filter(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "true" | "false" | "yes" | "no"
            )
        })
        .count() as f64;

    if bools / total >= 0.9 {
        InferredType::Boolean
    } else if numeric / total >= 0.9 {
        let all_int = non_null
            .iter()
            .filter_map(|v| values::parse_number(v))
            .all(|n| n.fract() == 0.0);
        if all_int {
            InferredType::Integer
        } else {
            InferredType::Float
        }
    } else if dates / total >= 0.9 {
        InferredType::Date
    } else {
        InferredType::Text
    }
}
