//! In-memory delimited tables.
//!
//! Every value is carried as a string; the empty string is the NA
//! convention (matching the delimited exports the pipeline ingests).
//! Typed interpretation happens at the point of use via
//! [`crate::values`].

use std::path::Path;

use crate::error::TableError;

/// A named table: header plus string rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Table {
        Table {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Index of a column by name.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn row_count(&self) -> u64 {
        self.rows.len() as u64
    }

    /// Total materialized cells, used for sandbox budget accounting.
    pub fn cell_count(&self) -> u64 {
        self.rows.len() as u64 * self.columns.len() as u64
    }

    /// Read a table from a delimited file. Ragged rows are rejected
    /// rather than padded -- a short row in an export is a data fault
    /// the cleaning stage must see, not something IO should paper over.
    pub fn read_csv(name: impl Into<String>, path: &Path) -> Result<Table, TableError> {
        let display = path.display().to_string();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|source| TableError::Csv {
                path: display.clone(),
                source,
            })?;

        let columns: Vec<String> = reader
            .headers()
            .map_err(|source| TableError::Csv {
                path: display.clone(),
                source,
            })?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record.map_err(|source| TableError::Csv {
                path: display.clone(),
                source,
            })?;
            if record.len() != columns.len() {
                return Err(TableError::RaggedRow {
                    path: display,
                    row: i + 2,
                    found: record.len(),
                    expected: columns.len(),
                });
            }
            rows.push(record.iter().map(|f| f.to_string()).collect());
        }

        Ok(Table {
            name: name.into(),
            columns,
            rows,
        })
    }

    /// Write the table as a delimited file, creating parent directories.
    pub fn write_csv(&self, path: &Path) -> Result<(), TableError> {
        let display = path.display().to_string();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| TableError::Io {
                path: display.clone(),
                source,
            })?;
        }
        let mut writer =
            csv::WriterBuilder::new()
                .from_path(path)
                .map_err(|source| TableError::Csv {
                    path: display.clone(),
                    source,
                })?;
        writer
            .write_record(&self.columns)
            .map_err(|source| TableError::Csv {
                path: display.clone(),
                source,
            })?;
        for row in &self.rows {
            writer.write_record(row).map_err(|source| TableError::Csv {
                path: display.clone(),
                source,
            })?;
        }
        writer.flush().map_err(|source| TableError::Io {
            path: display,
            source,
        })?;
        Ok(())
    }
}
