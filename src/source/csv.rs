use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, Trim};
use tracing::debug;

use super::{
    is_valid_identifier, numeric_range, AccessPolicy, Column, ColumnKind, ConnectionParams,
    SourceError, TableConnection, TableRows, TableSource,
};
use crate::dataset::{dedup_rows, Value};

/// Tables stored as CSV files: `<root>/<database>/<table>.csv`.
///
/// The header row names the columns. A column is numeric when every cell
/// parses as a finite number, otherwise it is a text column.
#[derive(Debug, Clone)]
pub struct CsvSource {
    root: PathBuf,
    policy: AccessPolicy,
}

impl CsvSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            policy: AccessPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TableSource for CsvSource {
    fn connect(
        &self,
        params: &ConnectionParams,
    ) -> Result<Box<dyn TableConnection + '_>, SourceError> {
        self.policy.check(params)?;

        let directory = self.root.join(&params.database);
        if !is_valid_identifier(&params.database) || !directory.is_dir() {
            return Err(SourceError::UnknownDatabase(params.database.clone()));
        }

        Ok(Box::new(CsvConnection {
            database: params.database.clone(),
            directory,
        }))
    }
}

struct CsvConnection {
    database: String,
    directory: PathBuf,
}

impl CsvConnection {
    fn read_table(&self, table: &str) -> Result<TableRows, SourceError> {
        let path = self.directory.join(format!("{}.csv", table));
        if !is_valid_identifier(table) || !path.is_file() {
            return Err(SourceError::TableNotFound {
                database: self.database.clone(),
                table: table.to_string(),
            });
        }

        let mut reader = ReaderBuilder::new().trim(Trim::All).from_path(&path)?;
        let names: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut cells: Vec<Vec<String>> = Vec::new();
        for record in reader.records() {
            cells.push(record?.iter().map(str::to_string).collect());
        }
        debug!(path = %path.display(), rows = cells.len(), "read csv table");

        let columns: Vec<Column> = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| {
                let numeric = !cells.is_empty()
                    && cells.iter().all(|row| {
                        row[index]
                            .parse::<f64>()
                            .map(f64::is_finite)
                            .unwrap_or(false)
                    });
                let kind = if numeric { ColumnKind::Number } else { ColumnKind::Text };
                Column::new(name, kind)
            })
            .collect();

        let rows = cells
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(&columns)
                    .map(|(cell, column)| match column.kind {
                        ColumnKind::Number => match cell.parse() {
                            Ok(v) => Value::Number(v),
                            Err(_) => Value::Text(cell),
                        },
                        ColumnKind::Text => Value::Text(cell),
                    })
                    .collect()
            })
            .collect();

        Ok(TableRows { columns, rows })
    }

    fn column(
        &self,
        rows: &TableRows,
        table: &str,
        column: &str,
        kind: ColumnKind,
    ) -> Result<usize, SourceError> {
        let index = rows
            .columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| SourceError::ColumnNotFound {
                table: table.to_string(),
                column: column.to_string(),
            })?;
        if rows.columns[index].kind != kind {
            return Err(SourceError::Query(format!(
                "column {} of table {} is not of type {}",
                column, table, kind
            )));
        }
        Ok(index)
    }
}

impl TableConnection for CsvConnection {
    fn schema(&self, table: &str) -> Result<Vec<Column>, SourceError> {
        Ok(self.read_table(table)?.columns)
    }

    fn distinct_rows(&self, table: &str) -> Result<TableRows, SourceError> {
        let TableRows { columns, rows } = self.read_table(table)?;
        Ok(TableRows {
            columns,
            rows: dedup_rows(rows),
        })
    }

    fn column_min_max(&self, table: &str, column: &str) -> Result<Option<(f64, f64)>, SourceError> {
        let rows = self.read_table(table)?;
        let index = self.column(&rows, table, column, ColumnKind::Number)?;
        Ok(numeric_range(&rows.rows, index))
    }

    fn distinct_values(&self, table: &str, column: &str) -> Result<BTreeSet<String>, SourceError> {
        let rows = self.read_table(table)?;
        let index = self.column(&rows, table, column, ColumnKind::Text)?;
        Ok(rows
            .rows
            .into_iter()
            .filter_map(|mut row| match row.swap_remove(index) {
                Value::Text(v) => Some(v),
                Value::Number(_) => None,
            })
            .collect())
    }
}
