use std::collections::{BTreeMap, BTreeSet};

use super::{
    infer_columns, numeric_range, AccessPolicy, Column, ColumnKind, ConnectionParams, SourceError,
    TableConnection, TableRows, TableSource,
};
use crate::dataset::{dedup_rows, Value};

#[derive(Debug, Clone)]
struct MemoryTable {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl MemoryTable {
    fn column_index(&self, table: &str, column: &str) -> Result<usize, SourceError> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| SourceError::ColumnNotFound {
                table: table.to_string(),
                column: column.to_string(),
            })
    }
}

/// Tables held in memory, grouped by database name.
///
/// # Example
///
/// ```
/// use kmeans_server::source::{ConnectionParams, MemorySource, TableConnection, TableSource};
/// use kmeans_server::Value;
///
/// let source = MemorySource::new()
///     .with_rows(
///         "MapDB",
///         "points",
///         vec!["x".into()],
///         vec![vec![Value::from(1.0)], vec![Value::from(2.0)]],
///     )
///     .unwrap();
///
/// let connection = source.connect(&ConnectionParams::new("MapDB", "", "")).unwrap();
/// assert_eq!(connection.distinct_rows("points").unwrap().rows.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    databases: BTreeMap<String, BTreeMap<String, MemoryTable>>,
    policy: AccessPolicy,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require connections to present one of the policy's credentials.
    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Register a table with an explicit column layout.
    pub fn with_table(
        mut self,
        database: impl Into<String>,
        table: impl Into<String>,
        columns: Vec<Column>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Self, SourceError> {
        let table = table.into();
        for (i, row) in rows.iter().enumerate() {
            let matches = row.len() == columns.len()
                && row.iter().zip(&columns).all(|(v, c)| v.kind() == c.kind);
            if !matches {
                return Err(SourceError::Query(format!(
                    "row {} of table {} does not match its columns",
                    i, table
                )));
            }
        }

        self.databases
            .entry(database.into())
            .or_default()
            .insert(table, MemoryTable { columns, rows });
        Ok(self)
    }

    /// Register a table, inferring the column types from its rows.
    pub fn with_rows(
        self,
        database: impl Into<String>,
        table: impl Into<String>,
        names: Vec<String>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Self, SourceError> {
        let columns = infer_columns(names, &rows)?;
        self.with_table(database, table, columns, rows)
    }
}

impl TableSource for MemorySource {
    fn connect(
        &self,
        params: &ConnectionParams,
    ) -> Result<Box<dyn TableConnection + '_>, SourceError> {
        self.policy.check(params)?;
        let tables = self
            .databases
            .get(&params.database)
            .ok_or_else(|| SourceError::UnknownDatabase(params.database.clone()))?;
        Ok(Box::new(MemoryConnection {
            database: params.database.clone(),
            tables,
        }))
    }
}

struct MemoryConnection<'a> {
    database: String,
    tables: &'a BTreeMap<String, MemoryTable>,
}

impl MemoryConnection<'_> {
    fn table(&self, table: &str) -> Result<&MemoryTable, SourceError> {
        self.tables.get(table).ok_or_else(|| SourceError::TableNotFound {
            database: self.database.clone(),
            table: table.to_string(),
        })
    }

    fn typed_column(
        &self,
        table: &str,
        column: &str,
        kind: ColumnKind,
    ) -> Result<(&MemoryTable, usize), SourceError> {
        let t = self.table(table)?;
        let index = t.column_index(table, column)?;
        if t.columns[index].kind != kind {
            return Err(SourceError::Query(format!(
                "column {} of table {} is not of type {}",
                column, table, kind
            )));
        }
        Ok((t, index))
    }
}

impl TableConnection for MemoryConnection<'_> {
    fn schema(&self, table: &str) -> Result<Vec<Column>, SourceError> {
        Ok(self.table(table)?.columns.clone())
    }

    fn distinct_rows(&self, table: &str) -> Result<TableRows, SourceError> {
        let t = self.table(table)?;
        Ok(TableRows {
            columns: t.columns.clone(),
            rows: dedup_rows(t.rows.clone()),
        })
    }

    fn column_min_max(&self, table: &str, column: &str) -> Result<Option<(f64, f64)>, SourceError> {
        let (t, index) = self.typed_column(table, column, ColumnKind::Number)?;
        Ok(numeric_range(&t.rows, index))
    }

    fn distinct_values(&self, table: &str, column: &str) -> Result<BTreeSet<String>, SourceError> {
        let (t, index) = self.typed_column(table, column, ColumnKind::Text)?;
        Ok(t.rows
            .iter()
            .filter_map(|row| row[index].as_text())
            .map(str::to_string)
            .collect())
    }
}
