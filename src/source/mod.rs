//! Table source collaborators.
//!
//! The clustering core never talks to a database directly. It consumes the
//! [`TableSource`] / [`TableConnection`] pair, which exposes exactly what a
//! dataset needs: the distinct rows of a table with per-column type tags, the
//! min/max of a numeric column and the distinct values of a text column.
//!
//! Two implementations ship with the crate:
//! - [`MemorySource`]: tables registered in memory
//! - [`CsvSource`]: one directory per database, one `<table>.csv` per table

mod csv;
mod memory;

pub use self::csv::CsvSource;
pub use self::memory::MemorySource;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::Value;

/// Type tag of a source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Number,
    Text,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Number => f.write_str("number"),
            ColumnKind::Text => f.write_str("text"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Distinct rows of a table together with its column layout.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRows {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

/// Database name and credentials used to open a connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    pub database: String,
    pub user: String,
    pub password: String,
}

impl ConnectionParams {
    pub fn new(
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            user: user.into(),
            password: password.into(),
        }
    }
}

/// Errors reported by a table source.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Access denied for user '{user}'")]
    AccessDenied { user: String },

    #[error("Unknown database '{0}'")]
    UnknownDatabase(String),

    #[error("Table '{database}.{table}' doesn't exist")]
    TableNotFound { database: String, table: String },

    #[error("Unknown column '{column}' in table '{table}'")]
    ColumnNotFound { table: String, column: String },

    #[error("Query failed: {0}")]
    Query(String),

    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A reachable source of tables.
pub trait TableSource: Send + Sync {
    /// Open a connection to `params.database` with the given credentials.
    fn connect(
        &self,
        params: &ConnectionParams,
    ) -> Result<Box<dyn TableConnection + '_>, SourceError>;
}

/// An open connection to one database of a [`TableSource`].
pub trait TableConnection {
    /// Column layout of `table`.
    fn schema(&self, table: &str) -> Result<Vec<Column>, SourceError>;

    /// All distinct rows of `table`, one value per column.
    fn distinct_rows(&self, table: &str) -> Result<TableRows, SourceError>;

    /// `(min, max)` of a numeric column, `None` when the table has no rows.
    fn column_min_max(&self, table: &str, column: &str) -> Result<Option<(f64, f64)>, SourceError>;

    /// Sorted distinct values of a text column.
    fn distinct_values(&self, table: &str, column: &str) -> Result<BTreeSet<String>, SourceError>;
}

/// User/password pairs a source accepts. An empty policy accepts everyone.
///
/// User names are matched case-insensitively; passwords exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    /// Keyed by lowercased user name
    users: BTreeMap<String, String>,
}

impl AccessPolicy {
    pub fn new(users: BTreeMap<String, String>) -> Self {
        users
            .into_iter()
            .fold(Self::default(), |policy, (user, password)| policy.allow(user, password))
    }

    pub fn allow(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(user.into().to_lowercase(), password.into());
        self
    }

    pub fn check(&self, params: &ConnectionParams) -> Result<(), SourceError> {
        if self.users.is_empty() {
            return Ok(());
        }
        match self.users.get(&params.user.to_lowercase()) {
            Some(password) if *password == params.password => Ok(()),
            _ => Err(SourceError::AccessDenied {
                user: params.user.clone(),
            }),
        }
    }
}

/// Derive the column type tags of `rows`.
///
/// A column is numeric when every row holds a number in it and textual when
/// every row holds text; mixing both, or a row of the wrong width, is an error.
pub(crate) fn infer_columns(
    names: Vec<String>,
    rows: &[Vec<Value>],
) -> Result<Vec<Column>, SourceError> {
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != names.len()) {
        return Err(SourceError::Query(format!(
            "row {} has {} values, expected {}",
            i,
            row.len(),
            names.len()
        )));
    }

    names
        .into_iter()
        .enumerate()
        .map(|(index, name)| {
            let kind = rows.first().map_or(ColumnKind::Text, |row| row[index].kind());
            if rows.iter().any(|row| row[index].kind() != kind) {
                return Err(SourceError::Query(format!(
                    "column {} mixes numeric and text values",
                    name
                )));
            }
            Ok(Column::new(name, kind))
        })
        .collect()
}

/// `(min, max)` of column `index` over `rows`, `None` for no rows.
pub(crate) fn numeric_range(rows: &[Vec<Value>], index: usize) -> Option<(f64, f64)> {
    rows.iter()
        .filter_map(|row| row[index].as_number())
        .fold(None, |range, v| match range {
            None => Some((v, v)),
            Some((lo, hi)) => Some((f64::min(lo, v), f64::max(hi, v))),
        })
}

/// Table names double as file names, so only `[A-Za-z0-9_]` is accepted.
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_policy_empty_accepts_everyone() {
        let policy = AccessPolicy::default();
        assert!(policy.check(&ConnectionParams::new("db", "anyone", "")).is_ok());
    }

    #[test]
    fn test_access_policy_checks_password() {
        let policy = AccessPolicy::default().allow("MapUser", "map");
        assert!(policy.check(&ConnectionParams::new("MapDB", "MapUser", "map")).is_ok());

        let err = policy
            .check(&ConnectionParams::new("MapDB", "MapUser", "wrong"))
            .unwrap_err();
        assert!(err.to_string().contains("Access denied"));
        assert!(policy.check(&ConnectionParams::new("MapDB", "other", "map")).is_err());
    }

    #[test]
    fn test_access_policy_user_names_ignore_case() {
        let users = [("mapuser".to_string(), "map".to_string())].into_iter().collect();
        let policy = AccessPolicy::new(users);
        assert!(policy.check(&ConnectionParams::new("MapDB", "MapUser", "map")).is_ok());
        assert!(policy.check(&ConnectionParams::new("MapDB", "MAPUSER", "map")).is_ok());
        assert!(policy.check(&ConnectionParams::new("MapDB", "MapUser", "MAP")).is_err());
    }

    #[test]
    fn test_infer_columns() {
        let rows = vec![
            vec![Value::from("a"), Value::from(1.0)],
            vec![Value::from("b"), Value::from(2.0)],
        ];
        let columns = infer_columns(vec!["x".into(), "y".into()], &rows).unwrap();
        assert_eq!(
            columns,
            vec![Column::new("x", ColumnKind::Text), Column::new("y", ColumnKind::Number)]
        );
    }

    #[test]
    fn test_infer_columns_rejects_ragged_rows() {
        let rows = vec![vec![Value::from("a")], vec![]];
        assert!(infer_columns(vec!["x".into()], &rows).is_err());
    }

    #[test]
    fn test_numeric_range() {
        let rows = vec![vec![Value::from(3.0)], vec![Value::from(-1.0)], vec![Value::from(2.5)]];
        assert_eq!(numeric_range(&rows, 0), Some((-1.0, 3.0)));
        assert_eq!(numeric_range(&[], 0), None);
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("playtennis"));
        assert!(is_valid_identifier("play_tennis_2"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("../etc"));
        assert!(!is_valid_identifier("a b"));
    }
}
