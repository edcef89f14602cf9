use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use bincode::{Decode, Encode};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::attribute::Attribute;
use crate::error::{KMeansError, Result};
use crate::item::Item;
use crate::source::{
    infer_columns, numeric_range, Column, ColumnKind, ConnectionParams, SourceError, TableRows,
    TableSource,
};
use crate::tuple::Tuple;

/// One raw cell of a table row.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Value {
    Number(f64),
    Text(String),
}

/// Hashable view of a [`Value`]; numbers are compared by bit pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ValueKey<'a> {
    Number(u64),
    Text(&'a str),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            Value::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            Value::Number(_) => None,
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Value::Number(_) => ColumnKind::Number,
            Value::Text(_) => ColumnKind::Text,
        }
    }

    pub(crate) fn key(&self) -> ValueKey<'_> {
        match self {
            Value::Number(v) => ValueKey::Number(v.to_bits()),
            Value::Text(v) => ValueKey::Text(v),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Debug keeps the decimal point on integral values ("85.0").
            Value::Number(v) => write!(f, "{:?}", v),
            Value::Text(v) => f.write_str(v),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Drop repeated rows, keeping the first occurrence of each.
pub(crate) fn dedup_rows(rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    let mut seen: HashSet<Vec<ValueKey<'_>>> = HashSet::with_capacity(rows.len());
    let mut keep = Vec::with_capacity(rows.len());
    for row in &rows {
        keep.push(seen.insert(row.iter().map(Value::key).collect()));
    }
    drop(seen);

    rows.into_iter()
        .zip(keep)
        .filter_map(|(row, keep)| keep.then_some(row))
        .collect()
}

/// Immutable in-memory materialization of a table's distinct rows.
///
/// Every row has one value per attribute, in attribute index order. A
/// dataset is built once per clustering request and only read afterwards.
#[derive(Debug, Clone)]
pub struct Dataset {
    table: String,
    rows: Vec<Vec<Value>>,
    attributes: Vec<Arc<Attribute>>,
}

impl Dataset {
    /// Materialize `table` from a source collaborator.
    ///
    /// # Arguments
    ///
    /// * `source` - The table source to query
    /// * `params` - Database name and credentials for the connection
    /// * `table` - Name of the table to load
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The source rejects the connection ([`KMeansError::Connection`])
    /// - A query fails, e.g. the table does not exist ([`KMeansError::Source`])
    /// - The table has no rows ([`KMeansError::EmptySet`])
    /// - A min/max aggregate returns nothing ([`KMeansError::NoValue`])
    pub fn load(source: &dyn TableSource, params: &ConnectionParams, table: &str) -> Result<Self> {
        let connection = source.connect(params).map_err(KMeansError::Connection)?;
        let TableRows { columns, rows } = connection.distinct_rows(table)?;

        if rows.is_empty() {
            return Err(KMeansError::EmptySet(table.to_string()));
        }

        let mut attributes = Vec::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            let attribute = match column.kind {
                ColumnKind::Number => {
                    let (min, max) = connection
                        .column_min_max(table, &column.name)?
                        .ok_or_else(|| KMeansError::NoValue(column.name.clone()))?;
                    Attribute::continuous(&column.name, index, min, max)
                }
                ColumnKind::Text => {
                    let values = connection.distinct_values(table, &column.name)?;
                    Attribute::discrete(&column.name, index, values)
                }
            };
            attributes.push(Arc::new(attribute));
        }

        Self::with_attributes(table, rows, attributes)
    }

    /// Build a dataset directly from rows, deriving every attribute from the
    /// values themselves (range for numeric columns, domain for text ones).
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        Self::from_named_rows("", columns, rows)
    }

    pub(crate) fn from_named_rows(
        table: &str,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Self> {
        if rows.is_empty() {
            return Err(KMeansError::EmptySet(table.to_string()));
        }
        let columns = infer_columns(columns, &rows)?;

        let mut attributes = Vec::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            let attribute = match column.kind {
                ColumnKind::Number => {
                    let (min, max) = numeric_range(&rows, index)
                        .ok_or_else(|| KMeansError::NoValue(column.name.clone()))?;
                    Attribute::continuous(&column.name, index, min, max)
                }
                ColumnKind::Text => {
                    let values = rows
                        .iter()
                        .filter_map(|row| row[index].as_text())
                        .map(str::to_string)
                        .collect();
                    Attribute::discrete(&column.name, index, values)
                }
            };
            attributes.push(Arc::new(attribute));
        }

        Self::with_attributes(table, rows, attributes)
    }

    fn with_attributes(
        table: &str,
        rows: Vec<Vec<Value>>,
        attributes: Vec<Arc<Attribute>>,
    ) -> Result<Self> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != attributes.len() {
                return Err(SourceError::Query(format!(
                    "row {} has {} values, expected {}",
                    i,
                    row.len(),
                    attributes.len()
                ))
                .into());
            }
            for (value, attribute) in row.iter().zip(&attributes) {
                if value.kind() != attribute.kind() {
                    return Err(SourceError::Query(format!(
                        "row {} holds a {} value in column {}",
                        i,
                        value.kind(),
                        attribute.name()
                    ))
                    .into());
                }
            }
        }

        Ok(Self {
            table: table.to_string(),
            rows: dedup_rows(rows),
            attributes,
        })
    }

    /// Name of the source table (empty for datasets built from raw rows).
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Number of distinct rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn n_attributes(&self) -> usize {
        self.attributes.len()
    }

    pub fn attributes(&self) -> &[Arc<Attribute>] {
        &self.attributes
    }

    pub fn attribute(&self, index: usize) -> &Attribute {
        &self.attributes[index]
    }

    pub fn row(&self, index: usize) -> &[Value] {
        &self.rows[index]
    }

    pub fn value(&self, row: usize, attribute: usize) -> &Value {
        &self.rows[row][attribute]
    }

    /// Column layout of the dataset, in attribute order.
    pub fn columns(&self) -> Vec<Column> {
        self.attributes
            .iter()
            .map(|attribute| Column::new(attribute.name(), attribute.kind()))
            .collect()
    }

    /// Column names separated (and terminated) by a single space.
    pub fn schema(&self) -> String {
        self.attributes
            .iter()
            .map(|attribute| format!("{} ", attribute.name()))
            .collect()
    }

    /// The tuple view of row `index`, bound to this dataset's attributes.
    pub fn item_set(&self, index: usize) -> Tuple {
        self.attributes
            .iter()
            .zip(&self.rows[index])
            .map(|(attribute, value)| Item::new(Arc::clone(attribute), value.clone()))
            .collect()
    }

    fn same_values(&self, a: usize, b: usize) -> bool {
        self.rows[a]
            .iter()
            .zip(&self.rows[b])
            .all(|(x, y)| x.key() == y.key())
    }

    /// Choose `k` distinct row indices to seed the centroids.
    ///
    /// Indices are drawn uniformly without replacement and no two chosen rows
    /// hold identical values. Rows are visited in a random permutation, so the
    /// draw always terminates.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `k` is 0 or greater than the number of rows
    /// - Fewer than `k` value-distinct rows exist
    pub fn sample<R: Rng + ?Sized>(&self, k: usize, rng: &mut R) -> Result<Vec<usize>> {
        let n_rows = self.len();
        if k == 0 || k > n_rows {
            return Err(KMeansError::OutOfRange { k, rows: n_rows });
        }

        let mut order: Vec<usize> = (0..n_rows).collect();
        order.shuffle(rng);

        let mut chosen: Vec<usize> = Vec::with_capacity(k);
        for candidate in order {
            if chosen.iter().any(|&c| self.same_values(c, candidate)) {
                continue;
            }
            chosen.push(candidate);
            if chosen.len() == k {
                return Ok(chosen);
            }
        }

        Err(KMeansError::InsufficientDistinctRows {
            k,
            distinct: chosen.len(),
        })
    }

    /// Representative value of `attribute` over the given member rows.
    ///
    /// Continuous attributes use the arithmetic mean. Discrete attributes use
    /// the most frequent domain value, scanning the domain in sorted order and
    /// switching only on a strictly greater count, so the first maximum wins.
    /// Returns `None` for an empty member set.
    pub fn compute_prototype(
        &self,
        members: &BTreeSet<usize>,
        attribute: &Attribute,
    ) -> Option<Value> {
        if members.is_empty() {
            return None;
        }

        match attribute {
            Attribute::Continuous { index, .. } => {
                let sum: f64 = members
                    .iter()
                    .filter_map(|&row| self.value(row, *index).as_number())
                    .sum();
                Some(Value::Number(sum / members.len() as f64))
            }
            Attribute::Discrete { .. } => {
                let mut domain = attribute.domain();
                let mut prototype = domain.next()?;
                let mut max_frequency = attribute.frequency(self, members, prototype);
                for value in domain {
                    let frequency = attribute.frequency(self, members, value);
                    if frequency > max_frequency {
                        max_frequency = frequency;
                        prototype = value;
                    }
                }
                Some(Value::from(prototype))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn weather() -> Dataset {
        Dataset::from_rows(
            vec!["outlook".into(), "temperature".into()],
            vec![
                vec![Value::from("sunny"), Value::from(30.0)],
                vec![Value::from("rain"), Value::from(10.0)],
                vec![Value::from("overcast"), Value::from(20.0)],
                vec![Value::from("rain"), Value::from(14.0)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_from_rows_derives_attributes() {
        let dataset = weather();
        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.n_attributes(), 2);

        assert_eq!(
            dataset.attribute(0).domain().collect::<Vec<_>>(),
            vec!["overcast", "rain", "sunny"]
        );
        match dataset.attribute(1) {
            Attribute::Continuous { min, max, .. } => {
                assert_relative_eq!(*min, 10.0);
                assert_relative_eq!(*max, 30.0);
            }
            other => panic!("expected continuous attribute, got {:?}", other),
        }
    }

    #[test]
    fn test_from_rows_suppresses_duplicates() {
        let dataset = Dataset::from_rows(
            vec!["a".into()],
            vec![
                vec![Value::from(1.0)],
                vec![Value::from(2.0)],
                vec![Value::from(1.0)],
            ],
        )
        .unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.row(1), &[Value::from(2.0)]);
    }

    #[test]
    fn test_from_rows_empty_is_error() {
        let result = Dataset::from_rows(vec!["a".into()], vec![]);
        assert!(matches!(result, Err(KMeansError::EmptySet(_))));
    }

    #[test]
    fn test_from_rows_mixed_column_is_error() {
        let result = Dataset::from_rows(
            vec!["a".into()],
            vec![vec![Value::from(1.0)], vec![Value::from("x")]],
        );
        assert!(matches!(result, Err(KMeansError::Source(_))));
    }

    #[test]
    fn test_schema_string() {
        assert_eq!(weather().schema(), "outlook temperature ");
    }

    #[test]
    fn test_sample_returns_distinct_indices() {
        let dataset = weather();
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        for k in 1..=dataset.len() {
            let indices = dataset.sample(k, &mut rng).unwrap();
            assert_eq!(indices.len(), k);
            let unique: BTreeSet<usize> = indices.iter().copied().collect();
            assert_eq!(unique.len(), k);
            for (i, &a) in indices.iter().enumerate() {
                for &b in &indices[i + 1..] {
                    assert_ne!(dataset.row(a), dataset.row(b));
                }
            }
        }
    }

    #[test]
    fn test_sample_out_of_range() {
        let dataset = weather();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        assert!(matches!(
            dataset.sample(0, &mut rng),
            Err(KMeansError::OutOfRange { k: 0, rows: 4 })
        ));
        assert!(matches!(
            dataset.sample(5, &mut rng),
            Err(KMeansError::OutOfRange { k: 5, rows: 4 })
        ));
    }

    #[test]
    fn test_sample_detects_value_identical_rows() {
        // Built by hand so the duplicate row survives deduplication.
        let dataset = Dataset {
            table: String::new(),
            rows: vec![vec![Value::from(1.0)], vec![Value::from(1.0)]],
            attributes: vec![Arc::new(Attribute::continuous("a", 0, 1.0, 1.0))],
        };
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        assert!(matches!(
            dataset.sample(2, &mut rng),
            Err(KMeansError::InsufficientDistinctRows { k: 2, distinct: 1 })
        ));
        assert_eq!(dataset.sample(1, &mut rng).unwrap().len(), 1);
    }

    #[test]
    fn test_continuous_prototype_is_mean() {
        let dataset = weather();
        let members: BTreeSet<usize> = [1, 3].into_iter().collect();
        let prototype = dataset.compute_prototype(&members, dataset.attribute(1));
        assert_eq!(prototype, Some(Value::Number(12.0)));
    }

    #[test]
    fn test_discrete_prototype_is_mode() {
        let dataset = weather();
        let members: BTreeSet<usize> = [0, 1, 3].into_iter().collect();
        let prototype = dataset.compute_prototype(&members, dataset.attribute(0));
        assert_eq!(prototype, Some(Value::from("rain")));
    }

    #[test]
    fn test_discrete_prototype_tie_takes_first_in_sort_order() {
        let dataset = weather();
        // sunny and overcast each appear once; overcast sorts first.
        let members: BTreeSet<usize> = [0, 2].into_iter().collect();
        let prototype = dataset.compute_prototype(&members, dataset.attribute(0));
        assert_eq!(prototype, Some(Value::from("overcast")));
    }

    #[test]
    fn test_prototype_of_empty_set() {
        let dataset = weather();
        let members = BTreeSet::new();
        assert_eq!(dataset.compute_prototype(&members, dataset.attribute(0)), None);
        assert_eq!(dataset.compute_prototype(&members, dataset.attribute(1)), None);
    }

    #[test]
    fn test_item_set_matches_row() {
        let dataset = weather();
        let tuple = dataset.item_set(2);
        assert_eq!(tuple.len(), 2);
        assert_eq!(tuple.get(0).value(), &Value::from("overcast"));
        assert_eq!(tuple.get(1).value(), &Value::from(20.0));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::from(85.0).to_string(), "85.0");
        assert_eq!(Value::from(30.5).to_string(), "30.5");
        assert_eq!(Value::from("sunny").to_string(), "sunny");
    }
}
