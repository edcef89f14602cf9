use std::collections::BTreeSet;
use std::fmt;

use crate::dataset::{Dataset, Value};
use crate::source::ColumnKind;

/// Column-level metadata: how the values of one column are compared.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    /// Numeric column, normalized into `[0, 1]` by its observed range
    Continuous {
        name: String,
        index: usize,
        min: f64,
        max: f64,
    },

    /// Categorical column over a finite, sorted domain
    Discrete {
        name: String,
        index: usize,
        values: BTreeSet<String>,
    },
}

impl Attribute {
    pub fn continuous(name: impl Into<String>, index: usize, min: f64, max: f64) -> Self {
        Attribute::Continuous {
            name: name.into(),
            index,
            min,
            max,
        }
    }

    pub fn discrete(name: impl Into<String>, index: usize, values: BTreeSet<String>) -> Self {
        Attribute::Discrete {
            name: name.into(),
            index,
            values,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Attribute::Continuous { name, .. } | Attribute::Discrete { name, .. } => name,
        }
    }

    /// Zero-based column position inside every row of the owning dataset.
    pub fn index(&self) -> usize {
        match self {
            Attribute::Continuous { index, .. } | Attribute::Discrete { index, .. } => *index,
        }
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self, Attribute::Continuous { .. })
    }

    /// The column type tag a value of this attribute must carry.
    pub fn kind(&self) -> ColumnKind {
        match self {
            Attribute::Continuous { .. } => ColumnKind::Number,
            Attribute::Discrete { .. } => ColumnKind::Text,
        }
    }

    /// Min-max normalization of `v`.
    ///
    /// Returns NaN for a degenerate range (`max == min`) or for a discrete
    /// attribute; callers treat NaN distances as zero.
    pub fn scaled(&self, v: f64) -> f64 {
        match self {
            Attribute::Continuous { min, max, .. } => (v - min) / (max - min),
            Attribute::Discrete { .. } => f64::NAN,
        }
    }

    /// The sorted domain of a discrete attribute (empty for continuous ones).
    pub fn domain(&self) -> impl Iterator<Item = &str> {
        let values = match self {
            Attribute::Discrete { values, .. } => Some(values),
            Attribute::Continuous { .. } => None,
        };
        values.into_iter().flatten().map(String::as_str)
    }

    /// Number of rows in `members` whose value for this attribute equals `value`.
    pub fn frequency<'a>(
        &self,
        dataset: &Dataset,
        members: impl IntoIterator<Item = &'a usize>,
        value: &str,
    ) -> usize {
        members
            .into_iter()
            .filter(|&&row| {
                matches!(dataset.value(row, self.index()), Value::Text(v) if v == value)
            })
            .count()
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
