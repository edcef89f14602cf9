use std::collections::BTreeSet;
use std::fmt;

use crate::dataset::{Dataset, Value};
use crate::item::Item;

/// Ordered vector of items: one dataset row, or one centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    items: Vec<Item>,
}

impl Tuple {
    pub fn new(items: Vec<Item>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> &Item {
        &self.items[index]
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// The raw values, in attribute order.
    pub fn values(&self) -> Vec<Value> {
        self.items.iter().map(|item| item.value().clone()).collect()
    }

    /// Sum of the per-position item distances.
    pub fn distance(&self, other: &Tuple) -> f64 {
        self.items
            .iter()
            .zip(&other.items)
            .map(|(a, b)| a.distance(b.value()))
            .sum()
    }

    /// Mean distance from this tuple to the member rows of `dataset`.
    ///
    /// NaN for an empty member set.
    pub fn avg_distance(&self, dataset: &Dataset, members: &BTreeSet<usize>) -> f64 {
        let total: f64 = members
            .iter()
            .map(|&row| self.distance(&dataset.item_set(row)))
            .sum();
        total / members.len() as f64
    }

    /// Recompute every item as the prototype of `members`.
    pub(crate) fn update(&mut self, dataset: &Dataset, members: &BTreeSet<usize>) {
        for item in &mut self.items {
            item.update(dataset, members);
        }
    }

    /// Space-separated values, each followed by a space: `v1 v2 ... vn `.
    pub fn summary(&self) -> String {
        self.items.iter().map(|item| format!("{} ", item)).collect()
    }
}

impl FromIterator<Item> for Tuple {
    fn from_iter<I: IntoIterator<Item = Item>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Comma-separated values: `v1, v2, ..., vn`.
impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", item)?;
        }
        Ok(())
    }
}
