use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::attribute::Attribute;
use crate::dataset::{Dataset, Value};

/// One cell value bound to its attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    attribute: Arc<Attribute>,
    value: Value,
}

impl Item {
    pub fn new(attribute: Arc<Attribute>, value: impl Into<Value>) -> Self {
        Self {
            attribute,
            value: value.into(),
        }
    }

    pub fn attribute(&self) -> &Attribute {
        &self.attribute
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Distance between this item's value and `other`, in `[0, 1]`.
    ///
    /// Continuous: absolute difference of the min-max scaled values, 0 when
    /// scaling is undefined. Discrete: 0 on equality, 1 otherwise. A value of
    /// the wrong kind for the attribute is at distance 1.
    pub fn distance(&self, other: &Value) -> f64 {
        match (&*self.attribute, &self.value, other) {
            (attribute @ Attribute::Continuous { .. }, Value::Number(a), Value::Number(b)) => {
                let d = (attribute.scaled(*a) - attribute.scaled(*b)).abs();
                if d.is_nan() {
                    0.0
                } else {
                    d
                }
            }
            (Attribute::Discrete { .. }, Value::Text(a), Value::Text(b)) => {
                if a == b {
                    0.0
                } else {
                    1.0
                }
            }
            _ => 1.0,
        }
    }

    /// Replace the value by the prototype of `members`; an empty member set
    /// leaves the value untouched.
    pub fn update(&mut self, dataset: &Dataset, members: &BTreeSet<usize>) {
        if let Some(prototype) = dataset.compute_prototype(members, &self.attribute) {
            self.value = prototype;
        }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit() -> Arc<Attribute> {
        Arc::new(Attribute::continuous("test", 0, 0.0, 1.0))
    }

    #[test]
    fn test_continuous_distance_on_unit_range() {
        let item = Item::new(unit(), 0.5);
        assert_relative_eq!(item.distance(&Value::from(0.5)), 0.0);
        assert_relative_eq!(item.distance(&Value::from(0.25)), 0.25);
        assert_relative_eq!(item.distance(&Value::from(1.0)), 0.5);
    }

    #[test]
    fn test_continuous_distance_is_scaled() {
        let attribute = Arc::new(Attribute::continuous("temperature", 0, 60.0, 80.0));
        let item = Item::new(attribute, 65.0);
        assert_relative_eq!(item.distance(&Value::from(75.0)), 0.5);
    }

    #[test]
    fn test_degenerate_range_distance_is_zero() {
        let attribute = Arc::new(Attribute::continuous("constant", 0, 3.0, 3.0));
        let item = Item::new(attribute, 3.0);
        assert_eq!(item.distance(&Value::from(3.0)), 0.0);
        assert_eq!(item.distance(&Value::from(f64::NAN)), 0.0);
    }

    #[test]
    fn test_discrete_distance() {
        let attribute = Arc::new(Attribute::discrete("test", 0, BTreeSet::new()));
        let item = Item::new(attribute, "equalsString");
        assert_eq!(item.distance(&Value::from("equalsString")), 0.0);
        assert_eq!(item.distance(&Value::from("otherString")), 1.0);
    }

    #[test]
    fn test_mismatched_kind_distance() {
        let item = Item::new(unit(), 0.5);
        assert_eq!(item.distance(&Value::from("0.5")), 1.0);
    }

    #[test]
    fn test_update_keeps_value_for_empty_members() {
        let dataset = Dataset::from_rows(
            vec!["x".into()],
            vec![vec![Value::from(0.0)], vec![Value::from(1.0)]],
        )
        .unwrap();
        let mut item = dataset.item_set(0).get(0).clone();

        item.update(&dataset, &BTreeSet::new());
        assert_eq!(item.value(), &Value::from(0.0));

        item.update(&dataset, &[0, 1].into_iter().collect());
        assert_eq!(item.value(), &Value::from(0.5));
    }

    #[test]
    fn test_display_shows_value() {
        assert_eq!(Item::new(unit(), 1.0).to_string(), "1.0");
    }
}
