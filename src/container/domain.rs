//! Column domains gathered while rows are added.

use std::cmp::Ordering;

use crate::cell::DataCell;
use crate::schema::{ColumnDomain, DomainValue, TableSchema};

/// Per-column domain statistics gathered while rows are added.
///
/// Numeric columns track lower and upper bounds. String and boolean columns
/// track distinct values until `max_possible_values` is exceeded, after
/// which the column is given up on for the rest of the table.
#[derive(Debug)]
pub(crate) struct DomainCreator {
    columns: Vec<ColumnTracker>,
    max_possible_values: usize,
}

#[derive(Debug, Default)]
struct ColumnTracker {
    bounds: bool,
    lower: Option<DomainValue>,
    upper: Option<DomainValue>,
    values: Option<Vec<DomainValue>>,
}

impl DomainCreator {
    pub(crate) fn new(schema: &TableSchema, max_possible_values: usize) -> Self {
        let columns = schema
            .columns()
            .iter()
            .map(|c| ColumnTracker {
                bounds: c.tracks_bounds(),
                values: c.tracks_values().then(Vec::new),
                ..Default::default()
            })
            .collect();
        Self { columns, max_possible_values }
    }

    pub(crate) fn update(&mut self, cells: &[DataCell]) {
        for (tracker, cell) in self.columns.iter_mut().zip(cells) {
            if cell.is_missing() {
                continue;
            }
            let value = match DomainValue::from_cell(cell) {
                Some(value) => value,
                None => continue,
            };
            if tracker.bounds {
                tracker.widen(value);
            } else if let Some(values) = tracker.values.as_mut() {
                if !values.contains(&value) {
                    if values.len() >= self.max_possible_values {
                        tracker.values = None;
                    } else {
                        values.push(value);
                    }
                }
            }
        }
    }

    pub(crate) fn finish(self) -> Vec<ColumnDomain> {
        self.columns
            .into_iter()
            .map(|t| ColumnDomain { lower: t.lower, upper: t.upper, possible_values: t.values })
            .collect()
    }
}

impl ColumnTracker {
    fn widen(&mut self, value: DomainValue) {
        if self.lower.as_ref().map_or(true, |l| value.compare(l) == Some(Ordering::Less)) {
            self.lower = Some(value.clone());
        }
        if self.upper.as_ref().map_or(true, |u| value.compare(u) == Some(Ordering::Greater)) {
            self.upper = Some(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;

    fn schema() -> TableSchema {
        TableSchema::from_pairs(&[("n", DataType::Double), ("s", DataType::String), ("b", DataType::Boolean)])
            .unwrap()
    }

    #[test]
    fn test_bounds_and_values() {
        let mut creator = DomainCreator::new(&schema(), 10);
        creator.update(&[DataCell::Double(2.5), DataCell::string("x"), DataCell::Boolean(true)]);
        creator.update(&[DataCell::Int(-1), DataCell::string("y"), DataCell::Missing]);
        creator.update(&[DataCell::Double(f64::NAN), DataCell::string("x"), DataCell::Boolean(false)]);
        creator.update(&[DataCell::Missing, DataCell::Missing, DataCell::Boolean(true)]);

        let domains = creator.finish();
        assert_eq!(domains[0].lower, Some(DomainValue::Int(-1)));
        assert_eq!(domains[0].upper, Some(DomainValue::Double(2.5)));
        assert_eq!(domains[0].possible_values, None);
        assert_eq!(
            domains[1].possible_values,
            Some(vec![DomainValue::String("x".into()), DomainValue::String("y".into())])
        );
        assert_eq!(
            domains[2].possible_values,
            Some(vec![DomainValue::Boolean(true), DomainValue::Boolean(false)])
        );
        assert_eq!(domains[1].lower, None);
    }

    #[test]
    fn test_values_abandoned_over_cap() {
        let mut creator = DomainCreator::new(&schema(), 3);
        for i in 0..4 {
            creator.update(&[DataCell::Missing, DataCell::string(format!("v{}", i)), DataCell::Missing]);
        }
        // never comes back once abandoned
        creator.update(&[DataCell::Missing, DataCell::string("v0"), DataCell::Missing]);
        assert_eq!(creator.finish()[1].possible_values, None);
    }
}
