use std::collections::HashMap;

use crate::models::RecordKey;

pub type Column = Vec<Option<f64>>;

/// Wide table with one row per (company, period) and named nullable float columns.
#[derive(Debug, Clone, Default)]
pub struct MetricFrame {
    keys: Vec<RecordKey>,
    names: Vec<String>,
    columns: HashMap<String, Column>,
}

impl MetricFrame {
    pub fn new(keys: Vec<RecordKey>) -> Self {
        Self {
            keys,
            names: Vec::new(),
            columns: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[RecordKey] {
        &self.keys
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn value(&self, row: usize, name: &str) -> Option<f64> {
        self.columns
            .get(name)
            .and_then(|column| column.get(row).copied().flatten())
    }

    /// Adds a column, or replaces it in place when the name already exists.
    pub fn insert_column(&mut self, name: impl Into<String>, values: Column) {
        let name = name.into();
        debug_assert_eq!(values.len(), self.keys.len(), "column {name} has wrong length");
        if !self.columns.contains_key(&name) {
            self.names.push(name.clone());
        }
        self.columns.insert(name, values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn key(company: &str) -> RecordKey {
        RecordKey {
            company_name: company.to_string(),
            time_period: Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn replacing_a_column_keeps_its_position() {
        let mut frame = MetricFrame::new(vec![key("A"), key("B")]);
        frame.insert_column("cash", vec![Some(1.0), None]);
        frame.insert_column("debt", vec![Some(2.0), Some(3.0)]);
        frame.insert_column("cash", vec![Some(5.0), Some(6.0)]);

        assert_eq!(frame.column_names(), &["cash".to_string(), "debt".to_string()]);
        assert_eq!(frame.value(0, "cash"), Some(5.0));
        assert_eq!(frame.value(1, "debt"), Some(3.0));
        assert_eq!(frame.value(1, "missing"), None);
    }
}
