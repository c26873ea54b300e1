//! Output tables with their column schema, ready for a sink.

use chrono::{DateTime, Utc};

use crate::metrics::MetricRegistry;
use crate::models::CurrentSnapshot;
use crate::risk::ScoredTable;
use crate::rules::RuleSet;

pub const COMPANY_NAME: &str = "company_name";
pub const TIME_PERIOD: &str = "time_period";
pub const RISK_RATING: &str = "risk_rating";
pub const MISSING_DATA_COUNT: &str = "num_flags_with_missing_underlying_data";
pub const MISSING_DATA_NAMES: &str = "risk_flags_with_missing_underlying_data";
pub const FLAGGED_NAMES: &str = "risk_flags_flagged";
pub const FLAGGED_COUNT: &str = "risk_flags_flagged_num";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Timestamp,
    Integer,
    Float,
}

impl ColumnType {
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::String => "TEXT",
            ColumnType::Timestamp => "TIMESTAMPTZ",
            ColumnType::Integer => "BIGINT",
            ColumnType::Float => "DOUBLE PRECISION",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSpec {
    fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Timestamp(DateTime<Utc>),
    Integer(i64),
    Float(Option<f64>),
}

impl Cell {
    /// Text form used by the CSV sink; nulls are empty.
    pub fn render(&self) -> String {
        match self {
            Cell::Text(value) => value.clone(),
            Cell::Timestamp(value) => value.to_rfc3339(),
            Cell::Integer(value) => value.to_string(),
            Cell::Float(Some(value)) => value.to_string(),
            Cell::Float(None) => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputTable {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<Cell>>,
}

/// Metric columns written after the flags: derived metrics, then their
/// inputs, then anything else a rule reads.
pub fn metric_columns(metrics: &MetricRegistry, rules: &RuleSet) -> Vec<&'static str> {
    let mut columns: Vec<&'static str> = metrics.iter().map(|metric| metric.name).collect();
    for column in metrics
        .input_columns()
        .into_iter()
        .chain(rules.referenced_metrics())
    {
        if !columns.contains(&column) {
            columns.push(column);
        }
    }
    columns
}

/// Every scored row, one column per rule flag and metric.
pub fn historical_table(
    name: &str,
    scored: &ScoredTable,
    metrics: &MetricRegistry,
    rules: &RuleSet,
) -> OutputTable {
    let order = rules.sorted_indices();
    let rule_names: Vec<&str> = rules.iter().map(|rule| rule.name).collect();
    let metric_names = metric_columns(metrics, rules);

    let mut columns = vec![
        ColumnSpec::new(COMPANY_NAME, ColumnType::String),
        ColumnSpec::new(TIME_PERIOD, ColumnType::Timestamp),
        ColumnSpec::new(RISK_RATING, ColumnType::Float),
        ColumnSpec::new(MISSING_DATA_COUNT, ColumnType::Integer),
    ];
    columns.extend(order.iter().map(|&i| ColumnSpec::new(rule_names[i], ColumnType::Integer)));
    columns.extend(metric_names.iter().map(|name| ColumnSpec::new(*name, ColumnType::Float)));

    let rows = scored
        .records
        .iter()
        .enumerate()
        .map(|(row, record)| {
            let mut cells = vec![
                Cell::Text(record.key.company_name.clone()),
                Cell::Timestamp(record.key.time_period),
                Cell::Float(Some(record.rating.as_f64())),
                Cell::Integer(record.missing_data_count as i64),
            ];
            cells.extend(order.iter().map(|&i| Cell::Integer(record.flags[i].as_i64())));
            cells.extend(
                metric_names
                    .iter()
                    .map(|name| Cell::Float(scored.frame.value(row, name))),
            );
            cells
        })
        .collect();

    OutputTable {
        name: name.to_string(),
        columns,
        rows,
    }
}

/// Latest row per company, with readable flag summaries ahead of the flags.
pub fn current_table(
    name: &str,
    scored: &ScoredTable,
    snapshot: &[CurrentSnapshot],
    metrics: &MetricRegistry,
    rules: &RuleSet,
) -> OutputTable {
    let order = rules.sorted_indices();
    let rule_names: Vec<&str> = rules.iter().map(|rule| rule.name).collect();
    let metric_names = metric_columns(metrics, rules);

    let mut columns = vec![
        ColumnSpec::new(COMPANY_NAME, ColumnType::String),
        ColumnSpec::new(TIME_PERIOD, ColumnType::Timestamp),
        ColumnSpec::new(RISK_RATING, ColumnType::Float),
        ColumnSpec::new(MISSING_DATA_COUNT, ColumnType::Integer),
        ColumnSpec::new(MISSING_DATA_NAMES, ColumnType::String),
        ColumnSpec::new(FLAGGED_NAMES, ColumnType::String),
        ColumnSpec::new(FLAGGED_COUNT, ColumnType::Integer),
    ];
    columns.extend(order.iter().map(|&i| ColumnSpec::new(rule_names[i], ColumnType::Integer)));
    columns.extend(metric_names.iter().map(|name| ColumnSpec::new(*name, ColumnType::Float)));

    let rows = snapshot
        .iter()
        .map(|current| {
            let record = &scored.records[current.row];
            let mut cells = vec![
                Cell::Text(record.key.company_name.clone()),
                Cell::Timestamp(record.key.time_period),
                Cell::Float(Some(record.rating.as_f64())),
                Cell::Integer(record.missing_data_count as i64),
                Cell::Text(current.missing.clone()),
                Cell::Text(current.flagged.clone()),
                Cell::Integer(current.flagged_count as i64),
            ];
            cells.extend(order.iter().map(|&i| Cell::Integer(record.flags[i].as_i64())));
            cells.extend(
                metric_names
                    .iter()
                    .map(|name| Cell::Float(scored.frame.value(current.row, name))),
            );
            cells
        })
        .collect();

    OutputTable {
        name: name.to_string(),
        columns,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_columns_follow_registry_order_without_duplicates() {
        let columns = metric_columns(&MetricRegistry::standard(), &RuleSet::standard());

        assert_eq!(columns[0], "ttm_revenue");
        assert_eq!(columns[8], "modified_quick_ratio");
        assert_eq!(columns[9], "ttm_avg_revenue");
        assert!(columns.contains(&"period_value_cumulative_retained_earnings"));
        assert!(columns.contains(&"period_value_contributed_capital"));
        let mut unique = columns.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), columns.len());
    }

    #[test]
    fn cells_render_nulls_as_empty() {
        assert_eq!(Cell::Float(None).render(), "");
        assert_eq!(Cell::Float(Some(2.5)).render(), "2.5");
        assert_eq!(Cell::Integer(-1).render(), "-1");
        assert_eq!(Cell::Text("Acme".to_string()).render(), "Acme");
    }
}
