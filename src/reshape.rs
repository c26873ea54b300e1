use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::frame::MetricFrame;
use crate::models::{RawObservation, RecordKey, ValueKind};

/// Pivots long observations into one row per (company, period).
///
/// Duplicate observations for the same cell collapse to their maximum, and
/// zero values in every value-kind column become null afterwards. NaN is
/// treated as null. Rows come out ordered by company then period.
pub fn pivot_observations(observations: &[RawObservation]) -> MetricFrame {
    if observations.is_empty() {
        warn!("no observations to pivot, continuing with an empty table");
        return MetricFrame::default();
    }

    let mut cells: BTreeMap<RecordKey, BTreeMap<String, f64>> = BTreeMap::new();
    let mut column_names: BTreeSet<String> = BTreeSet::new();

    for observation in observations {
        let key = RecordKey {
            company_name: observation.company_name.clone(),
            time_period: observation.time_period,
        };
        let row = cells.entry(key).or_default();

        for kind in ValueKind::ALL {
            let column = kind.column_key(&observation.metric_name);
            column_names.insert(column.clone());
            if let Some(value) = observation.value(kind).filter(|value| !value.is_nan()) {
                row.entry(column)
                    .and_modify(|current| *current = current.max(value))
                    .or_insert(value);
            }
        }
    }

    let keys: Vec<RecordKey> = cells.keys().cloned().collect();
    let mut frame = MetricFrame::new(keys);

    for name in &column_names {
        let values = cells
            .values()
            .map(|row| row.get(name).copied().filter(|value| *value != 0.0))
            .collect();
        frame.insert_column(name.clone(), values);
    }

    debug!(columns = ?frame.column_names(), "pivoted columns");
    info!(
        observations = observations.len(),
        rows = frame.len(),
        columns = column_names.len(),
        "pivoted observations"
    );

    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashSet;

    fn period(month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, month, 1, 0, 0, 0).unwrap()
    }

    fn observation(
        company: &str,
        month: u32,
        metric: &str,
        values: (Option<f64>, Option<f64>, Option<f64>),
    ) -> RawObservation {
        RawObservation {
            company_name: company.to_string(),
            time_period: period(month),
            metric_name: metric.to_string(),
            period_value: values.0,
            ttm_avg: values.1,
            pttm_avg: values.2,
        }
    }

    /// Turns the wide table back into (company, period, column, value) cells.
    fn flatten(frame: &MetricFrame) -> HashSet<(String, DateTime<Utc>, String, Option<u64>)> {
        let mut cells = HashSet::new();
        for (row, key) in frame.keys().iter().enumerate() {
            for name in frame.column_names() {
                cells.insert((
                    key.company_name.clone(),
                    key.time_period,
                    name.clone(),
                    frame.value(row, name).map(f64::to_bits),
                ));
            }
        }
        cells
    }

    #[test]
    fn empty_input_yields_empty_table() {
        let frame = pivot_observations(&[]);
        assert!(frame.is_empty());
        assert!(frame.column_names().is_empty());
    }

    #[test]
    fn groups_by_company_and_period() {
        let observations = vec![
            observation("A", 2, "Cash", (Some(10.0), None, None)),
            observation("A", 1, "Cash", (Some(5.0), None, None)),
            observation("B", 1, "Revenue", (None, Some(100.0), Some(80.0))),
        ];

        let frame = pivot_observations(&observations);

        assert_eq!(frame.len(), 3);
        assert_eq!(frame.keys()[0].company_name, "A");
        assert_eq!(frame.keys()[0].time_period, period(1));
        assert_eq!(frame.keys()[1].time_period, period(2));
        assert_eq!(frame.value(0, "period_value_cash"), Some(5.0));
        assert_eq!(frame.value(1, "period_value_cash"), Some(10.0));
        assert_eq!(frame.value(2, "ttm_avg_revenue"), Some(100.0));
        assert_eq!(frame.value(2, "pttm_avg_revenue"), Some(80.0));
        assert_eq!(frame.value(2, "period_value_cash"), None);
    }

    #[test]
    fn duplicates_collapse_to_the_maximum() {
        let observations = vec![
            observation("A", 1, "Cash", (Some(7.0), None, None)),
            observation("A", 1, "cash", (Some(3.0), None, None)),
            observation("A", 1, " CASH", (Some(9.0), None, None)),
            observation("A", 1, "Cash", (None, None, None)),
        ];

        let frame = pivot_observations(&observations);

        assert_eq!(frame.len(), 1);
        assert_eq!(frame.value(0, "period_value_cash"), Some(9.0));
    }

    #[test]
    fn metric_names_normalise_to_one_column() {
        let observations = vec![
            observation("A", 1, "Operating Income", (Some(1.0), None, None)),
            observation("B", 1, "operating income", (Some(2.0), None, None)),
        ];

        let frame = pivot_observations(&observations);

        assert!(frame.has_column("period_value_operating_income"));
        assert_eq!(
            frame
                .column_names()
                .iter()
                .filter(|name| name.starts_with("period_value_"))
                .count(),
            1
        );
    }

    #[test]
    fn zero_values_become_null() {
        let observations = vec![observation("A", 1, "Cash", (Some(0.0), Some(0.0), Some(4.0)))];

        let frame = pivot_observations(&observations);

        assert_eq!(frame.value(0, "period_value_cash"), None);
        assert_eq!(frame.value(0, "ttm_avg_cash"), None);
        assert_eq!(frame.value(0, "pttm_avg_cash"), Some(4.0));
    }

    #[test]
    fn nan_values_become_null() {
        let observations = vec![
            observation("A", 1, "Cash", (Some(f64::NAN), Some(5.0), None)),
            observation("A", 1, "cash", (Some(3.0), Some(f64::NAN), None)),
            observation("A", 1, "Revenue", (Some(f64::NAN), None, None)),
        ];

        let frame = pivot_observations(&observations);

        assert_eq!(frame.value(0, "period_value_cash"), Some(3.0));
        assert_eq!(frame.value(0, "ttm_avg_cash"), Some(5.0));
        assert_eq!(frame.value(0, "period_value_revenue"), None);
    }

    #[test]
    fn flattening_recovers_every_cell_except_zeros() {
        let observations = vec![
            observation("A", 1, "Cash", (Some(12.5), Some(0.0), None)),
            observation("A", 2, "Revenue", (Some(-3.0), Some(40.0), Some(0.0))),
            observation("B", 1, "Cash", (None, Some(8.0), Some(6.0))),
        ];

        let frame = pivot_observations(&observations);
        let cells = flatten(&frame);

        for observation in &observations {
            for kind in ValueKind::ALL {
                let expected = observation.value(kind).filter(|value| *value != 0.0);
                assert!(cells.contains(&(
                    observation.company_name.clone(),
                    observation.time_period,
                    kind.column_key(&observation.metric_name),
                    expected.map(f64::to_bits),
                )));
            }
        }
    }
}
