use tracing::info;

use crate::error::ConfigError;
use crate::frame::MetricFrame;
use crate::models::{Flag, Rating, ScoredRecord};
use crate::rules::RuleSet;

/// Derived table plus one scored record per row.
#[derive(Debug, Clone)]
pub struct ScoredTable {
    pub frame: MetricFrame,
    pub records: Vec<ScoredRecord>,
}

/// Validates the rule set against the table, then flags and rates every row.
pub fn score_frame(frame: MetricFrame, rules: &RuleSet) -> Result<ScoredTable, ConfigError> {
    rules.validate(&frame)?;

    let per_rule: Vec<Vec<Flag>> = rules.iter().map(|rule| rule.evaluate_frame(&frame)).collect();
    let weights: Vec<f64> = rules.iter().map(|rule| rule.weight).collect();

    let records: Vec<ScoredRecord> = frame
        .keys()
        .iter()
        .enumerate()
        .map(|(row, key)| {
            let flags: Vec<Flag> = per_rule.iter().map(|column| column[row]).collect();
            ScoredRecord {
                key: key.clone(),
                missing_data_count: flags.iter().filter(|f| **f == Flag::MissingData).count(),
                rating: rate(&flags, &weights),
                flags,
            }
        })
        .collect();

    let unratable = records
        .iter()
        .filter(|record| record.rating == Rating::Unratable)
        .count();
    info!(rows = records.len(), unratable, "risk flags and ratings calculated");

    Ok(ScoredTable { frame, records })
}

/// Weighted share of non-missing rules that triggered, on a 0-10 scale.
///
/// Rounded half-to-even to one decimal place. Returns `Unratable` when every
/// rule is missing data.
pub fn rate(flags: &[Flag], weights: &[f64]) -> Rating {
    let (triggered, counted) = flags
        .iter()
        .zip(weights)
        .filter(|(flag, _)| **flag != Flag::MissingData)
        .fold((0.0, 0.0), |(triggered, counted), (flag, weight)| {
            (triggered + flag.as_i64() as f64 * weight, counted + weight)
        });

    if counted == 0.0 {
        return Rating::Unratable;
    }
    Rating::Score(round_one_decimal(triggered / counted * 10.0))
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round_ties_even() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordKey;
    use crate::rules::{Condition, Operand, RiskRule};
    use chrono::{TimeZone, Utc};

    fn uniform(flags: &[Flag]) -> Rating {
        rate(flags, &vec![1.0; flags.len()])
    }

    #[test]
    fn all_missing_is_unratable() {
        let flags = [Flag::MissingData; 9];
        assert_eq!(uniform(&flags), Rating::Unratable);
    }

    #[test]
    fn rating_ignores_missing_rules() {
        let flags = [
            Flag::Triggered,
            Flag::MissingData,
            Flag::Clear,
            Flag::Triggered,
            Flag::MissingData,
        ];
        assert_eq!(uniform(&flags), Rating::Score(6.7));
    }

    #[test]
    fn rating_matches_triggered_share() {
        // (triggered, clear, missing, expected rating)
        let cases = [
            (0, 9, 0, 0.0),
            (1, 8, 0, 1.1),
            (2, 1, 6, 6.7),
            (3, 5, 1, 3.8),
            (5, 3, 0, 6.2),
            (1, 5, 3, 1.7),
            (4, 3, 2, 5.7),
            (5, 4, 0, 5.6),
            (7, 2, 0, 7.8),
            (9, 0, 0, 10.0),
        ];

        for (triggered, clear, missing, expected) in cases {
            let mut flags = vec![Flag::Triggered; triggered];
            flags.extend(std::iter::repeat(Flag::Clear).take(clear));
            flags.extend(std::iter::repeat(Flag::MissingData).take(missing));

            assert_eq!(
                uniform(&flags),
                Rating::Score(expected),
                "{triggered} triggered, {clear} clear, {missing} missing"
            );
        }
    }

    #[test]
    fn rounding_is_half_to_even() {
        // 1 of 8 rules -> 1.25
        let mut flags = vec![Flag::Clear; 8];
        flags[0] = Flag::Triggered;
        assert_eq!(uniform(&flags), Rating::Score(1.2));
    }

    #[test]
    fn weights_shift_the_rating() {
        let flags = [Flag::Triggered, Flag::Clear];
        assert_eq!(rate(&flags, &[3.0, 1.0]), Rating::Score(7.5));
    }

    #[test]
    fn scores_every_row_with_counts() {
        let rules = RuleSet::new(vec![
            RiskRule::new("low_cash_flag", "cash", Condition::LessThan(Operand::Value(10.0))),
            RiskRule::new(
                "debt_over_capital_flag",
                "debt",
                Condition::GreaterThan(Operand::Metric("capital")),
            ),
        ]);
        let keys = ["A", "B", "C"]
            .iter()
            .map(|company| RecordKey {
                company_name: company.to_string(),
                time_period: Utc.with_ymd_and_hms(2025, 6, 30, 0, 0, 0).unwrap(),
            })
            .collect();
        let mut frame = MetricFrame::new(keys);
        frame.insert_column("cash", vec![Some(5.0), Some(50.0), None]);
        frame.insert_column("debt", vec![Some(10.0), Some(1.0), Some(3.0)]);
        frame.insert_column("capital", vec![Some(20.0), None, None]);

        let scored = score_frame(frame, &rules).unwrap();

        let a = &scored.records[0];
        assert_eq!(a.flags, vec![Flag::Triggered, Flag::Clear]);
        assert_eq!(a.missing_data_count, 0);
        assert_eq!(a.rating, Rating::Score(5.0));

        let b = &scored.records[1];
        assert_eq!(b.flags, vec![Flag::Clear, Flag::MissingData]);
        assert_eq!(b.missing_data_count, 1);
        assert_eq!(b.rating, Rating::Score(0.0));

        let c = &scored.records[2];
        assert_eq!(c.flags, vec![Flag::MissingData, Flag::MissingData]);
        assert_eq!(c.missing_data_count, 2);
        assert_eq!(c.rating, Rating::Unratable);
    }

    #[test]
    fn scoring_refuses_undefined_metrics() {
        let rules = RuleSet::new(vec![RiskRule::new(
            "low_cash_flag",
            "cash",
            Condition::LessThan(Operand::Value(10.0)),
        )]);
        let frame = MetricFrame::new(Vec::new());

        assert!(matches!(
            score_frame(frame, &rules),
            Err(ConfigError::UndefinedRuleMetrics(_))
        ));
    }
}
