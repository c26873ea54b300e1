use std::collections::BTreeMap;

use tracing::info;

use crate::models::{CurrentSnapshot, Flag};
use crate::risk::ScoredTable;
use crate::rules::RuleSet;

pub const NO_FLAGS: &str = "no flags";
pub const NO_MISSING_DATA: &str = "no missing data";

/// Picks the latest period per company and summarises its flags.
///
/// When a company has several rows for the same latest period, the last one
/// in table order wins. Output is ordered by company name.
pub fn build_current_snapshot(scored: &ScoredTable, rules: &RuleSet) -> Vec<CurrentSnapshot> {
    let mut latest: BTreeMap<&str, usize> = BTreeMap::new();

    for (row, record) in scored.records.iter().enumerate() {
        let company = record.key.company_name.as_str();
        let newer_or_tied = latest.get(company).map_or(true, |&current| {
            scored.records[current].key.time_period <= record.key.time_period
        });
        if newer_or_tied {
            latest.insert(company, row);
        }
    }

    let order = rules.sorted_indices();
    let labels: Vec<&str> = rules.iter().map(|rule| rule.label()).collect();

    let snapshot: Vec<CurrentSnapshot> = latest
        .into_values()
        .map(|row| {
            let flags = &scored.records[row].flags;
            let with_flag = |wanted: Flag| -> Vec<String> {
                order
                    .iter()
                    .filter(|&&i| flags[i] == wanted)
                    .map(|&i| format!("'{}'", labels[i]))
                    .collect()
            };
            let flagged = with_flag(Flag::Triggered);
            let missing = with_flag(Flag::MissingData);

            CurrentSnapshot {
                row,
                flagged_count: flagged.len(),
                flagged: join_or(flagged, NO_FLAGS),
                missing: join_or(missing, NO_MISSING_DATA),
            }
        })
        .collect();

    info!(companies = snapshot.len(), "current snapshot built");
    snapshot
}

fn join_or(names: Vec<String>, empty: &str) -> String {
    if names.is_empty() {
        empty.to_string()
    } else {
        names.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MetricFrame;
    use crate::models::{Rating, RecordKey, ScoredRecord};
    use crate::rules::{Condition, Operand, RiskRule};
    use chrono::{TimeZone, Utc};

    fn rules() -> RuleSet {
        RuleSet::new(vec![
            RiskRule::new("zeta_flag", "z", Condition::LessThan(Operand::Value(0.0))),
            RiskRule::new("alpha_flag", "a", Condition::LessThan(Operand::Value(0.0))),
            RiskRule::new("mid_flag", "m", Condition::LessThan(Operand::Value(0.0))),
        ])
    }

    fn record(company: &str, month: u32, flags: [Flag; 3]) -> ScoredRecord {
        ScoredRecord {
            key: RecordKey {
                company_name: company.to_string(),
                time_period: Utc.with_ymd_and_hms(2025, month, 1, 0, 0, 0).unwrap(),
            },
            flags: flags.to_vec(),
            missing_data_count: flags.iter().filter(|f| **f == Flag::MissingData).count(),
            rating: Rating::Score(0.0),
        }
    }

    fn table(records: Vec<ScoredRecord>) -> ScoredTable {
        let keys = records.iter().map(|r| r.key.clone()).collect();
        ScoredTable {
            frame: MetricFrame::new(keys),
            records,
        }
    }

    #[test]
    fn keeps_only_the_latest_period() {
        let scored = table(vec![
            record("C", 2, [Flag::Clear; 3]),
            record("C", 5, [Flag::Clear; 3]),
            record("C", 3, [Flag::Clear; 3]),
            record("A", 1, [Flag::Clear; 3]),
        ]);

        let snapshot = build_current_snapshot(&scored, &rules());

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].row, 3);
        assert_eq!(snapshot[1].row, 1);
    }

    #[test]
    fn ties_resolve_to_the_last_row() {
        let scored = table(vec![
            record("C", 4, [Flag::Clear; 3]),
            record("C", 4, [Flag::Triggered; 3]),
        ]);

        let snapshot = build_current_snapshot(&scored, &rules());

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].row, 1);
    }

    #[test]
    fn summarises_flags_in_name_order() {
        let scored = table(vec![record(
            "A",
            1,
            [Flag::Triggered, Flag::Triggered, Flag::MissingData],
        )]);

        let snapshot = build_current_snapshot(&scored, &rules());

        assert_eq!(snapshot[0].flagged, "'alpha', 'zeta'");
        assert_eq!(snapshot[0].flagged_count, 2);
        assert_eq!(snapshot[0].missing, "'mid'");
    }

    #[test]
    fn empty_summaries_use_placeholders() {
        let scored = table(vec![record("A", 1, [Flag::Clear; 3])]);

        let snapshot = build_current_snapshot(&scored, &rules());

        assert_eq!(snapshot[0].flagged, NO_FLAGS);
        assert_eq!(snapshot[0].flagged_count, 0);
        assert_eq!(snapshot[0].missing, NO_MISSING_DATA);
    }
}
