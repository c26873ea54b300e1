use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{CurrentSnapshot, Flag, Rating, ScoredRecord};
use crate::pipeline::PipelineOutput;
use crate::rules::RuleSet;

#[derive(Debug, Clone, PartialEq)]
pub struct FlagFrequency {
    pub label: String,
    pub triggered: usize,
    pub missing: usize,
}

/// Counts per rule across the current snapshot, most triggered first.
pub fn summarize_flags(output: &PipelineOutput, rules: &RuleSet) -> Vec<FlagFrequency> {
    let mut summaries: Vec<FlagFrequency> = rules
        .iter()
        .enumerate()
        .map(|(index, rule)| {
            let flags = output
                .snapshot
                .iter()
                .map(|current| output.scored.records[current.row].flags[index]);
            let (triggered, missing) = flags.fold((0, 0), |(t, m), flag| match flag {
                Flag::Triggered => (t + 1, m),
                Flag::MissingData => (t, m + 1),
                Flag::Clear => (t, m),
            });
            FlagFrequency {
                label: rule.label().to_string(),
                triggered,
                missing,
            }
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.triggered
            .cmp(&a.triggered)
            .then_with(|| a.label.cmp(&b.label))
    });
    summaries
}

/// Rated companies in the snapshot, highest rating first and ties by name.
/// Unratable companies are left out.
pub fn rank_by_rating(output: &PipelineOutput) -> Vec<(f64, &ScoredRecord, &CurrentSnapshot)> {
    let mut ranked: Vec<_> = output
        .snapshot
        .iter()
        .filter_map(|current| {
            let record = &output.scored.records[current.row];
            match record.rating {
                Rating::Score(score) => Some((score, record, current)),
                Rating::Unratable => None,
            }
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then_with(|| a.1.key.company_name.cmp(&b.1.key.company_name))
    });
    ranked
}

pub fn build_report(
    output: &PipelineOutput,
    rules: &RuleSet,
    generated_at: DateTime<Utc>,
) -> String {
    let ranked = rank_by_rating(output);

    let mut report = String::new();
    let _ = writeln!(report, "# Risk Rating Report");
    let _ = writeln!(
        report,
        "Generated {} across {} companies",
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        output.snapshot.len()
    );
    let _ = writeln!(report);
    let _ = writeln!(report, "## Highest Risk Companies");

    if ranked.is_empty() {
        let _ = writeln!(report, "No rated companies.");
    } else {
        for (score, record, current) in ranked.iter().take(10) {
            let _ = writeln!(
                report,
                "- {} ({}) rating {:.1}: {}",
                record.key.company_name,
                record.key.time_period.format("%Y-%m-%d"),
                score,
                current.flagged
            );
        }
    }

    let _ = writeln!(report);
    let _ = writeln!(report, "## Flag Frequency");
    if output.snapshot.is_empty() {
        let _ = writeln!(report, "No companies in the current snapshot.");
    } else {
        for summary in summarize_flags(output, rules) {
            let _ = writeln!(
                report,
                "- {}: {} flagged, {} missing data",
                summary.label, summary.triggered, summary.missing
            );
        }
    }

    let unratable: Vec<&str> = output
        .snapshot
        .iter()
        .map(|current| &output.scored.records[current.row])
        .filter(|record| record.rating == Rating::Unratable)
        .map(|record| record.key.company_name.as_str())
        .collect();

    let _ = writeln!(report);
    let _ = writeln!(report, "## Unratable Companies");
    if unratable.is_empty() {
        let _ = writeln!(report, "Every company has data for at least one rule.");
    } else {
        for company in unratable {
            let _ = writeln!(report, "- {company}");
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricRegistry;
    use crate::models::RawObservation;
    use crate::pipeline::Pipeline;
    use chrono::TimeZone;

    fn output(observations: &[RawObservation]) -> PipelineOutput {
        Pipeline {
            metrics: MetricRegistry::standard(),
            rules: RuleSet::standard(),
            historical_table: "historical".to_string(),
            current_table: "current".to_string(),
        }
        .compute(observations)
        .unwrap()
    }

    fn observations(company: &str, operating_income: Option<f64>) -> Vec<RawObservation> {
        [
            "Revenue",
            "Operating Income",
            "Costs of Goods Sold",
            "Inventory",
            "Cash",
            "Accounts Receivable",
            "Accounts Payable",
            "Credit Cards",
            "Cumulative Retained Earnings",
            "AB Loan Balance",
            "Contributed Capital",
        ]
        .iter()
        .map(|metric| {
            let value = if *metric == "Operating Income" {
                operating_income
            } else {
                Some(100.0)
            };
            RawObservation {
                company_name: company.to_string(),
                time_period: Utc.with_ymd_and_hms(2025, 6, 30, 0, 0, 0).unwrap(),
                metric_name: metric.to_string(),
                period_value: value,
                ttm_avg: value,
                pttm_avg: value,
            }
        })
        .collect()
    }

    #[test]
    fn report_ranks_companies_and_counts_flags() {
        let mut rows = observations("Calm Co", Some(40.0));
        rows.extend(observations("Burning Co", Some(-40.0)));

        let output = output(&rows);
        let report = build_report(
            &output,
            &RuleSet::standard(),
            Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap(),
        );

        assert!(report.starts_with(
            "# Risk Rating Report\nGenerated 2025-07-01 09:00 UTC across 2 companies"
        ));
        let burning = report.find("- Burning Co").unwrap();
        let calm = report.find("- Calm Co").unwrap();
        assert!(burning < calm);
        assert!(report.contains("- negative_operating_income_ttm: 1 flagged, 0 missing data"));
        assert!(report.contains("Every company has data for at least one rule."));
    }

    #[test]
    fn frequencies_sort_by_triggered_count() {
        let mut rows = observations("A", Some(-1.0));
        rows.extend(observations("B", Some(-2.0)));

        let output = output(&rows);
        let frequencies = summarize_flags(&output, &RuleSet::standard());

        assert_eq!(frequencies[0].triggered, 2);
        assert!(frequencies
            .windows(2)
            .all(|pair| pair[0].triggered >= pair[1].triggered));
    }

    #[test]
    fn equal_ratings_rank_by_company_name() {
        let mut rows = observations("Zephyr", Some(-5.0));
        rows.extend(observations("Aster", Some(-5.0)));
        rows.extend(observations("Mid", Some(5.0)));

        let output = output(&rows);
        let names: Vec<&str> = rank_by_rating(&output)
            .iter()
            .map(|(_, record, _)| record.key.company_name.as_str())
            .collect();

        assert_eq!(names, ["Aster", "Zephyr", "Mid"]);
    }

    #[test]
    fn empty_snapshot_reports_placeholders() {
        let report = build_report(
            &output(&[]),
            &RuleSet::standard(),
            Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap(),
        );

        assert!(report.contains("No rated companies."));
        assert!(report.contains("No companies in the current snapshot."));
    }
}
