use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

/// One long-format row as stored in the warehouse source table.
#[derive(Debug, Clone, PartialEq, Deserialize, sqlx::FromRow)]
pub struct RawObservation {
    pub company_name: String,
    #[serde(deserialize_with = "deserialize_period")]
    pub time_period: DateTime<Utc>,
    pub metric_name: String,
    pub period_value: Option<f64>,
    pub ttm_avg: Option<f64>,
    pub pttm_avg: Option<f64>,
}

impl RawObservation {
    pub fn value(&self, kind: ValueKind) -> Option<f64> {
        match kind {
            ValueKind::PeriodValue => self.period_value,
            ValueKind::TtmAvg => self.ttm_avg,
            ValueKind::PttmAvg => self.pttm_avg,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    PeriodValue,
    TtmAvg,
    PttmAvg,
}

impl ValueKind {
    pub const ALL: [ValueKind; 3] = [ValueKind::PeriodValue, ValueKind::TtmAvg, ValueKind::PttmAvg];

    pub fn prefix(self) -> &'static str {
        match self {
            ValueKind::PeriodValue => "period_value",
            ValueKind::TtmAvg => "ttm_avg",
            ValueKind::PttmAvg => "pttm_avg",
        }
    }

    /// Builds the wide column key, e.g. `ttm_avg` + `Operating Income` -> `ttm_avg_operating_income`.
    pub fn column_key(self, metric_name: &str) -> String {
        format!("{}_{}", self.prefix(), normalize_metric_name(metric_name))
    }
}

pub fn normalize_metric_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect::<String>()
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub company_name: String,
    pub time_period: DateTime<Utc>,
}

/// Outcome of one rule for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    MissingData,
    Clear,
    Triggered,
}

impl Flag {
    pub fn as_i64(self) -> i64 {
        match self {
            Flag::MissingData => -1,
            Flag::Clear => 0,
            Flag::Triggered => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rating {
    /// Every rule lacked data.
    Unratable,
    Score(f64),
}

impl Rating {
    pub fn as_f64(self) -> f64 {
        match self {
            Rating::Unratable => -1.0,
            Rating::Score(score) => score,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub key: RecordKey,
    /// One flag per rule, in rule-set order.
    pub flags: Vec<Flag>,
    pub missing_data_count: usize,
    pub rating: Rating,
}

/// Most recent scored row for one company.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentSnapshot {
    /// Index of the chosen row in the scored table.
    pub row: usize,
    pub flagged: String,
    pub flagged_count: usize,
    pub missing: String,
}

pub(crate) fn deserialize_period<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_period(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!("unrecognised time_period '{raw}'"))
    })
}

pub fn parse_period(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(value) = DateTime::parse_from_rfc3339(raw) {
        return Some(value.with_timezone(&Utc));
    }
    if let Ok(value) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(value.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|value| value.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn column_keys_are_case_and_space_normalised() {
        assert_eq!(
            ValueKind::TtmAvg.column_key("Operating Income"),
            "ttm_avg_operating_income"
        );
        assert_eq!(
            ValueKind::PeriodValue.column_key("  AB Loan Balance "),
            "period_value_ab_loan_balance"
        );
        assert_eq!(ValueKind::PttmAvg.column_key("revenue"), "pttm_avg_revenue");
    }

    #[test]
    fn periods_parse_from_common_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 31, 0, 0, 0).unwrap();
        assert_eq!(parse_period("2025-03-31"), Some(expected));
        assert_eq!(parse_period("2025-03-31 00:00:00"), Some(expected));
        assert_eq!(parse_period("2025-03-31T00:00:00Z"), Some(expected));
        assert_eq!(parse_period("March 2025"), None);
    }

    #[test]
    fn sentinels_render_as_negative_one() {
        assert_eq!(Flag::MissingData.as_i64(), -1);
        assert_eq!(Flag::Triggered.as_i64(), 1);
        assert_eq!(Rating::Unratable.as_f64(), -1.0);
        assert_eq!(Rating::Score(3.3).as_f64(), 3.3);
    }
}
