use tracing::info;

use crate::error::{ConfigError, UndefinedReference};
use crate::frame::MetricFrame;
use crate::models::Flag;

/// Suffix every rule name carries; dropped in human-readable summaries.
pub const FLAG_SUFFIX: &str = "_flag";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Value(f64),
    Metric(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Condition {
    LessThan(Operand),
    GreaterThan(Operand),
    /// Inclusive lower bound, exclusive upper bound.
    Between { lower: f64, upper: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskRule {
    pub name: &'static str,
    pub metric: &'static str,
    pub condition: Condition,
    pub weight: f64,
}

impl RiskRule {
    pub const fn new(name: &'static str, metric: &'static str, condition: Condition) -> Self {
        Self {
            name,
            metric,
            condition,
            weight: 1.0,
        }
    }

    /// The comparison metric when the rule compares two columns.
    pub fn compared_metric(&self) -> Option<&'static str> {
        match self.condition {
            Condition::LessThan(Operand::Metric(other))
            | Condition::GreaterThan(Operand::Metric(other)) => Some(other),
            _ => None,
        }
    }

    pub fn required_columns(&self) -> Vec<&'static str> {
        std::iter::once(self.metric)
            .chain(self.compared_metric())
            .collect()
    }

    pub fn label(&self) -> &str {
        self.name.strip_suffix(FLAG_SUFFIX).unwrap_or(self.name)
    }

    /// Flags one value. Missing data takes precedence over the comparison.
    pub fn evaluate(&self, value: Option<f64>, compared: Option<f64>) -> Flag {
        let Some(value) = value else {
            return Flag::MissingData;
        };
        let triggered = match self.condition {
            Condition::LessThan(operand) => match resolve(operand, compared) {
                Some(threshold) => value < threshold,
                None => return Flag::MissingData,
            },
            Condition::GreaterThan(operand) => match resolve(operand, compared) {
                Some(threshold) => value > threshold,
                None => return Flag::MissingData,
            },
            Condition::Between { lower, upper } => lower <= value && value < upper,
        };
        if triggered {
            Flag::Triggered
        } else {
            Flag::Clear
        }
    }

    /// Flags every row of the table.
    pub fn evaluate_frame(&self, frame: &MetricFrame) -> Vec<Flag> {
        (0..frame.len())
            .map(|row| {
                let compared = self
                    .compared_metric()
                    .and_then(|other| frame.value(row, other));
                self.evaluate(frame.value(row, self.metric), compared)
            })
            .collect()
    }
}

fn resolve(operand: Operand, compared: Option<f64>) -> Option<f64> {
    match operand {
        Operand::Value(threshold) => Some(threshold),
        Operand::Metric(_) => compared,
    }
}

#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<RiskRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<RiskRule>) -> Self {
        Self { rules }
    }

    pub fn standard() -> Self {
        use Condition::{Between, GreaterThan, LessThan};
        use Operand::{Metric, Value};

        Self::new(vec![
            RiskRule::new(
                "negative_operating_income_ttm_flag",
                "ttm_operating_income",
                LessThan(Value(0.0)),
            ),
            RiskRule::new(
                "negative_retained_earnings_flag",
                "period_value_cumulative_retained_earnings",
                LessThan(Value(0.0)),
            ),
            RiskRule::new(
                "modified_quick_ratio_less_one_flag",
                "modified_quick_ratio",
                LessThan(Value(1.0)),
            ),
            RiskRule::new(
                "yoy_revenue_decline_flag",
                "yoy_revenue_change",
                LessThan(Value(0.0)),
            ),
            RiskRule::new(
                "ab_debt_exceeds_contributed_capital_flag",
                "period_value_ab_loan_balance",
                GreaterThan(Metric("period_value_contributed_capital")),
            ),
            RiskRule::new(
                "inventory_turnover_below_2_flag",
                "inventory_turns_ttm",
                LessThan(Value(2.0)),
            ),
            RiskRule::new(
                "ab_loc_25_percent_of_revenue_flag",
                "ab_line_of_credit_as_percent_of_ttm_revenue",
                GreaterThan(Value(0.25)),
            ),
            // Revenue is reported in thousands.
            RiskRule::new(
                "revenue_below_10_million_flag",
                "ttm_revenue",
                LessThan(Value(10_000.0)),
            ),
            RiskRule::new(
                "less_than_1_year_of_runway_flag",
                "years_of_runway",
                Between {
                    lower: 0.0,
                    upper: 1.0,
                },
            ),
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = &RiskRule> {
        self.rules.iter()
    }

    /// Indices into the rule set ordered by rule name.
    pub fn sorted_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.rules.len()).collect();
        indices.sort_by_key(|&i| self.rules[i].name);
        indices
    }

    /// Metrics referenced by any rule, deduplicated in rule order.
    pub fn referenced_metrics(&self) -> Vec<&'static str> {
        let mut metrics: Vec<&'static str> = Vec::new();
        for column in self.rules.iter().flat_map(RiskRule::required_columns) {
            if !metrics.contains(&column) {
                metrics.push(column);
            }
        }
        metrics
    }

    /// Pre-flight check that every referenced metric exists before scoring.
    pub fn validate(&self, frame: &MetricFrame) -> Result<(), ConfigError> {
        let undefined: Vec<UndefinedReference> = self
            .rules
            .iter()
            .flat_map(|rule| {
                rule.required_columns()
                    .into_iter()
                    .filter(move |column| !frame.has_column(column))
                    .map(move |column| UndefinedReference {
                        column: column.to_string(),
                        referenced_by: rule.name.to_string(),
                    })
            })
            .collect();

        if !undefined.is_empty() {
            return Err(ConfigError::UndefinedRuleMetrics(undefined));
        }

        info!(rules = self.rules.len(), "all metrics referenced by risk rules are available");
        Ok(())
    }
}
