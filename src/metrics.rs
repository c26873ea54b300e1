//! Derived metric registry.
//!
//! Every metric declares the columns its formula reads. Formulas only read
//! base columns produced by the pivot, never another derived metric, so one
//! pass over the registry is enough.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::error::{ConfigError, UndefinedReference};
use crate::frame::{Column, MetricFrame};

/// Monthly TTM averages are annualised by this factor.
pub const MONTHS_PER_YEAR: f64 = 12.0;

/// Runway value for companies that are not burning cash.
pub const NOT_BURNING: f64 = -1.0;

pub type Formula = fn(&FormulaInputs<'_>) -> Column;

#[derive(Clone, Copy)]
pub struct DerivedMetric {
    pub name: &'static str,
    pub inputs: &'static [&'static str],
    pub formula: Formula,
}

/// Column view handed to a formula, limited to the metric's declared inputs.
pub struct FormulaInputs<'a> {
    columns: HashMap<&'static str, &'a [Option<f64>]>,
    nulls: Column,
}

impl<'a> FormulaInputs<'a> {
    fn new(metric: &DerivedMetric, frame: &'a MetricFrame) -> Self {
        let columns = metric
            .inputs
            .iter()
            .filter_map(|name| frame.column(name).map(|column| (*name, column)))
            .collect();
        Self {
            columns,
            nulls: vec![None; frame.len()],
        }
    }

    pub fn column(&self, name: &str) -> &[Option<f64>] {
        debug_assert!(self.columns.contains_key(name), "undeclared input {name}");
        self.columns.get(name).copied().unwrap_or(self.nulls.as_slice())
    }
}

#[derive(Clone)]
pub struct MetricRegistry {
    metrics: Vec<DerivedMetric>,
}

impl MetricRegistry {
    pub fn new(metrics: Vec<DerivedMetric>) -> Self {
        Self { metrics }
    }

    pub fn standard() -> Self {
        Self::new(vec![
            DerivedMetric {
                name: "ttm_revenue",
                inputs: &["ttm_avg_revenue"],
                formula: |inputs| annualize(inputs.column("ttm_avg_revenue")),
            },
            DerivedMetric {
                name: "ttm_operating_income",
                inputs: &["ttm_avg_operating_income"],
                formula: |inputs| annualize(inputs.column("ttm_avg_operating_income")),
            },
            DerivedMetric {
                name: "ttm_costs_of_goods_sold",
                inputs: &["ttm_avg_costs_of_goods_sold"],
                formula: |inputs| annualize(inputs.column("ttm_avg_costs_of_goods_sold")),
            },
            DerivedMetric {
                name: "pttm_revenue",
                inputs: &["pttm_avg_revenue"],
                formula: |inputs| annualize(inputs.column("pttm_avg_revenue")),
            },
            DerivedMetric {
                name: "yoy_revenue_change",
                inputs: &["ttm_avg_revenue", "pttm_avg_revenue"],
                formula: |inputs| {
                    zip_with(
                        inputs.column("ttm_avg_revenue"),
                        inputs.column("pttm_avg_revenue"),
                        |current, prior| divide(current, prior).map(|ratio| ratio - 1.0),
                    )
                },
            },
            DerivedMetric {
                name: "years_of_runway",
                inputs: &["period_value_cash", "ttm_avg_operating_income"],
                formula: years_of_runway,
            },
            DerivedMetric {
                name: "ab_line_of_credit_as_percent_of_ttm_revenue",
                inputs: &["period_value_ab_loan_balance", "ttm_avg_revenue"],
                formula: |inputs| {
                    zip_with(
                        inputs.column("period_value_ab_loan_balance"),
                        inputs.column("ttm_avg_revenue"),
                        |loan, revenue| divide(loan, revenue * MONTHS_PER_YEAR),
                    )
                },
            },
            DerivedMetric {
                name: "inventory_turns_ttm",
                inputs: &["ttm_avg_costs_of_goods_sold", "ttm_avg_inventory"],
                formula: |inputs| {
                    zip_with(
                        inputs.column("ttm_avg_costs_of_goods_sold"),
                        inputs.column("ttm_avg_inventory"),
                        |cogs, inventory| divide(cogs * MONTHS_PER_YEAR, inventory),
                    )
                },
            },
            DerivedMetric {
                name: "modified_quick_ratio",
                inputs: &[
                    "period_value_cash",
                    "period_value_accounts_receivable",
                    "period_value_accounts_payable",
                    "period_value_credit_cards",
                ],
                formula: modified_quick_ratio,
            },
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = &DerivedMetric> {
        self.metrics.iter()
    }

    /// Base columns the formulas read that are not derived metrics themselves,
    /// in first-reference order.
    pub fn input_columns(&self) -> Vec<&'static str> {
        let mut columns: Vec<&'static str> = Vec::new();
        for metric in &self.metrics {
            for input in metric.inputs {
                let derived = self.metrics.iter().any(|m| m.name == *input);
                if !derived && !columns.contains(input) {
                    columns.push(*input);
                }
            }
        }
        columns
    }

    /// Checks every declared input against the table, reporting all gaps at once.
    pub fn validate(&self, frame: &MetricFrame) -> Result<(), ConfigError> {
        let undefined: Vec<UndefinedReference> = self
            .metrics
            .iter()
            .flat_map(|metric| {
                metric
                    .inputs
                    .iter()
                    .filter(move |input| !frame.has_column(input))
                    .map(move |input| UndefinedReference {
                        column: input.to_string(),
                        referenced_by: metric.name.to_string(),
                    })
            })
            .collect();

        if undefined.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::UndefinedFormulaInputs(undefined))
        }
    }

    /// Evaluates every formula against the pivoted table and appends the results.
    pub fn derive(&self, mut frame: MetricFrame) -> Result<MetricFrame, ConfigError> {
        self.validate(&frame)?;

        // Formulas read the pivoted columns only, so evaluate all of them
        // before any result lands in the frame.
        let results: Vec<(&'static str, Column)> = self
            .metrics
            .iter()
            .map(|metric| {
                let inputs = FormulaInputs::new(metric, &frame);
                (metric.name, (metric.formula)(&inputs))
            })
            .collect();

        for (name, values) in results {
            if !frame.is_empty() && values.iter().all(Option::is_none) {
                warn!(metric = name, "derived metric produced no values");
            }
            frame.insert_column(name, values);
        }

        info!(metrics = self.metrics.len(), rows = frame.len(), "derived metrics calculated");
        Ok(frame)
    }
}

/// Ratio guarded against zero denominators and non-finite results.
pub fn divide(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        return None;
    }
    let ratio = numerator / denominator;
    ratio.is_finite().then_some(ratio)
}

fn annualize(column: &[Option<f64>]) -> Column {
    column
        .iter()
        .map(|value| value.map(|v| v * MONTHS_PER_YEAR))
        .collect()
}

fn zip_with(
    left: &[Option<f64>],
    right: &[Option<f64>],
    f: impl Fn(f64, f64) -> Option<f64>,
) -> Column {
    left.iter()
        .zip(right)
        .map(|(l, r)| match (l, r) {
            (Some(l), Some(r)) => f(*l, *r),
            _ => None,
        })
        .collect()
}

fn add(left: &[Option<f64>], right: &[Option<f64>]) -> Column {
    zip_with(left, right, |l, r| Some(l + r))
}

fn years_of_runway(inputs: &FormulaInputs<'_>) -> Column {
    zip_with(
        inputs.column("period_value_cash"),
        inputs.column("ttm_avg_operating_income"),
        |cash, operating_income| {
            let ratio = divide(cash, operating_income * MONTHS_PER_YEAR)?;
            Some(if ratio > 0.0 { NOT_BURNING } else { -ratio })
        },
    )
}

// (cash + receivables) / (payables + credit cards)
fn modified_quick_ratio(inputs: &FormulaInputs<'_>) -> Column {
    let liquid = add(
        inputs.column("period_value_cash"),
        inputs.column("period_value_accounts_receivable"),
    );
    let short_term = add(
        inputs.column("period_value_accounts_payable"),
        inputs.column("period_value_credit_cards"),
    );
    zip_with(&liquid, &short_term, divide)
}
