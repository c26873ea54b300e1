use std::time::Instant;

use chrono::Utc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{self, RunRecord};
use crate::error::{ConfigError, PipelineError};
use crate::metrics::MetricRegistry;
use crate::models::{CurrentSnapshot, RawObservation, Rating};
use crate::output::{self, OutputTable};
use crate::reshape;
use crate::risk::{self, ScoredTable};
use crate::rules::RuleSet;
use crate::sink::Sink;
use crate::snapshot;
use crate::source::Source;

/// Immutable registries plus the output table names.
#[derive(Clone)]
pub struct Pipeline {
    pub metrics: MetricRegistry,
    pub rules: RuleSet,
    pub historical_table: String,
    pub current_table: String,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub scored: ScoredTable,
    pub snapshot: Vec<CurrentSnapshot>,
    pub historical: OutputTable,
    pub current: OutputTable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub observations: usize,
    pub scored_rows: usize,
    pub companies: usize,
    pub unratable_companies: usize,
}

impl Pipeline {
    pub fn standard(config: &Config) -> Self {
        Self {
            metrics: MetricRegistry::standard(),
            rules: RuleSet::standard(),
            historical_table: config.historical_table.clone(),
            current_table: config.current_table.clone(),
        }
    }

    /// Reshape, derive, validate, score and shape. Touches no I/O.
    pub fn compute(&self, observations: &[RawObservation]) -> Result<PipelineOutput, ConfigError> {
        let scored = if observations.is_empty() {
            warn!("no observations, output tables will be empty");
            ScoredTable {
                frame: Default::default(),
                records: Vec::new(),
            }
        } else {
            let pivoted = reshape::pivot_observations(observations);
            let derived = self.metrics.derive(pivoted)?;
            risk::score_frame(derived, &self.rules)?
        };

        let snapshot = snapshot::build_current_snapshot(&scored, &self.rules);
        let historical =
            output::historical_table(&self.historical_table, &scored, &self.metrics, &self.rules);
        let current = output::current_table(
            &self.current_table,
            &scored,
            &snapshot,
            &self.metrics,
            &self.rules,
        );

        Ok(PipelineOutput {
            scored,
            snapshot,
            historical,
            current,
        })
    }
}

impl PipelineOutput {
    pub fn summary(&self, run_id: Uuid, observations: usize) -> RunSummary {
        RunSummary {
            run_id,
            observations,
            scored_rows: self.scored.records.len(),
            companies: self.snapshot.len(),
            unratable_companies: self
                .snapshot
                .iter()
                .filter(|current| self.scored.records[current.row].rating == Rating::Unratable)
                .count(),
        }
    }
}

/// Fetches, computes and replaces both output tables. Nothing is written
/// unless every earlier stage succeeded.
pub async fn run(
    pipeline: &Pipeline,
    source: &Source,
    sink: &Sink,
) -> Result<(RunSummary, PipelineOutput), PipelineError> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let span = info_span!("risk_rating_run", %run_id);

    let result = async {
        let clock = Instant::now();
        info!("starting risk rating calculation");

        let observations = source.fetch().await?;
        let output = pipeline.compute(&observations)?;
        sink.write(&[output.historical.clone(), output.current.clone()])
            .await?;

        let summary = output.summary(run_id, observations.len());
        info!(
            scored_rows = summary.scored_rows,
            companies = summary.companies,
            elapsed_ms = clock.elapsed().as_millis() as u64,
            "risk rating calculation completed"
        );
        Ok::<_, PipelineError>((summary, output))
    }
    .instrument(span.clone())
    .await;

    if let Some(pool) = sink.pool() {
        let record = RunRecord {
            run_id,
            started_at,
            finished_at: Utc::now(),
            status: if result.is_ok() { "succeeded" } else { "failed" },
            scored_rows: result
                .as_ref()
                .map(|(summary, _)| summary.scored_rows as i64)
                .unwrap_or(0),
            companies: result
                .as_ref()
                .map(|(summary, _)| summary.companies as i64)
                .unwrap_or(0),
            message: result.as_ref().err().map(ToString::to_string),
        };
        if let Err(err) = db::record_run(pool, &record).await {
            span.in_scope(|| warn!(error = %err, "failed to record pipeline run"));
        }
    }

    result
}
