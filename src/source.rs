use std::path::PathBuf;
use std::time::Duration;

use sqlx::PgPool;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db;
use crate::error::SourceError;
use crate::models::RawObservation;

/// Where observations are read from. Neither variant retries.
#[derive(Debug, Clone)]
pub enum Source {
    Postgres {
        pool: PgPool,
        table: String,
        timeout: Duration,
    },
    Csv(PathBuf),
}

impl Source {
    pub fn describe(&self) -> String {
        match self {
            Source::Postgres { table, .. } => Config::qualified(table),
            Source::Csv(path) => path.display().to_string(),
        }
    }

    pub async fn fetch(&self) -> Result<Vec<RawObservation>, SourceError> {
        let described = self.describe();
        info!(source = %described, "fetching observations");

        let observations = match self {
            Source::Postgres {
                pool,
                table,
                timeout: limit,
            } => match timeout(*limit, db::fetch_observations(pool, table)).await {
                Ok(result) => result.map_err(|err| SourceError::from_sqlx(err, &described)),
                Err(_) => Err(SourceError::Timeout {
                    table: described.clone(),
                    seconds: limit.as_secs(),
                }),
            },
            Source::Csv(path) => read_csv(path.clone()).await,
        };

        match &observations {
            Ok(rows) if rows.is_empty() => {
                warn!(source = %described, "source returned no observations")
            }
            Ok(rows) => info!(source = %described, rows = rows.len(), "fetched observations"),
            Err(err) => error!(source = %described, error = %err, "failed to fetch observations"),
        }
        observations
    }
}

async fn read_csv(path: PathBuf) -> Result<Vec<RawObservation>, SourceError> {
    let blocking_path = path.clone();
    let read = tokio::task::spawn_blocking(move || -> Result<Vec<RawObservation>, csv::Error> {
        let mut reader = csv::Reader::from_path(&blocking_path)?;
        reader.deserialize().collect()
    })
    .await;

    match read {
        Ok(result) => result.map_err(|source| SourceError::Csv { path, source }),
        Err(join_error) => Err(SourceError::Other {
            table: path.display().to_string(),
            message: join_error.to_string(),
        }),
    }
}
