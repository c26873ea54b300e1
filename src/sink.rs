use std::path::{Path, PathBuf};

use sqlx::PgPool;
use tracing::info;

use crate::db;
use crate::error::SinkError;
use crate::output::OutputTable;

/// Where output tables go. Every write replaces what was there before.
#[derive(Debug, Clone)]
pub enum Sink {
    Postgres(PgPool),
    Csv(PathBuf),
}

impl Sink {
    pub async fn write(&self, tables: &[OutputTable]) -> Result<(), SinkError> {
        match self {
            Sink::Postgres(pool) => db::replace_tables(pool, tables).await,
            Sink::Csv(dir) => {
                let dir = dir.clone();
                let tables = tables.to_vec();
                let written = dir.clone();
                tokio::task::spawn_blocking(move || write_csv_tables(&dir, &tables))
                    .await
                    .map_err(|join_error| SinkError::Io {
                        path: written,
                        source: std::io::Error::other(join_error),
                    })?
            }
        }
    }

    pub fn pool(&self) -> Option<&PgPool> {
        match self {
            Sink::Postgres(pool) => Some(pool),
            Sink::Csv(_) => None,
        }
    }
}

/// Writes each table to `<dir>/<name>.csv`, renaming into place only after
/// every table was written.
fn write_csv_tables(dir: &Path, tables: &[OutputTable]) -> Result<(), SinkError> {
    std::fs::create_dir_all(dir).map_err(|source| SinkError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut staged = Vec::with_capacity(tables.len());
    for table in tables {
        let target = dir.join(format!("{}.csv", table.name));
        let temporary = dir.join(format!("{}.csv.tmp", table.name));
        if let Err(err) = write_csv_table(&temporary, table) {
            let _ = std::fs::remove_file(&temporary);
            for (temporary, _) in &staged {
                let _ = std::fs::remove_file(temporary);
            }
            return Err(err);
        }
        staged.push((temporary, target));
    }

    for (temporary, target) in staged {
        std::fs::rename(&temporary, &target).map_err(|source| SinkError::Io {
            path: target.clone(),
            source,
        })?;
        info!(path = %target.display(), "wrote output table");
    }
    Ok(())
}

fn write_csv_table(path: &Path, table: &OutputTable) -> Result<(), SinkError> {
    let to_sink_error = |source: csv::Error| SinkError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(to_sink_error)?;
    writer
        .write_record(table.columns.iter().map(|column| column.name.as_str()))
        .map_err(to_sink_error)?;
    for row in &table.rows {
        writer
            .write_record(row.iter().map(|cell| cell.render()))
            .map_err(to_sink_error)?;
    }
    writer.flush().map_err(|source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
