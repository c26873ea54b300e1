use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A column some registry entry needs that the table does not provide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndefinedReference {
    pub column: String,
    pub referenced_by: String,
}

impl fmt::Display for UndefinedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' referenced in '{}'", self.column, self.referenced_by)
    }
}

fn join_references(references: &[UndefinedReference]) -> String {
    references
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("derived metric registry references undefined columns: {}", join_references(.0))]
    UndefinedFormulaInputs(Vec<UndefinedReference>),
    #[error("risk rule set references undefined metrics: {}", join_references(.0))]
    UndefinedRuleMetrics(Vec<UndefinedReference>),
    #[error("invalid table name '{0}': use lowercase letters, digits and underscores")]
    InvalidTableName(String),
    #[error("output table '{table}' would replace the {role} table")]
    OutputTableCollision { table: String, role: &'static str },
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("syntax error in query against {table}: {message}")]
    Syntax { table: String, message: String },
    #[error("{table} was not found, verify the table and its columns exist: {message}")]
    NotFound { table: String, message: String },
    #[error("permission denied reading {table}, verify the database role's grants: {message}")]
    PermissionDenied { table: String, message: String },
    #[error("query against {table} timed out after {seconds}s")]
    Timeout { table: String, seconds: u64 },
    #[error("failed to read observations from {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to read observations from {table}: {message}")]
    Other { table: String, message: String },
}

impl SourceError {
    /// Maps a Postgres failure onto the source error categories by SQLSTATE.
    pub fn from_sqlx(err: sqlx::Error, table: &str) -> Self {
        let table = table.to_string();
        let message = err.to_string();
        match &err {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("42601") => SourceError::Syntax { table, message },
                Some("42P01") | Some("3F000") | Some("42703") => {
                    SourceError::NotFound { table, message }
                }
                Some("42501") => SourceError::PermissionDenied { table, message },
                _ => SourceError::Other { table, message },
            },
            _ => SourceError::Other { table, message },
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {table}: {source}")]
    Database {
        table: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}
