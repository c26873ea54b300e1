use std::env;
use std::time::Duration;

use crate::error::ConfigError;

/// Postgres schema holding the source table, outputs and run log.
pub const SCHEMA: &str = "risk_rating";

/// Audit table written after every Postgres-backed run.
pub const RUN_LOG_TABLE: &str = "pipeline_runs";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: Option<String>,
    pub source_table: String,
    pub historical_table: String,
    pub current_table: String,
    pub source_timeout: Duration,
    pub max_connections: u32,
    pub bind_addr: String,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = parse_or(lookup("PORT"), 8080u16);
        let config = Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            source_table: lookup("RISK_SOURCE_TABLE")
                .unwrap_or_else(|| "financial_observations".to_string()),
            historical_table: lookup("RISK_HISTORICAL_TABLE")
                .unwrap_or_else(|| "risk_rating_all_time_historical".to_string()),
            current_table: lookup("RISK_CURRENT_TABLE")
                .unwrap_or_else(|| "risk_rating_current".to_string()),
            source_timeout: Duration::from_secs(parse_or(lookup("RISK_SOURCE_TIMEOUT_SECS"), 300)),
            max_connections: parse_or(lookup("RISK_MAX_CONNECTIONS"), 5),
            bind_addr: lookup("RISK_BIND").unwrap_or_else(|| format!("0.0.0.0:{port}")),
            log_json: lookup("RISK_LOG_JSON")
                .and_then(|value| parse_bool(&value))
                .unwrap_or(false),
        };

        for table in [&config.source_table, &config.historical_table, &config.current_table] {
            validate_table_name(table)?;
        }
        config.check_output_tables()?;
        Ok(config)
    }

    /// Output tables are dropped on every write, so they must not alias any
    /// table the crate reads or appends to, nor each other.
    fn check_output_tables(&self) -> Result<(), ConfigError> {
        let protected = [
            (self.source_table.as_str(), "source"),
            (RUN_LOG_TABLE, "run log"),
        ];
        for output in [&self.historical_table, &self.current_table] {
            if let Some((_, role)) = protected.iter().find(|(name, _)| *name == output.as_str()) {
                return Err(ConfigError::OutputTableCollision {
                    table: output.clone(),
                    role: *role,
                });
            }
        }
        if self.historical_table == self.current_table {
            return Err(ConfigError::OutputTableCollision {
                table: self.current_table.clone(),
                role: "historical",
            });
        }
        Ok(())
    }

    pub fn qualified(table: &str) -> String {
        format!("{SCHEMA}.{table}")
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn validate_table_name(name: &str) -> Result<(), ConfigError> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_lowercase() || first == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidTableName(name.to_string()))
    }
}
