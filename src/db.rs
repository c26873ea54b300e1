use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{Config, RUN_LOG_TABLE};
use crate::error::SinkError;
use crate::models::RawObservation;
use crate::output::{Cell, OutputTable};

/// Postgres caps bind parameters per statement at 65535.
const MAX_BIND_PARAMS: usize = 65_535;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool, source_table: &str) -> anyhow::Result<usize> {
    // (company, month end, metric, period value, ttm avg, pttm avg), amounts in thousands
    let observations: Vec<(&str, (i32, u32, u32), &str, f64, f64, f64)> = vec![
        ("Birch & Bloom Bakery", (2025, 5, 31), "Revenue", 610.0, 590.0, 640.0),
        ("Birch & Bloom Bakery", (2025, 5, 31), "Operating Income", -42.0, -35.0, 12.0),
        ("Birch & Bloom Bakery", (2025, 5, 31), "Costs of Goods Sold", 280.0, 270.0, 300.0),
        ("Birch & Bloom Bakery", (2025, 5, 31), "Inventory", 160.0, 155.0, 150.0),
        ("Birch & Bloom Bakery", (2025, 5, 31), "Cash", 240.0, 260.0, 410.0),
        ("Birch & Bloom Bakery", (2025, 5, 31), "Accounts Receivable", 55.0, 60.0, 70.0),
        ("Birch & Bloom Bakery", (2025, 5, 31), "Accounts Payable", 190.0, 170.0, 120.0),
        ("Birch & Bloom Bakery", (2025, 5, 31), "Credit Cards", 48.0, 40.0, 25.0),
        ("Birch & Bloom Bakery", (2025, 5, 31), "Cumulative Retained Earnings", -120.0, -90.0, 40.0),
        ("Birch & Bloom Bakery", (2025, 5, 31), "AB Loan Balance", 2200.0, 2100.0, 1500.0),
        ("Birch & Bloom Bakery", (2025, 5, 31), "Contributed Capital", 1800.0, 1800.0, 1800.0),
        ("Birch & Bloom Bakery", (2025, 6, 30), "Revenue", 600.0, 585.0, 645.0),
        ("Birch & Bloom Bakery", (2025, 6, 30), "Operating Income", -48.0, -38.0, 10.0),
        ("Birch & Bloom Bakery", (2025, 6, 30), "Cash", 205.0, 250.0, 400.0),
        ("Birch & Bloom Bakery", (2025, 6, 30), "AB Loan Balance", 2250.0, 2150.0, 1550.0),
        ("Northwind Outfitters", (2025, 6, 30), "Revenue", 1450.0, 1400.0, 1200.0),
        ("Northwind Outfitters", (2025, 6, 30), "Operating Income", 130.0, 120.0, 95.0),
        ("Northwind Outfitters", (2025, 6, 30), "Costs of Goods Sold", 700.0, 680.0, 610.0),
        ("Northwind Outfitters", (2025, 6, 30), "Inventory", 900.0, 880.0, 800.0),
        ("Northwind Outfitters", (2025, 6, 30), "Cash", 1300.0, 1150.0, 900.0),
        ("Northwind Outfitters", (2025, 6, 30), "Accounts Receivable", 400.0, 380.0, 300.0),
        ("Northwind Outfitters", (2025, 6, 30), "Accounts Payable", 520.0, 500.0, 450.0),
        ("Northwind Outfitters", (2025, 6, 30), "Credit Cards", 60.0, 55.0, 50.0),
        ("Northwind Outfitters", (2025, 6, 30), "Cumulative Retained Earnings", 2400.0, 2200.0, 1800.0),
        ("Northwind Outfitters", (2025, 6, 30), "AB Loan Balance", 3000.0, 3100.0, 2900.0),
        ("Northwind Outfitters", (2025, 6, 30), "Contributed Capital", 5000.0, 5000.0, 5000.0),
    ];

    let mut inserted = 0usize;
    for (company, (year, month, day), metric, period_value, ttm_avg, pttm_avg) in observations {
        let time_period = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .context("invalid date")?
            .and_utc();
        let source_key = format!(
            "seed-{}-{}-{}",
            slug(company),
            time_period.format("%Y-%m"),
            slug(metric)
        );

        let result = sqlx::query(&format!(
            "INSERT INTO {} \
             (id, company_name, time_period, metric_name, period_value, ttm_avg, pttm_avg, source_key) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (source_key) DO NOTHING",
            Config::qualified(source_table)
        ))
        .bind(Uuid::new_v4())
        .bind(company)
        .bind(time_period)
        .bind(metric)
        .bind(period_value)
        .bind(ttm_avg)
        .bind(pttm_avg)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

fn slug(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

pub async fn fetch_observations(
    pool: &PgPool,
    source_table: &str,
) -> Result<Vec<RawObservation>, sqlx::Error> {
    let query = format!(
        "SELECT company_name, time_period, metric_name, period_value, ttm_avg, pttm_avg \
         FROM {}",
        Config::qualified(source_table)
    );
    debug!(%query, "fetching observations");
    sqlx::query_as::<_, RawObservation>(&query)
        .fetch_all(pool)
        .await
}

pub async fn import_csv(
    pool: &PgPool,
    source_table: &str,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        company_name: String,
        #[serde(deserialize_with = "crate::models::deserialize_period")]
        time_period: DateTime<Utc>,
        metric_name: String,
        period_value: Option<f64>,
        ttm_avg: Option<f64>,
        pttm_avg: Option<f64>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let insert = format!(
        "INSERT INTO {} \
         (id, company_name, time_period, metric_name, period_value, ttm_avg, pttm_avg, source_key) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (source_key) DO NOTHING",
        Config::qualified(source_table)
    );
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let source_key = row
            .source_key
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(&insert)
            .bind(Uuid::new_v4())
            .bind(&row.company_name)
            .bind(row.time_period)
            .bind(&row.metric_name)
            .bind(row.period_value)
            .bind(row.ttm_avg)
            .bind(row.pttm_avg)
            .bind(source_key)
            .execute(pool)
            .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

/// Replaces every output table in a single transaction.
pub async fn replace_tables(pool: &PgPool, tables: &[OutputTable]) -> Result<(), SinkError> {
    let mut tx = pool.begin().await.map_err(|source| SinkError::Database {
        table: "transaction".to_string(),
        source,
    })?;

    for table in tables {
        let qualified = Config::qualified(&table.name);
        let to_sink_error = |source: sqlx::Error| SinkError::Database {
            table: qualified.clone(),
            source,
        };

        sqlx::query(&format!("DROP TABLE IF EXISTS {qualified}"))
            .execute(&mut *tx)
            .await
            .map_err(to_sink_error)?;

        let definitions = table
            .columns
            .iter()
            .map(|column| format!("{} {}", quote_ident(&column.name), column.column_type.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query(&format!("CREATE TABLE {qualified} ({definitions})"))
            .execute(&mut *tx)
            .await
            .map_err(to_sink_error)?;

        let column_list = table
            .columns
            .iter()
            .map(|column| quote_ident(&column.name))
            .collect::<Vec<_>>()
            .join(", ");
        let rows_per_statement = (MAX_BIND_PARAMS / table.columns.len().max(1)).max(1);

        for chunk in table.rows.chunks(rows_per_statement) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {qualified} ({column_list}) "));
            builder.push_values(chunk, |mut values, row| {
                for cell in row {
                    match cell {
                        Cell::Text(value) => {
                            values.push_bind(value.clone());
                        }
                        Cell::Timestamp(value) => {
                            values.push_bind(*value);
                        }
                        Cell::Integer(value) => {
                            values.push_bind(*value);
                        }
                        Cell::Float(value) => {
                            values.push_bind(*value);
                        }
                    }
                }
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(to_sink_error)?;
        }

        info!(table = %qualified, rows = table.rows.len(), "replaced output table");
    }

    tx.commit().await.map_err(|source| SinkError::Database {
        table: "transaction".to_string(),
        source,
    })?;
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: &'static str,
    pub scored_rows: i64,
    pub companies: i64,
    pub message: Option<String>,
}

pub async fn record_run(pool: &PgPool, run: &RunRecord) -> Result<(), sqlx::Error> {
    let insert = format!(
        "INSERT INTO {} \
         (run_id, started_at, finished_at, status, scored_rows, companies, message) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
        Config::qualified(RUN_LOG_TABLE)
    );
    sqlx::query(&insert)
        .bind(run.run_id)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.status)
        .bind(run.scored_rows)
        .bind(run.companies)
        .bind(run.message.as_deref())
        .execute(pool)
        .await?;
    Ok(())
}
