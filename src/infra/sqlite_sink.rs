use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

use crate::app::ports::MirrorSinkPort;
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::aggregate::CurrencyAggregate;

/// Appends aggregate rows to a SQLite table, creating it on first use.
pub struct SqliteMirrorSink {
    path: PathBuf,
}

impl SqliteMirrorSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

fn open(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| PipelineError::persistence(dir, e))?;
    }
    Connection::open(path).map_err(|e| PipelineError::persistence(path, e))
}

/// Table names are interpolated into SQL, so only plain identifiers are allowed
fn checked_table_name(table: &str) -> Result<&str> {
    let valid = !table.is_empty()
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(table)
    } else {
        Err(PipelineError::Configuration(format!("invalid mirror table name '{table}'")))
    }
}

fn append_rows(conn: &mut Connection, table: &str, rows: &[CurrencyAggregate]) -> Result<usize> {
    let table = checked_table_name(table)?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL,
            base_currency TEXT NOT NULL,
            target_currency TEXT NOT NULL,
            latest_rate REAL NOT NULL,
            min_rate REAL NOT NULL,
            max_rate REAL NOT NULL,
            avg_rate REAL NOT NULL,
            std_rate REAL NOT NULL,
            volatility REAL NOT NULL,
            currency_category TEXT NOT NULL,
            observation_count INTEGER NOT NULL,
            processing_timestamp TEXT NOT NULL
        );"
    ))?;

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {table} (date, base_currency, target_currency, latest_rate, min_rate, max_rate,
                avg_rate, std_rate, volatility, currency_category, observation_count, processing_timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ))?;
        for row in rows {
            stmt.execute(params![
                row.date.to_string(),
                row.base_currency,
                row.target_currency,
                row.latest_rate,
                row.min_rate,
                row.max_rate,
                row.avg_rate,
                row.std_rate,
                row.volatility,
                row.currency_category.as_str(),
                row.observation_count as i64,
                row.processing_timestamp.to_rfc3339(),
            ])?;
        }
    }
    tx.commit()?;
    Ok(rows.len())
}

#[async_trait]
impl MirrorSinkPort for SqliteMirrorSink {
    async fn append(&self, table: &str, rows: &[CurrencyAggregate]) -> Result<usize> {
        let path = self.path.clone();
        let table = table.to_string();
        let rows = rows.to_vec();
        // rusqlite blocks; keep it off the runtime's worker threads
        tokio::task::spawn_blocking(move || {
            let mut conn = open(&path)?;
            append_rows(&mut conn, &table, &rows)
        })
        .await
        .map_err(|e| PipelineError::persistence(&self.path, e))?
    }
}
