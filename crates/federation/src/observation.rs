//! SQL client for the rolling-window observation store.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use extract_common::time::{iso_ms, TimeRange};
use extract_common::{ExtractionError, ExtractionResult};

use crate::backend::{ObsMessage, ObservationBackend};
use crate::filters::ObservationQuery;
use crate::merge::MergeStore;

/// Values below this confidence percentage are dropped when the caller
/// requests quality-controlled data only.
const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 50.0;

/// Observation store client querying the live time-series tables.
pub struct SqlObservation {
    pool: SqlitePool,
    confidence_threshold: f64,
}

impl SqlObservation {
    /// Open the observation store database at the given path.
    pub async fn open(path: &Path) -> ExtractionResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| ExtractionError::Backend(format!("Observation open failed: {}", e)))?;

        let store = Self {
            pool,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub async fn open_memory() -> ExtractionResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| ExtractionError::Backend(format!("Observation open failed: {}", e)))?;

        let store = Self {
            pool,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> ExtractionResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(&self.pool).await.map_err(|e| {
                    ExtractionError::Backend(format!("Observation migration failed: {}", e))
                })?;
            }
        }

        Ok(())
    }

    /// Insert one observation. Feeding the store is the ingestion side's
    /// job; this is its seeding surface.
    pub async fn insert_observation(&self, message: &ObsMessage) -> ExtractionResult<()> {
        sqlx::query(
            "INSERT INTO observations \
             (network, station, lon, lat, reftime, level, timerange, varcode, value, confidence) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.network)
        .bind(&message.station)
        .bind(message.lon)
        .bind(message.lat)
        .bind(message.reftime.format(iso_ms::FORMAT).to_string())
        .bind(&message.level)
        .bind(&message.timerange)
        .bind(&message.varcode)
        .bind(message.value)
        .bind(message.confidence)
        .execute(&self.pool)
        .await
        .map_err(|e| ExtractionError::Backend(format!("Observation insert failed: {}", e)))?;

        Ok(())
    }

    async fn query_rows(
        &self,
        query: &ObservationQuery,
        range: TimeRange,
        only_reliable: bool,
    ) -> ExtractionResult<Vec<ObsMessage>> {
        let mut sql = String::from(
            "SELECT network, station, lon, lat, reftime, level, timerange, varcode, \
             value, confidence FROM observations WHERE reftime >= ? AND reftime <= ?",
        );

        push_in_clause(&mut sql, "network", &query.networks);
        push_in_clause(&mut sql, "varcode", &query.products);
        push_in_clause(&mut sql, "level", &query.levels);
        push_in_clause(&mut sql, "timerange", &query.timeranges);

        if only_reliable {
            sql.push_str(" AND (confidence IS NULL OR confidence >= ?)");
        }

        sql.push_str(" ORDER BY network, station, reftime");

        let mut db_query = sqlx::query_as::<
            _,
            (
                String,
                String,
                f64,
                f64,
                String,
                String,
                String,
                String,
                f64,
                Option<f64>,
            ),
        >(&sql)
        .bind(range.from.format(iso_ms::FORMAT).to_string())
        .bind(range.to.format(iso_ms::FORMAT).to_string());

        for value in query
            .networks
            .iter()
            .chain(&query.products)
            .chain(&query.levels)
            .chain(&query.timeranges)
        {
            db_query = db_query.bind(value);
        }

        if only_reliable {
            db_query = db_query.bind(self.confidence_threshold);
        }

        let rows = db_query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ExtractionError::Backend(format!("Observation query failed: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(
                |(network, station, lon, lat, reftime, level, timerange, varcode, value, confidence)| {
                    ObsMessage {
                        network,
                        station,
                        lon,
                        lat,
                        reftime: extract_common::time::parse_iso(&reftime)
                            .unwrap_or(range.from),
                        level,
                        timerange,
                        varcode,
                        value,
                        confidence,
                    }
                },
            )
            .collect())
    }
}

fn push_in_clause(sql: &mut String, column: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }

    let placeholders = vec!["?"; values.len()].join(", ");
    sql.push_str(&format!(" AND {} IN ({})", column, placeholders));
}

#[async_trait]
impl ObservationBackend for SqlObservation {
    async fn extract_to_file(
        &self,
        query: &ObservationQuery,
        range: TimeRange,
        only_reliable: bool,
        dest: &Path,
    ) -> ExtractionResult<u64> {
        let messages = self.query_rows(query, range, only_reliable).await?;
        if messages.is_empty() {
            return Ok(0);
        }

        let mut store = MergeStore::new();
        store.import(messages);
        store.write_to(dest).await
    }

    async fn fetch_messages(
        &self,
        query: &ObservationQuery,
        range: TimeRange,
        only_reliable: bool,
    ) -> ExtractionResult<Vec<ObsMessage>> {
        self.query_rows(query, range, only_reliable).await
    }
}

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    network TEXT NOT NULL,
    station TEXT NOT NULL,
    lon REAL NOT NULL,
    lat REAL NOT NULL,
    reftime TEXT NOT NULL,
    level TEXT NOT NULL,
    timerange TEXT NOT NULL,
    varcode TEXT NOT NULL,
    value REAL NOT NULL,
    confidence REAL
);

CREATE INDEX IF NOT EXISTS idx_observations_reftime ON observations(reftime);
CREATE INDEX IF NOT EXISTS idx_observations_network ON observations(network, reftime)
"#;
