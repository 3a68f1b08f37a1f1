//! SQLite storage layer -- schema, inserts, and the provider traits the
//! dashboard builders read through.

pub mod schema;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::{AnalysisRecord, MetricRisk, MetricSample, RiskSummary, RiskValue};
use crate::provider::{AnalysisSource, MetricTypeResolver, RiskSummarySource, SampleSource, UNCLASSIFIED_METRIC_TYPE};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a migrated connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory: {}", parent.display()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Metric type assignment as it appears in an import fixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricTypeEntry {
    pub config_id: String,
    pub metric_name: String,
    pub metric_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureSample {
    pub config_id: String,
    #[serde(flatten)]
    pub sample: MetricSample,
}

/// JSON document accepted by `riskmap import`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub configs: Vec<String>,
    pub records: Vec<AnalysisRecord>,
    pub samples: Vec<FixtureSample>,
    pub summaries: Vec<RiskSummary>,
    pub metric_types: Vec<MetricTypeEntry>,
}

impl Fixture {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture: {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("failed to parse fixture: {}", path.display()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportCounts {
    pub configs: usize,
    pub records: usize,
    pub samples: usize,
    pub summaries: usize,
    pub metric_types: usize,
}

/// Dashboard data store on SQLite. Queries run on the blocking pool.
pub struct SqliteStore {
    pool: Pool,
    /// `(config_id, metric_name) -> metric_type`, loaded at open.
    metric_types: RwLock<HashMap<(String, String), String>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "opening riskmap database");
        Self::from_pool(open_pool(path)?)
    }

    pub fn from_pool(pool: Pool) -> Result<Self> {
        let conn = pool.get()?;
        let mut stmt = conn.prepare("SELECT config_id, metric_name, metric_type FROM metric_types")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                (row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut metric_types = HashMap::new();
        for row in rows {
            let (key, metric_type) = row?;
            metric_types.insert(key, metric_type);
        }
        debug!(metric_types = metric_types.len(), "loaded metric type cache");
        drop(stmt);
        drop(conn);

        Ok(Self {
            pool,
            metric_types: RwLock::new(metric_types),
        })
    }

    pub fn insert_config(&self, config_id: &str) -> Result<()> {
        let conn = self.pool.get()?;
        write_config(&conn, config_id)
    }

    pub fn insert_record(&self, record: &AnalysisRecord) -> Result<()> {
        let conn = self.pool.get()?;
        write_record(&conn, record)
    }

    pub fn insert_sample(&self, config_id: &str, sample: &MetricSample) -> Result<()> {
        let conn = self.pool.get()?;
        write_sample(&conn, config_id, sample)
    }

    pub fn insert_summary(&self, summary: &RiskSummary) -> Result<()> {
        let conn = self.pool.get()?;
        write_summary(&conn, summary)
    }

    pub fn set_metric_type(&self, config_id: &str, metric_name: &str, metric_type: &str) -> Result<()> {
        let conn = self.pool.get()?;
        write_metric_type(&conn, config_id, metric_name, metric_type)?;
        self.cache_metric_type(config_id, metric_name, metric_type);
        Ok(())
    }

    /// Load a whole fixture in one transaction.
    pub fn import_fixture(&self, fixture: &Fixture) -> Result<ImportCounts> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        for config_id in &fixture.configs {
            write_config(&tx, config_id)?;
        }
        for record in &fixture.records {
            write_record(&tx, record)?;
        }
        for entry in &fixture.samples {
            write_sample(&tx, &entry.config_id, &entry.sample)?;
        }
        for summary in &fixture.summaries {
            write_summary(&tx, summary)?;
        }
        for entry in &fixture.metric_types {
            write_metric_type(&tx, &entry.config_id, &entry.metric_name, &entry.metric_type)?;
        }
        tx.commit().context("failed to commit fixture import")?;

        for entry in &fixture.metric_types {
            self.cache_metric_type(&entry.config_id, &entry.metric_name, &entry.metric_type);
        }

        let counts = ImportCounts {
            configs: fixture.configs.len(),
            records: fixture.records.len(),
            samples: fixture.samples.len(),
            summaries: fixture.summaries.len(),
            metric_types: fixture.metric_types.len(),
        };
        info!(?counts, "fixture imported");
        Ok(counts)
    }

    fn cache_metric_type(&self, config_id: &str, metric_name: &str, metric_type: &str) {
        self.metric_types
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((config_id.to_string(), metric_name.to_string()), metric_type.to_string());
    }
}

fn write_config(conn: &Connection, config_id: &str) -> Result<()> {
    conn.execute("INSERT OR IGNORE INTO configs (config_id) VALUES (?1)", params![config_id])?;
    Ok(())
}

fn write_record(conn: &Connection, record: &AnalysisRecord) -> Result<()> {
    write_config(conn, &record.config_id)?;
    let transaction_risk = serde_json::to_string(&record.transaction_risk)?;
    conn.execute(
        "INSERT INTO analysis_records (config_id, tag, analysis_minute, overall_risk, transaction_risk_json)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.config_id,
            record.tag,
            record.analysis_minute,
            record.overall_risk.to_score(),
            transaction_risk
        ],
    )?;
    Ok(())
}

fn write_sample(conn: &Connection, config_id: &str, sample: &MetricSample) -> Result<()> {
    write_config(conn, config_id)?;
    conn.execute(
        "INSERT INTO metric_samples
            (config_id, tag, transaction_name, metric_name, collection_minute, value, deeplink_url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            config_id,
            sample.tag,
            sample.transaction,
            sample.metric,
            sample.collection_minute,
            sample.value,
            sample.deeplink_url
        ],
    )?;
    Ok(())
}

fn write_summary(conn: &Connection, summary: &RiskSummary) -> Result<()> {
    write_config(conn, &summary.config_id)?;
    let mut stmt = conn.prepare(
        "INSERT INTO risk_summaries
            (config_id, tag, analysis_minute, transaction_name, metric_name, risk, long_term_pattern, last_seen_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for (transaction, metrics) in &summary.metrics {
        for (metric, risk) in metrics {
            stmt.execute(params![
                summary.config_id,
                summary.tag,
                summary.analysis_minute,
                transaction,
                metric,
                risk.risk.to_score(),
                risk.long_term_pattern,
                risk.last_seen_time
            ])?;
        }
    }
    Ok(())
}

fn write_metric_type(conn: &Connection, config_id: &str, metric_name: &str, metric_type: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metric_types (config_id, metric_name, metric_type) VALUES (?1, ?2, ?3)",
        params![config_id, metric_name, metric_type],
    )?;
    Ok(())
}

#[async_trait::async_trait]
impl AnalysisSource for SqliteStore {
    async fn fetch_analysis_records(
        &self,
        config_id: &str,
        start_minute: i64,
        end_minute: i64,
    ) -> Result<Vec<AnalysisRecord>> {
        let pool = self.pool.clone();
        let config_id = config_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<AnalysisRecord>> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT tag, analysis_minute, overall_risk, transaction_risk_json FROM analysis_records
                 WHERE config_id = ?1 AND analysis_minute BETWEEN ?2 AND ?3
                 ORDER BY analysis_minute ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![config_id, start_minute, end_minute], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (tag, analysis_minute, overall_risk, transaction_risk) = row?;
                let transaction_risk: BTreeMap<String, RiskValue> = serde_json::from_str(&transaction_risk)
                    .with_context(|| format!("corrupt transaction risk for minute {}", analysis_minute))?;
                records.push(AnalysisRecord {
                    config_id: config_id.clone(),
                    tag,
                    analysis_minute,
                    overall_risk: RiskValue::from_score(overall_risk),
                    transaction_risk,
                });
            }
            Ok(records)
        })
        .await?
    }

    async fn config_exists(&self, config_id: &str) -> Result<bool> {
        let pool = self.pool.clone();
        let config_id = config_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<bool> {
            let conn = pool.get()?;
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM configs WHERE config_id = ?1)",
                params![config_id],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await?
    }
}

#[async_trait::async_trait]
impl SampleSource for SqliteStore {
    async fn fetch_metric_samples(
        &self,
        config_id: &str,
        window_start_minute: i64,
        window_end_minute: i64,
        tag: Option<&str>,
    ) -> Result<Vec<MetricSample>> {
        let pool = self.pool.clone();
        let config_id = config_id.to_string();
        let tag = tag.map(str::to_string);

        tokio::task::spawn_blocking(move || -> Result<Vec<MetricSample>> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT tag, transaction_name, metric_name, collection_minute, value, deeplink_url
                 FROM metric_samples
                 WHERE config_id = ?1 AND collection_minute BETWEEN ?2 AND ?3
                   AND (?4 IS NULL OR tag = ?4)
                 ORDER BY collection_minute ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![config_id, window_start_minute, window_end_minute, tag], |row| {
                Ok(MetricSample {
                    tag: row.get(0)?,
                    transaction: row.get(1)?,
                    metric: row.get(2)?,
                    collection_minute: row.get(3)?,
                    value: row.get(4)?,
                    deeplink_url: row.get(5)?,
                })
            })?;

            let samples = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(samples)
        })
        .await?
    }
}

#[async_trait::async_trait]
impl RiskSummarySource for SqliteStore {
    async fn fetch_risk_summaries(
        &self,
        config_id: &str,
        start_minute: i64,
        end_minute: i64,
        tag: Option<&str>,
    ) -> Result<Vec<RiskSummary>> {
        let pool = self.pool.clone();
        let config_id = config_id.to_string();
        let tag = tag.map(str::to_string);

        tokio::task::spawn_blocking(move || -> Result<Vec<RiskSummary>> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT analysis_minute, transaction_name, metric_name, risk, long_term_pattern, last_seen_time
                 FROM risk_summaries
                 WHERE config_id = ?1 AND analysis_minute BETWEEN ?2 AND ?3 AND tag IS ?4
                 ORDER BY analysis_minute ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![config_id, start_minute, end_minute, tag], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    MetricRisk {
                        risk: RiskValue::from_score(row.get(3)?),
                        long_term_pattern: row.get(4)?,
                        last_seen_time: row.get(5)?,
                    },
                ))
            })?;

            // Rows arrive minute-ordered; one summary per minute.
            let mut summaries: Vec<RiskSummary> = Vec::new();
            for row in rows {
                let (analysis_minute, transaction, metric, risk) = row?;
                let needs_new = summaries.last().map_or(true, |s| s.analysis_minute != analysis_minute);
                if needs_new {
                    summaries.push(RiskSummary {
                        config_id: config_id.clone(),
                        tag: tag.clone(),
                        analysis_minute,
                        metrics: BTreeMap::new(),
                    });
                }
                if let Some(summary) = summaries.last_mut() {
                    summary.metrics.entry(transaction).or_default().insert(metric, risk);
                }
            }
            Ok(summaries)
        })
        .await?
    }
}

impl MetricTypeResolver for SqliteStore {
    fn classify_metric_type(&self, config_id: &str, metric_name: &str) -> String {
        self.metric_types
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(config_id.to_string(), metric_name.to_string()))
            .cloned()
            .unwrap_or_else(|| UNCLASSIFIED_METRIC_TYPE.to_string())
    }
}
