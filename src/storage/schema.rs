//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Current schema version, recorded in `schema_version` after migrating.
pub const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations. Safe to call on every open.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS configs (
            config_id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS analysis_records (
            id INTEGER PRIMARY KEY,
            config_id TEXT NOT NULL,
            tag TEXT,
            analysis_minute INTEGER NOT NULL,
            overall_risk REAL NOT NULL,
            transaction_risk_json TEXT NOT NULL DEFAULT '{}',
            FOREIGN KEY (config_id) REFERENCES configs(config_id)
        );

        CREATE TABLE IF NOT EXISTS metric_samples (
            id INTEGER PRIMARY KEY,
            config_id TEXT NOT NULL,
            tag TEXT NOT NULL DEFAULT '',
            transaction_name TEXT NOT NULL,
            metric_name TEXT NOT NULL,
            collection_minute INTEGER NOT NULL,
            value REAL NOT NULL,
            deeplink_url TEXT,
            FOREIGN KEY (config_id) REFERENCES configs(config_id)
        );

        CREATE TABLE IF NOT EXISTS risk_summaries (
            id INTEGER PRIMARY KEY,
            config_id TEXT NOT NULL,
            tag TEXT,
            analysis_minute INTEGER NOT NULL,
            transaction_name TEXT NOT NULL,
            metric_name TEXT NOT NULL,
            risk REAL NOT NULL,
            long_term_pattern INTEGER,
            last_seen_time INTEGER,
            FOREIGN KEY (config_id) REFERENCES configs(config_id)
        );

        CREATE TABLE IF NOT EXISTS metric_types (
            config_id TEXT NOT NULL,
            metric_name TEXT NOT NULL,
            metric_type TEXT NOT NULL,
            PRIMARY KEY (config_id, metric_name)
        );

        CREATE INDEX IF NOT EXISTS idx_analysis_records_minute ON analysis_records(config_id, analysis_minute);
        CREATE INDEX IF NOT EXISTS idx_metric_samples_minute ON metric_samples(config_id, collection_minute);
        CREATE INDEX IF NOT EXISTS idx_risk_summaries_minute ON risk_summaries(config_id, analysis_minute);",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}
