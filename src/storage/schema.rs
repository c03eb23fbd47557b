//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS metric_records (
            id INTEGER PRIMARY KEY,
            metric_name TEXT NOT NULL,
            record_date TEXT NOT NULL,
            amount REAL NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS alerts (
            id TEXT PRIMARY KEY,
            metric_name TEXT NOT NULL,
            metric_value REAL NOT NULL,
            expected_range_min REAL,
            expected_range_max REAL,
            severity TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'open',
            detection_method TEXT NOT NULL,
            assigned_to TEXT,
            notes TEXT NOT NULL DEFAULT '',
            timestamp TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_metric_records_metric_date ON metric_records(metric_name, record_date);
        CREATE INDEX IF NOT EXISTS idx_alerts_metric_timestamp ON alerts(metric_name, timestamp);
        CREATE INDEX IF NOT EXISTS idx_alerts_timestamp ON alerts(timestamp);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )?;

    Ok(())
}
