//! SQLite storage layer -- pool, schema, and the metric record provider.

pub mod records;
pub mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
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

    let pool = R2D2Pool::new(manager)
        .with_context(|| format!("failed to open database {}", path.display()))?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Fixed-width UTC timestamp so that text order matches time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// `now - days` for a "last N days" filter. `None` when the window reaches
/// past the representable range, meaning no lower bound. Negative windows
/// are treated as empty and yield `now`.
pub fn days_before(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    if days <= 0 {
        return Some(now);
    }
    Duration::try_days(days).and_then(|d| now.checked_sub_signed(d))
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_text_orders_like_time() {
        let a = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let b = a + chrono::Duration::milliseconds(1);
        let (fa, fb) = (format_timestamp(&a), format_timestamp(&b));
        assert!(fa < fb);
        assert_eq!(fa.len(), fb.len());
        assert_eq!(parse_timestamp(&fa).unwrap(), a);
    }

    #[test]
    fn test_days_before_saturates() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(days_before(now, 1), Some(now - Duration::days(1)));
        assert_eq!(days_before(now, 0), Some(now));
        assert_eq!(days_before(now, -5), Some(now));
        assert_eq!(days_before(now, i64::MIN), Some(now));
        assert_eq!(days_before(now, 1_000_000_000), None);
        assert_eq!(days_before(now, i64::MAX), None);
    }

    #[test]
    fn test_open_pool_creates_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("metricwatch.db");
        let pool = open_pool(&path).unwrap();
        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(path.exists());
    }
}
