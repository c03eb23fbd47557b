//! Raw daily metric records and the time-series provider seam.

use crate::storage::Pool;
use anyhow::{Context, Result};
use chrono::{Days, NaiveDate, Utc};
use rusqlite::params;

/// Source of raw `(date, amount)` records for a named metric.
///
/// Records may be sparse, unsorted, and contain several entries per day.
pub trait SeriesProvider: Send + Sync {
    fn get_daily_series(&self, metric_name: &str, lookback_days: u32) -> Result<Vec<(NaiveDate, f64)>>;

    /// Every metric that currently has records.
    fn metric_names(&self) -> Result<Vec<String>>;
}

/// Provider backed by the `metric_records` table.
#[derive(Clone)]
pub struct SqliteSeriesProvider {
    pool: Pool,
}

impl SqliteSeriesProvider {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn record(&self, metric_name: &str, date: NaiveDate, amount: f64) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO metric_records (metric_name, record_date, amount) VALUES (?1, ?2, ?3)",
            params![metric_name, date.to_string(), amount],
        )
        .context("Failed to insert metric record")?;
        Ok(())
    }

    /// Records dated within `lookback_days` up to and including `today`.
    pub fn get_daily_series_as_of(
        &self,
        metric_name: &str,
        lookback_days: u32,
        today: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>> {
        // Past the calendar's start every record qualifies
        let start = today
            .checked_sub_days(Days::new(u64::from(lookback_days)))
            .map(|d| d.to_string());
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT record_date, amount FROM metric_records
             WHERE metric_name = ?1
             AND (?2 IS NULL OR record_date > ?2)
             AND record_date <= ?3
             ORDER BY record_date ASC",
        )?;

        let rows = stmt.query_map(params![metric_name, start, today.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut records = Vec::new();
        for r in rows {
            let (raw_date, amount) = r?;
            let date: NaiveDate = raw_date
                .parse()
                .with_context(|| format!("invalid record_date '{}' for {}", raw_date, metric_name))?;
            records.push((date, amount));
        }
        Ok(records)
    }
}

impl SeriesProvider for SqliteSeriesProvider {
    fn get_daily_series(&self, metric_name: &str, lookback_days: u32) -> Result<Vec<(NaiveDate, f64)>> {
        self.get_daily_series_as_of(metric_name, lookback_days, Utc::now().date_naive())
    }

    fn metric_names(&self) -> Result<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT metric_name FROM metric_records ORDER BY metric_name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn provider() -> (tempfile::TempDir, SqliteSeriesProvider) {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = crate::storage::open_pool(&dir.path().join("records.db")).unwrap();
        (dir, SqliteSeriesProvider::new(pool))
    }

    #[test]
    fn test_lookback_window_is_inclusive_of_today() -> Result<()> {
        let (_dir, provider) = provider();
        let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        for back in 0..50 {
            provider.record("sales_total", today - Duration::days(back), 10.0)?;
        }
        provider.record("sales_total", today + Duration::days(1), 10.0)?;

        let records = provider.get_daily_series_as_of("sales_total", 35, today)?;
        assert_eq!(records.len(), 35);
        assert_eq!(records.first().unwrap().0, today - Duration::days(34));
        assert_eq!(records.last().unwrap().0, today);
        Ok(())
    }

    #[test]
    fn test_huge_lookback_returns_all_history() -> Result<()> {
        let (_dir, provider) = provider();
        let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        provider.record("sales_total", NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(), 1.0)?;
        provider.record("sales_total", today, 2.0)?;

        let records = provider.get_daily_series_as_of("sales_total", u32::MAX, today)?;
        assert_eq!(records.len(), 2);
        Ok(())
    }

    #[test]
    fn test_metric_names_are_distinct() -> Result<()> {
        let (_dir, provider) = provider();
        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        provider.record("sales_total", day, 1.0)?;
        provider.record("sales_total", day, 2.0)?;
        provider.record("collections_total", day, 3.0)?;

        assert_eq!(
            provider.metric_names()?,
            vec!["collections_total".to_string(), "sales_total".to_string()]
        );
        Ok(())
    }
}
