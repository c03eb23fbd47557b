//! Daily series construction: per-day aggregation and gap filling.

use crate::detect::{DetectError, TimeSeriesPoint};
use chrono::{Days, NaiveDate};
use std::collections::BTreeMap;

/// Minimum number of distinct days before any detector may run.
pub const MIN_DISTINCT_DAYS: usize = 10;

/// Turns raw `(date, amount)` records into a contiguous daily series.
#[derive(Debug, Clone)]
pub struct TimeSeriesBuilder {
    min_distinct_days: usize,
}

impl Default for TimeSeriesBuilder {
    fn default() -> Self {
        Self {
            min_distinct_days: MIN_DISTINCT_DAYS,
        }
    }
}

impl TimeSeriesBuilder {
    pub fn new(min_distinct_days: usize) -> Self {
        Self { min_distinct_days }
    }

    /// Build one point per calendar day between the first and last record.
    ///
    /// Records may arrive unsorted and sparse; amounts on the same day are
    /// summed and missing days are filled with `0`. When `lookback_days > 0`,
    /// records older than `lookback_days` before the latest record are
    /// dropped first.
    pub fn build(
        &self,
        records: &[(NaiveDate, f64)],
        lookback_days: u32,
    ) -> Result<Vec<TimeSeriesPoint>, DetectError> {
        let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for &(date, amount) in records {
            *by_day.entry(date).or_insert(0.0) += amount;
        }

        if lookback_days > 0 {
            // A window reaching past the calendar's start keeps everything
            let first_kept = by_day
                .keys()
                .next_back()
                .and_then(|last| last.checked_sub_days(Days::new(u64::from(lookback_days) - 1)));
            if let Some(first_kept) = first_kept {
                by_day = by_day.split_off(&first_kept);
            }
        }

        if by_day.len() < self.min_distinct_days {
            return Err(DetectError::InsufficientData {
                needed: self.min_distinct_days,
                have: by_day.len(),
            });
        }

        let (Some(&first), Some(&last)) = (by_day.keys().next(), by_day.keys().next_back()) else {
            return Ok(Vec::new());
        };

        let points = first
            .iter_days()
            .take_while(|d| *d <= last)
            .map(|date| TimeSeriesPoint {
                date,
                value: by_day.get(&date).copied().unwrap_or(0.0),
            })
            .collect();
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + Duration::days(i64::from(n))
    }

    #[test]
    fn test_gap_filling_one_point_per_day() {
        // 20 calendar days with every third day missing
        let records: Vec<(NaiveDate, f64)> = (0..20)
            .filter(|n| n % 3 != 1)
            .map(|n| (day(n), 50.0))
            .collect();

        let series = TimeSeriesBuilder::default().build(&records, 0).unwrap();
        assert_eq!(series.len(), 20);
        for (i, p) in series.iter().enumerate() {
            assert_eq!(p.date, day(i as u32));
            let expected = if i % 3 == 1 { 0.0 } else { 50.0 };
            assert_eq!(p.value, expected);
        }
    }

    #[test]
    fn test_same_day_records_are_summed_and_sorted() {
        let mut records: Vec<(NaiveDate, f64)> = (0..12).rev().map(|n| (day(n), 10.0)).collect();
        records.push((day(4), 5.0));
        records.push((day(4), 2.5));

        let series = TimeSeriesBuilder::default().build(&records, 0).unwrap();
        assert_eq!(series.len(), 12);
        assert_eq!(series[0].date, day(0));
        assert_eq!(series[4].value, 17.5);
    }

    #[test]
    fn test_insufficient_distinct_days() {
        // 15 calendar days but only 9 distinct recorded days
        let records: Vec<(NaiveDate, f64)> = [0, 1, 2, 3, 5, 8, 10, 12, 14]
            .iter()
            .map(|&n| (day(n), 1.0))
            .collect();

        let err = TimeSeriesBuilder::default().build(&records, 0).unwrap_err();
        assert!(matches!(
            err,
            DetectError::InsufficientData { needed: 10, have: 9 }
        ));
    }

    #[test]
    fn test_unbounded_lookback_keeps_everything() {
        let records: Vec<(NaiveDate, f64)> = (0..12).map(|n| (day(n), 1.0)).collect();
        let series = TimeSeriesBuilder::default().build(&records, u32::MAX).unwrap();
        assert_eq!(series.len(), 12);
        assert_eq!(series[0].date, day(0));
    }

    #[test]
    fn test_lookback_trims_relative_to_latest_record() {
        let records: Vec<(NaiveDate, f64)> = (0..40).map(|n| (day(n), 1.0)).collect();
        let series = TimeSeriesBuilder::default().build(&records, 30).unwrap();
        assert_eq!(series.len(), 30);
        assert_eq!(series[0].date, day(10));
        assert_eq!(series.last().unwrap().date, day(39));
    }
}
