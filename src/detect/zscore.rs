use crate::config::RollingZScoreConfig;
use crate::detect::ensemble::Detector;
use crate::detect::stats::{is_degenerate, Sample};
use crate::detect::{
    AnomalyCandidate, DetectionMethod, DetectorUnavailable, Severity, TimeSeriesPoint,
};

/// Flags points far from the mean of their trailing window.
///
/// The window includes the point itself, so nothing is emitted until
/// `window_size` points have been seen. A window with zero spread is skipped
/// rather than producing an undefined z-score.
#[derive(Debug, Clone)]
pub struct RollingZScoreDetector {
    config: RollingZScoreConfig,
}

impl RollingZScoreDetector {
    pub fn new(config: RollingZScoreConfig) -> Self {
        Self { config }
    }

    fn severity(&self, z: f64) -> Severity {
        if z.abs() > self.config.high_threshold {
            Severity::High
        } else {
            Severity::Medium
        }
    }
}

impl Detector for RollingZScoreDetector {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::RollingZscore
    }

    fn probe(&self) -> Result<(), DetectorUnavailable> {
        if !self.config.enabled {
            return Err(DetectorUnavailable::new(self.method(), "disabled in configuration"));
        }
        if self.config.window_size < 2 {
            return Err(DetectorUnavailable::new(
                self.method(),
                format!("window_size {} is too small", self.config.window_size),
            ));
        }
        Ok(())
    }

    fn detect(
        &self,
        series: &[TimeSeriesPoint],
        metric_name: &str,
    ) -> Result<Vec<AnomalyCandidate>, DetectorUnavailable> {
        let window = self.config.window_size;
        if series.len() < window {
            return Ok(Vec::new());
        }

        let values: Vec<f64> = series.iter().map(|p| p.value).collect();
        let mut found = Vec::new();

        for i in (window - 1)..values.len() {
            let sample = Sample::new(&values[i + 1 - window..=i]);
            let mean = sample.mean();
            let std = sample.sample_std_dev();
            if is_degenerate(std, mean) {
                continue;
            }

            let value = values[i];
            let z = (value - mean) / std;
            if z.abs() <= self.config.threshold {
                continue;
            }

            found.push(AnomalyCandidate {
                timestamp: series[i].date,
                metric_name: metric_name.to_string(),
                metric_value: value,
                expected_range: (
                    mean - self.config.threshold * std,
                    mean + self.config.threshold * std,
                ),
                severity: self.severity(z),
                detection_method: self.method(),
                confidence: z.abs(),
                notes: format!(
                    "Rolling z-score {:.2} over {} days (mean {:.2}, std {:.2})",
                    z, window, mean, std
                ),
            });
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn series(values: &[f64]) -> Vec<TimeSeriesPoint> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        start
            .iter_days()
            .zip(values)
            .map(|(date, &value)| TimeSeriesPoint { date, value })
            .collect()
    }

    fn detector() -> RollingZScoreDetector {
        RollingZScoreDetector::new(RollingZScoreConfig::default())
    }

    #[test]
    fn test_spike_after_full_window_is_flagged() {
        let mut values = vec![100.0; 40];
        values[35] = 10_000.0;
        let found = detector().detect(&series(&values), "sales_total").unwrap();

        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_eq!(c.timestamp, series(&values)[35].date);
        // 29 flat days plus the spike: z = 29 / sqrt(30)
        assert!((c.confidence - 29.0 / 30f64.sqrt()).abs() < 1e-6);
        assert_eq!(c.severity, Severity::High);
        assert_eq!(c.detection_method, DetectionMethod::RollingZscore);
        assert!(c.expected_range.0 < 430.0 && c.expected_range.1 > 430.0);
    }

    #[test]
    fn test_flat_window_is_skipped_without_error() {
        let values = vec![250.0; 45];
        let found = detector().detect(&series(&values), "sales_total").unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_nothing_emitted_before_window_fills() {
        let mut values = vec![100.0; 40];
        values[10] = 10_000.0;
        let found = detector().detect(&series(&values), "sales_total").unwrap();
        assert!(found.iter().all(|c| c.timestamp >= series(&values)[29].date));
    }

    #[test]
    fn test_short_series_yields_nothing() {
        let found = detector().detect(&series(&[1.0; 29]), "sales_total").unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_moderate_outlier_is_medium() {
        // Alternating noise gives sample std ~ 1.0; a 3.5-sigma point lands between thresholds
        let mut values: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { 99.0 } else { 101.0 }).collect();
        values[39] = 104.5;
        let found = detector().detect(&series(&values), "m").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Medium);
    }

    #[test]
    fn test_disabled_detector_reports_unavailable() {
        let cfg = RollingZScoreConfig {
            enabled: false,
            ..Default::default()
        };
        let err = RollingZScoreDetector::new(cfg).probe().unwrap_err();
        assert_eq!(err.method, DetectionMethod::RollingZscore);
    }
}
