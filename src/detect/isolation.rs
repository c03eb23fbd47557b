//! Isolation forest over the standardized daily value.
//!
//! Outliers are isolated by fewer random splits than inliers. Each point gets
//! `s(x) = 2^(-E[h(x)] / c(psi))`; the `contamination` quantile of the
//! training scores becomes the decision threshold, so roughly that share of
//! the series is flagged.

use crate::config::IsolationForestConfig;
use crate::detect::ensemble::Detector;
use crate::detect::stats::{is_degenerate, Sample};
use crate::detect::{
    AnomalyCandidate, DetectionMethod, DetectorUnavailable, Severity, TimeSeriesPoint,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug)]
enum Node {
    Leaf { size: usize },
    Split { threshold: f64, left: Box<Node>, right: Box<Node> },
}

/// Expected path length of an unsuccessful search in a binary search tree of `n` items.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

fn grow(values: Vec<f64>, depth: usize, limit: usize, rng: &mut StdRng) -> Node {
    if depth >= limit || values.len() <= 1 {
        return Node::Leaf { size: values.len() };
    }
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if min >= max {
        return Node::Leaf { size: values.len() };
    }

    let threshold = rng.gen_range(min..max);
    let (left, right): (Vec<f64>, Vec<f64>) = values.into_iter().partition(|&v| v < threshold);
    Node::Split {
        threshold,
        left: Box::new(grow(left, depth + 1, limit, rng)),
        right: Box::new(grow(right, depth + 1, limit, rng)),
    }
}

fn path_length(node: &Node, x: f64, depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path_length(*size),
        Node::Split {
            threshold,
            left,
            right,
        } => {
            if x < *threshold {
                path_length(left, x, depth + 1)
            } else {
                path_length(right, x, depth + 1)
            }
        }
    }
}

/// A fitted forest of isolation trees over one feature.
#[derive(Debug)]
pub struct IsolationForest {
    trees: Vec<Node>,
    subsample: usize,
    offset: f64,
}

impl IsolationForest {
    pub fn fit(data: &[f64], n_estimators: usize, max_samples: usize, contamination: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let subsample = max_samples.min(data.len()).max(1);
        let limit = (subsample as f64).log2().ceil().max(1.0) as usize;

        let trees = (0..n_estimators)
            .map(|_| {
                let picked: Vec<f64> = rand::seq::index::sample(&mut rng, data.len(), subsample)
                    .into_iter()
                    .map(|i| data[i])
                    .collect();
                grow(picked, 0, limit, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            subsample,
            offset: 0.0,
        };
        let scores: Vec<f64> = data.iter().map(|&x| forest.score(x)).collect();
        forest.offset = Sample::new(&scores).percentile(100.0 * contamination);
        forest
    }

    /// Negated anomaly score: lower is more abnormal, in `[-1, 0]`.
    pub fn score(&self, x: f64) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let mean_depth =
            self.trees.iter().map(|t| path_length(t, x, 0)).sum::<f64>() / self.trees.len() as f64;
        let norm = average_path_length(self.subsample).max(f64::MIN_POSITIVE);
        -(2f64.powf(-mean_depth / norm))
    }

    /// Score shifted by the contamination threshold; negative means outlier.
    pub fn decision(&self, x: f64) -> f64 {
        self.score(x) - self.offset
    }
}

/// Ensemble member backed by [`IsolationForest`].
#[derive(Debug, Clone)]
pub struct IsolationForestDetector {
    config: IsolationForestConfig,
}

impl IsolationForestDetector {
    pub fn new(config: IsolationForestConfig) -> Self {
        Self { config }
    }
}

impl Detector for IsolationForestDetector {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::IsolationForest
    }

    fn probe(&self) -> Result<(), DetectorUnavailable> {
        if !cfg!(feature = "isolation-forest") {
            return Err(DetectorUnavailable::new(
                self.method(),
                "built without the `isolation-forest` feature",
            ));
        }
        if !self.config.enabled {
            return Err(DetectorUnavailable::new(self.method(), "disabled in configuration"));
        }
        let cfg = &self.config;
        if !(cfg.contamination > 0.0 && cfg.contamination <= 0.5)
            || cfg.n_estimators == 0
            || cfg.max_samples < 2
            || !(cfg.max_features > 0.0 && cfg.max_features <= 1.0)
        {
            return Err(DetectorUnavailable::new(self.method(), "invalid forest parameters"));
        }
        Ok(())
    }

    fn detect(
        &self,
        series: &[TimeSeriesPoint],
        metric_name: &str,
    ) -> Result<Vec<AnomalyCandidate>, DetectorUnavailable> {
        let values: Vec<f64> = series.iter().map(|p| p.value).collect();
        if values.len() < 2 {
            return Ok(Vec::new());
        }

        let sample = Sample::new(&values);
        let mean = sample.mean();
        let std = sample.std_dev();
        if is_degenerate(std, mean) {
            return Ok(Vec::new());
        }
        let scaled: Vec<f64> = values.iter().map(|v| (v - mean) / std).collect();

        let forest = IsolationForest::fit(
            &scaled,
            self.config.n_estimators,
            self.config.max_samples,
            self.config.contamination,
            self.config.seed,
        );
        let expected_range = (sample.percentile(5.0), sample.percentile(95.0));

        let found = series
            .iter()
            .zip(&scaled)
            .filter_map(|(point, &x)| {
                let decision = forest.decision(x);
                if decision >= 0.0 {
                    return None;
                }
                let severity = if decision.abs() > self.config.high_score_threshold {
                    Severity::High
                } else {
                    Severity::Medium
                };
                Some(AnomalyCandidate {
                    timestamp: point.date,
                    metric_name: metric_name.to_string(),
                    metric_value: point.value,
                    expected_range,
                    severity,
                    detection_method: self.method(),
                    confidence: decision.abs(),
                    notes: format!(
                        "Isolation forest decision score {:.3} (contamination {})",
                        decision, self.config.contamination
                    ),
                })
            })
            .collect();

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

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(256) is the classic normaliser, about 10.24
        assert!((average_path_length(256) - 10.24).abs() < 0.01);
    }

    #[test]
    fn test_spike_is_isolated() {
        let mut values = vec![100.0; 40];
        values[17] = 10_000.0;
        let s = series(&values);

        let found = IsolationForestDetector::new(IsolationForestConfig::default())
            .detect(&s, "sales_total")
            .unwrap();

        // Identical flat points score identically and sit exactly on the threshold
        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_eq!(c.timestamp, s[17].date);
        assert_eq!(c.metric_value, 10_000.0);
        assert!(c.confidence > 0.0);
        assert!(matches!(c.severity, Severity::Medium | Severity::High));
        assert_eq!(c.expected_range, (100.0, 100.0));
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let mut values: Vec<f64> = (0..60).map(|i| ((i * 37) % 17) as f64).collect();
        values[44] += 90.0;
        let s = series(&values);
        let detector = IsolationForestDetector::new(IsolationForestConfig::default());

        let a = detector.detect(&s, "m").unwrap();
        let b = detector.detect(&s, "m").unwrap();
        assert_eq!(a, b);
        assert!(a.iter().any(|c| c.timestamp == s[44].date));
    }

    #[test]
    fn test_constant_series_flags_nothing() {
        let found = IsolationForestDetector::new(IsolationForestConfig::default())
            .detect(&series(&[5.0; 30]), "m")
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_invalid_contamination_is_unavailable() {
        let cfg = IsolationForestConfig {
            contamination: 0.9,
            ..Default::default()
        };
        assert!(IsolationForestDetector::new(cfg).probe().is_err());
    }
}
