use crate::config::DetectionConfig;
use crate::detect::isolation::IsolationForestDetector;
use crate::detect::seasonal::SeasonalResidualDetector;
use crate::detect::zscore::RollingZScoreDetector;
use crate::detect::{AnomalyCandidate, DetectionMethod, DetectorUnavailable, TimeSeriesPoint};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Trait for every detector in the ensemble.
pub trait Detector: Send + Sync {
    fn method(&self) -> DetectionMethod;

    /// Check whether the detector's implementation is present and enabled.
    fn probe(&self) -> Result<(), DetectorUnavailable>;

    /// Scan a series and return the points this detector considers anomalous.
    fn detect(
        &self,
        series: &[TimeSeriesPoint],
        metric_name: &str,
    ) -> Result<Vec<AnomalyCandidate>, DetectorUnavailable>;
}

/// Outcome of running every available detector over one series.
#[derive(Debug, Default)]
pub struct EnsembleOutput {
    pub candidates: Vec<AnomalyCandidate>,
    pub methods_used: Vec<DetectionMethod>,
    pub skipped: Vec<DetectorUnavailable>,
}

/// The fixed set of detectors that were available when the registry was built.
#[derive(Clone)]
pub struct DetectorRegistry {
    detectors: Vec<Arc<dyn Detector>>,
    unavailable: Vec<DetectorUnavailable>,
}

impl std::fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorRegistry")
            .field("available", &self.available_methods())
            .field("unavailable", &self.unavailable)
            .finish()
    }
}

impl DetectorRegistry {
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::with_detectors(vec![
            Arc::new(IsolationForestDetector::new(config.isolation_forest.clone())),
            Arc::new(SeasonalResidualDetector::new(config.seasonal.clone())),
            Arc::new(RollingZScoreDetector::new(config.rolling_zscore.clone())),
        ])
    }

    /// Probe each detector once; unavailable ones are logged and left out.
    pub fn with_detectors(candidates: Vec<Arc<dyn Detector>>) -> Self {
        let mut detectors = Vec::new();
        let mut unavailable = Vec::new();

        for detector in candidates {
            match detector.probe() {
                Ok(()) => detectors.push(detector),
                Err(e) => {
                    warn!(method = %e.method, reason = %e.reason, "Detector unavailable, ensemble will run without it");
                    unavailable.push(e);
                }
            }
        }

        info!(
            available = ?detectors.iter().map(|d| d.method()).collect::<Vec<_>>(),
            "Detector registry initialized"
        );

        Self {
            detectors,
            unavailable,
        }
    }

    pub fn available_methods(&self) -> Vec<DetectionMethod> {
        self.detectors.iter().map(|d| d.method()).collect()
    }

    pub fn unavailable(&self) -> &[DetectorUnavailable] {
        &self.unavailable
    }

    /// Run every registered detector over the same series on the blocking pool.
    ///
    /// Detectors share nothing but the read-only series. A detector that
    /// reports itself unavailable or panics is skipped.
    pub async fn run(&self, series: Arc<Vec<TimeSeriesPoint>>, metric_name: &str) -> EnsembleOutput {
        let handles: Vec<_> = self
            .detectors
            .iter()
            .map(|detector| {
                let detector = Arc::clone(detector);
                let series = Arc::clone(&series);
                let metric = metric_name.to_string();
                let method = detector.method();
                let handle =
                    tokio::task::spawn_blocking(move || detector.detect(&series, &metric));
                (method, handle)
            })
            .collect();

        let mut output = EnsembleOutput::default();
        for (method, handle) in handles {
            match handle.await {
                Ok(Ok(found)) => {
                    debug!(metric = %metric_name, %method, count = found.len(), "Detector finished");
                    output.methods_used.push(method);
                    output.candidates.extend(found);
                }
                Ok(Err(unavailable)) => {
                    warn!(metric = %metric_name, %method, reason = %unavailable.reason, "Detector skipped");
                    output.skipped.push(unavailable);
                }
                Err(e) => {
                    warn!(metric = %metric_name, %method, "Detector task failed: {}", e);
                    output
                        .skipped
                        .push(DetectorUnavailable::new(method, format!("task failed: {}", e)));
                }
            }
        }
        output
    }
}
