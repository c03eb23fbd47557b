use crate::config::AppConfig;
use crate::detect::aggregate::aggregate;
use crate::detect::alert::{Alert, AlertError, AlertStore, DashboardSummary};
use crate::detect::ensemble::DetectorRegistry;
use crate::detect::series::TimeSeriesBuilder;
use crate::detect::{AlertStatus, DetectError, DetectionMethod};
use crate::storage::records::{SeriesProvider, SqliteSeriesProvider};
use crate::storage::Pool;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of one `run_detection` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionReport {
    pub metric_name: String,
    pub data_points: usize,
    pub anomalies_detected: usize,
    pub anomalies_saved: usize,
    pub methods_used: Vec<DetectionMethod>,
    pub anomalies: Vec<Alert>,
    /// Set when detection was skipped for the whole metric.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricFailure {
    pub metric_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub reports: Vec<DetectionReport>,
    pub failures: Vec<MetricFailure>,
}

/// Response of the alert actions. Failures are reported, never raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<Alert>,
    /// The target alert does not exist.
    #[serde(skip)]
    pub not_found: bool,
}

impl ActionOutcome {
    fn done(message: String, alert: Alert) -> Self {
        Self {
            success: true,
            message,
            error: None,
            alert: Some(alert),
            not_found: false,
        }
    }

    fn failed(message: String, error: impl ToString) -> Self {
        Self {
            success: false,
            message,
            error: Some(error.to_string()),
            alert: None,
            not_found: false,
        }
    }
}

/// Chains series building, the detector ensemble, aggregation and the alert
/// store, and exposes the alert actions used by dashboards and schedulers.
#[derive(Clone)]
pub struct DetectionEngine {
    provider: Arc<dyn SeriesProvider>,
    registry: DetectorRegistry,
    builder: TimeSeriesBuilder,
    alerts: AlertStore,
}

impl DetectionEngine {
    pub fn new(
        provider: Arc<dyn SeriesProvider>,
        registry: DetectorRegistry,
        builder: TimeSeriesBuilder,
        alerts: AlertStore,
    ) -> Self {
        Self {
            provider,
            registry,
            builder,
            alerts,
        }
    }

    /// Engine over the SQLite record table and alert table sharing `pool`.
    pub fn from_pool(pool: Pool, config: &AppConfig) -> Self {
        Self::new(
            Arc::new(SqliteSeriesProvider::new(pool.clone())),
            DetectorRegistry::from_config(&config.detection),
            TimeSeriesBuilder::new(config.detection.min_distinct_days),
            AlertStore::new(pool, config.alerts.clone()),
        )
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    pub async fn run_detection(&self, metric_name: &str, lookback_days: u32) -> Result<DetectionReport> {
        info!(metric = %metric_name, lookback_days, "Running anomaly detection");

        let provider = Arc::clone(&self.provider);
        let metric = metric_name.to_string();
        let records = tokio::task::spawn_blocking(move || provider.get_daily_series(&metric, lookback_days))
            .await?
            .with_context(|| format!("failed to load series for {}", metric_name))?;

        let series = match self.builder.build(&records, lookback_days) {
            Ok(series) => series,
            Err(DetectError::InsufficientData { needed, have }) => {
                info!(metric = %metric_name, needed, have, "Skipping detection, insufficient data");
                return Ok(DetectionReport {
                    metric_name: metric_name.to_string(),
                    data_points: have,
                    anomalies_detected: 0,
                    anomalies_saved: 0,
                    methods_used: Vec::new(),
                    anomalies: Vec::new(),
                    skipped_reason: Some(format!(
                        "insufficient data: need {} distinct days, have {}",
                        needed, have
                    )),
                });
            }
        };
        let data_points = series.len();

        let output = self.registry.run(Arc::new(series), metric_name).await;
        let candidates = aggregate(output.candidates);
        let anomalies_detected = candidates.len();

        let store = self.alerts.clone();
        let saved = tokio::task::spawn_blocking(move || -> Result<Vec<Alert>, AlertError> {
            let mut saved = Vec::new();
            for candidate in &candidates {
                if let Some(alert) = store.submit(candidate)? {
                    saved.push(alert);
                }
            }
            Ok(saved)
        })
        .await?
        .with_context(|| format!("failed to save alerts for {}", metric_name))?;

        info!(
            metric = %metric_name,
            data_points,
            detected = anomalies_detected,
            saved = saved.len(),
            methods = ?output.methods_used,
            "Detection finished"
        );

        Ok(DetectionReport {
            metric_name: metric_name.to_string(),
            data_points,
            anomalies_detected,
            anomalies_saved: saved.len(),
            methods_used: output.methods_used,
            anomalies: saved,
            skipped_reason: None,
        })
    }

    /// Run detection for every metric the provider knows about.
    pub async fn run_detection_all(&self, lookback_days: u32) -> Result<BatchReport> {
        let provider = Arc::clone(&self.provider);
        let metrics = tokio::task::spawn_blocking(move || provider.metric_names())
            .await?
            .context("failed to list metrics")?;

        let mut batch = BatchReport::default();
        for metric in metrics {
            match self.run_detection(&metric, lookback_days).await {
                Ok(report) => batch.reports.push(report),
                Err(e) => {
                    warn!(metric = %metric, "Detection failed: {:#}", e);
                    batch.failures.push(MetricFailure {
                        metric_name: metric,
                        error: format!("{:#}", e),
                    });
                }
            }
        }
        Ok(batch)
    }

    pub async fn list_alerts(
        &self,
        metric_name: Option<String>,
        status: Option<AlertStatus>,
        since_days: i64,
    ) -> Result<Vec<Alert>> {
        let store = self.alerts.clone();
        let alerts =
            tokio::task::spawn_blocking(move || store.query(metric_name.as_deref(), status, since_days)).await??;
        Ok(alerts)
    }

    pub async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>> {
        let store = self.alerts.clone();
        match tokio::task::spawn_blocking(move || store.get(id)).await? {
            Ok(alert) => Ok(Some(alert)),
            Err(AlertError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn acknowledge_alert(
        &self,
        id: Uuid,
        assigned_to: Option<String>,
        notes: Option<String>,
    ) -> ActionOutcome {
        let store = self.alerts.clone();
        let result =
            tokio::task::spawn_blocking(move || store.acknowledge(id, assigned_to.as_deref(), notes.as_deref())).await;
        action_outcome(id, "acknowledged", result)
    }

    pub async fn resolve_alert(&self, id: Uuid, resolution: String) -> ActionOutcome {
        let store = self.alerts.clone();
        let result = tokio::task::spawn_blocking(move || store.resolve(id, &resolution)).await;
        action_outcome(id, "resolved", result)
    }

    pub async fn get_dashboard_summary(&self, recent_days: i64) -> Result<DashboardSummary> {
        let store = self.alerts.clone();
        let summary = tokio::task::spawn_blocking(move || store.dashboard_summary(recent_days)).await??;
        Ok(summary)
    }
}

fn action_outcome(
    id: Uuid,
    verb: &str,
    result: Result<Result<Alert, AlertError>, tokio::task::JoinError>,
) -> ActionOutcome {
    match result {
        Ok(Ok(alert)) => ActionOutcome::done(format!("Alert {} {}", id, verb), alert),
        Ok(Err(e @ AlertError::NotFound(_))) => ActionOutcome {
            not_found: true,
            ..ActionOutcome::failed("Alert not found".to_string(), e)
        },
        Ok(Err(e)) => {
            warn!(alert_id = %id, "Alert action failed: {}", e);
            ActionOutcome::failed(format!("Alert {} could not be {}", id, verb), e)
        }
        Err(e) => {
            warn!(alert_id = %id, "Alert action task failed: {}", e);
            ActionOutcome::failed(format!("Alert {} could not be {}", id, verb), e)
        }
    }
}
