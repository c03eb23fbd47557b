//! TOML configuration for metricwatch.
//!
//! Layered model: explicit path, then the `METRICWATCH_CONFIG` environment
//! variable, then `/etc/metricwatch/metricwatch.toml`, then compiled-in
//! defaults. Every section is optional.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const CONFIG_ENV_VAR: &str = "METRICWATCH_CONFIG";
const SYSTEM_CONFIG_PATH: &str = "/etc/metricwatch/metricwatch.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration. An explicit path must load; the fallbacks are
    /// best-effort and end at the defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "METRICWATCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Server / storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API listens on.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file holding metric records and alerts.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/metricwatch.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Distinct recorded days required before detection runs.
    pub min_distinct_days: usize,
    pub isolation_forest: IsolationForestConfig,
    pub seasonal: SeasonalConfig,
    pub rolling_zscore: RollingZScoreConfig,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_distinct_days: crate::detect::series::MIN_DISTINCT_DAYS,
            isolation_forest: IsolationForestConfig::default(),
            seasonal: SeasonalConfig::default(),
            rolling_zscore: RollingZScoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationForestConfig {
    pub enabled: bool,
    /// Expected share of outliers; sets the decision threshold.
    pub contamination: f64,
    pub n_estimators: usize,
    /// Fraction of features drawn per tree.
    pub max_features: f64,
    /// Subsample size per tree (capped at the series length).
    pub max_samples: usize,
    /// `|decision score|` above which a flagged point is `high` instead of `medium`.
    pub high_score_threshold: f64,
    pub seed: u64,
}

impl Default for IsolationForestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            contamination: 0.1,
            n_estimators: 100,
            max_features: 1.0,
            max_samples: 256,
            high_score_threshold: 0.5,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeasonalConfig {
    pub enabled: bool,
    /// Residuals beyond this many sigma are flagged.
    pub residual_sigma_threshold: f64,
    /// Residuals beyond this many sigma are `critical`.
    pub critical_sigma_threshold: f64,
    pub weekly_fourier_order: usize,
    pub yearly_fourier_order: usize,
    /// L2 penalty on the non-intercept coefficients.
    pub ridge_penalty: f64,
}

impl Default for SeasonalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            residual_sigma_threshold: 3.0,
            critical_sigma_threshold: 4.0,
            weekly_fourier_order: 3,
            yearly_fourier_order: 10,
            ridge_penalty: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingZScoreConfig {
    pub enabled: bool,
    pub window_size: usize,
    /// `|z|` above which a point is flagged.
    pub threshold: f64,
    /// `|z|` above which a flagged point is `high`.
    pub high_threshold: f64,
}

impl Default for RollingZScoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size: 30,
            threshold: 3.0,
            high_threshold: 4.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// What the dedup window is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowAnchor {
    /// Around the candidate's own date. Backfilled runs dedup against the
    /// alerts of the days they describe.
    Candidate,
    /// Trailing window ending at wall-clock submission time.
    Submission,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub dedup_window_hours: i64,
    pub window_anchor: WindowAnchor,
    /// Attempts at a busy database before a submit reports a conflict.
    pub busy_retries: u32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            dedup_window_hours: 24,
            window_anchor: WindowAnchor::Candidate,
            busy_retries: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.server.bind, "127.0.0.1:8080");
        assert_eq!(cfg.storage.db_path, PathBuf::from("data/metricwatch.db"));

        assert_eq!(cfg.detection.min_distinct_days, 10);
        assert_eq!(cfg.detection.isolation_forest.contamination, 0.1);
        assert_eq!(cfg.detection.isolation_forest.n_estimators, 100);
        assert_eq!(cfg.detection.isolation_forest.max_features, 1.0);
        assert_eq!(cfg.detection.seasonal.residual_sigma_threshold, 3.0);
        assert_eq!(cfg.detection.rolling_zscore.window_size, 30);
        assert_eq!(cfg.detection.rolling_zscore.threshold, 3.0);

        assert_eq!(cfg.alerts.dedup_window_hours, 24);
        assert_eq!(cfg.alerts.window_anchor, WindowAnchor::Candidate);
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[server]
bind = "0.0.0.0:9000"

[storage]
db_path = "/var/lib/metricwatch/alerts.db"

[detection]
min_distinct_days = 14

[detection.isolation_forest]
contamination = 0.05
n_estimators = 200
seed = 7

[detection.seasonal]
enabled = false

[detection.rolling_zscore]
window_size = 14
threshold = 2.5

[alerts]
window_anchor = "submission"

[logging]
level = "debug"
json = true
"#;

        let cfg: AppConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.server.bind, "0.0.0.0:9000");
        assert_eq!(cfg.storage.db_path, PathBuf::from("/var/lib/metricwatch/alerts.db"));
        assert_eq!(cfg.detection.min_distinct_days, 14);
        assert_eq!(cfg.detection.isolation_forest.contamination, 0.05);
        assert_eq!(cfg.detection.isolation_forest.n_estimators, 200);
        assert_eq!(cfg.detection.isolation_forest.seed, 7);
        // Unspecified fields in a present section keep their defaults
        assert_eq!(cfg.detection.isolation_forest.max_samples, 256);
        assert!(!cfg.detection.seasonal.enabled);
        assert_eq!(cfg.detection.rolling_zscore.window_size, 14);
        assert_eq!(cfg.detection.rolling_zscore.threshold, 2.5);
        assert_eq!(cfg.detection.rolling_zscore.high_threshold, 4.0);
        assert_eq!(cfg.alerts.window_anchor, WindowAnchor::Submission);
        assert_eq!(cfg.alerts.dedup_window_hours, 24);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        let defaults = AppConfig::default();

        assert_eq!(cfg.server.bind, defaults.server.bind);
        assert_eq!(
            cfg.detection.rolling_zscore.window_size,
            defaults.detection.rolling_zscore.window_size
        );
        assert_eq!(cfg.alerts.busy_retries, defaults.alerts.busy_retries);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("metricwatch.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "0.0.0.0:9999"
"#,
        )
        .unwrap();

        let cfg = AppConfig::resolve(Some(&path)).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:9999");
    }

    #[test]
    fn test_load_missing_explicit_file_errors() {
        let result = AppConfig::resolve(Some(Path::new("/nonexistent/path/metricwatch.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = AppConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let roundtripped: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(cfg.server.bind, roundtripped.server.bind);
        assert_eq!(
            cfg.detection.seasonal.yearly_fourier_order,
            roundtripped.detection.seasonal.yearly_fourier_order
        );
        assert_eq!(cfg.alerts.window_anchor, roundtripped.alerts.window_anchor);
    }
}
