//! Additive trend + seasonality model and residual-based flagging.
//!
//! The model is `y = a + b*t + weekly(d) + yearly(d)` where both seasonal
//! components are truncated Fourier series over the absolute day number, so
//! weekday phase is stable across runs. Coefficients come from ridge-regularised
//! least squares on the series scaled by its largest magnitude.

use crate::config::SeasonalConfig;
use crate::detect::ensemble::Detector;
use crate::detect::stats::{is_degenerate, Sample};
use crate::detect::{
    AnomalyCandidate, DetectionMethod, DetectorUnavailable, Severity, TimeSeriesPoint,
};
use chrono::Datelike;
use std::f64::consts::PI;
use tracing::warn;

const WEEK_DAYS: f64 = 7.0;
const YEAR_DAYS: f64 = 365.25;

#[derive(Debug, Clone)]
pub struct SeasonalResidualDetector {
    config: SeasonalConfig,
}

impl SeasonalResidualDetector {
    pub fn new(config: SeasonalConfig) -> Self {
        Self { config }
    }

    fn yearly_enabled(&self, series: &[TimeSeriesPoint]) -> bool {
        self.config.yearly_fourier_order > 0 && series.len() as f64 >= YEAR_DAYS.floor()
    }

    fn design_row(&self, point: &TimeSeriesPoint, t: f64, yearly: bool) -> Vec<f64> {
        let day = f64::from(point.date.num_days_from_ce());
        let mut row = vec![1.0, t];
        for k in 1..=self.config.weekly_fourier_order {
            let angle = 2.0 * PI * k as f64 * day / WEEK_DAYS;
            row.push(angle.sin());
            row.push(angle.cos());
        }
        if yearly {
            for k in 1..=self.config.yearly_fourier_order {
                let angle = 2.0 * PI * k as f64 * day / YEAR_DAYS;
                row.push(angle.sin());
                row.push(angle.cos());
            }
        }
        row
    }

    /// In-sample fitted values, or `None` if the normal equations are singular.
    fn fit(&self, series: &[TimeSeriesPoint]) -> Result<Option<Vec<f64>>, DetectorUnavailable> {
        let yearly = self.yearly_enabled(series);
        let span = (series.len().saturating_sub(1)).max(1) as f64;
        let rows: Vec<Vec<f64>> = series
            .iter()
            .enumerate()
            .map(|(i, p)| self.design_row(p, i as f64 / span, yearly))
            .collect();

        let params = rows.first().map_or(0, Vec::len);
        if series.len() <= params + 1 {
            return Err(DetectorUnavailable::new(
                self.method(),
                format!(
                    "{} points cannot identify a model with {} parameters",
                    series.len(),
                    params
                ),
            ));
        }

        let scale = series
            .iter()
            .map(|p| p.value.abs())
            .fold(0.0_f64, f64::max);
        if scale == 0.0 {
            return Ok(Some(vec![0.0; series.len()]));
        }
        let y: Vec<f64> = series.iter().map(|p| p.value / scale).collect();

        // Normal equations (X'X + lambda*D) beta = X'y, intercept unpenalised
        let penalty = self.config.ridge_penalty * series.len() as f64;
        let mut xtx = vec![vec![0.0; params]; params];
        let mut xty = vec![0.0; params];
        for (row, &target) in rows.iter().zip(&y) {
            for a in 0..params {
                xty[a] += row[a] * target;
                for b in 0..params {
                    xtx[a][b] += row[a] * row[b];
                }
            }
        }
        for (a, diag) in xtx.iter_mut().enumerate().skip(1) {
            diag[a] += penalty;
        }

        let Some(beta) = solve(xtx, xty) else {
            return Ok(None);
        };

        let fitted = rows
            .iter()
            .map(|row| row.iter().zip(&beta).map(|(x, b)| x * b).sum::<f64>() * scale)
            .collect();
        Ok(Some(fitted))
    }
}

/// Gaussian elimination with partial pivoting. `None` for a singular system.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

impl Detector for SeasonalResidualDetector {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::SeasonalResidual
    }

    fn probe(&self) -> Result<(), DetectorUnavailable> {
        if !cfg!(feature = "seasonal") {
            return Err(DetectorUnavailable::new(
                self.method(),
                "built without the `seasonal` feature",
            ));
        }
        if !self.config.enabled {
            return Err(DetectorUnavailable::new(self.method(), "disabled in configuration"));
        }
        Ok(())
    }

    fn detect(
        &self,
        series: &[TimeSeriesPoint],
        metric_name: &str,
    ) -> Result<Vec<AnomalyCandidate>, DetectorUnavailable> {
        let Some(fitted) = self.fit(series)? else {
            warn!(metric = %metric_name, "Seasonal model is singular, no residuals computed");
            return Ok(Vec::new());
        };

        let residuals: Vec<f64> = series
            .iter()
            .zip(&fitted)
            .map(|(p, f)| p.value - f)
            .collect();
        let sigma = Sample::new(&residuals).std_dev();
        let level = Sample::new(&fitted).mean();
        if is_degenerate(sigma, level) {
            return Ok(Vec::new());
        }

        let flag_at = self.config.residual_sigma_threshold;
        let critical_at = self.config.critical_sigma_threshold;

        let found = series
            .iter()
            .zip(fitted.iter().zip(&residuals))
            .filter(|(_, (_, r))| r.abs() > flag_at * sigma)
            .map(|(point, (&fit, &r))| {
                let sigmas = r.abs() / sigma;
                AnomalyCandidate {
                    timestamp: point.date,
                    metric_name: metric_name.to_string(),
                    metric_value: point.value,
                    expected_range: (fit - flag_at * sigma, fit + flag_at * sigma),
                    severity: if sigmas > critical_at {
                        Severity::Critical
                    } else {
                        Severity::High
                    },
                    detection_method: self.method(),
                    confidence: sigmas,
                    notes: format!(
                        "Residual {:.2} is {:.2} sigma from seasonal fit {:.2}",
                        r, sigmas, fit
                    ),
                }
            })
            .collect();

        Ok(found)
    }
}
