/// Summary statistics over a borrowed slice of observations.
#[derive(Debug, Clone, Copy)]
pub struct Sample<'a> {
    values: &'a [f64],
}

impl<'a> Sample<'a> {
    pub fn new(values: &'a [f64]) -> Self {
        Self { values }
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Population variance (divides by `n`).
    pub fn variance(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq_diff: f64 = self.values.iter().map(|&x| (x - mean).powi(2)).sum();
        sum_sq_diff / self.values.len() as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Sample standard deviation (divides by `n - 1`), as used for rolling windows.
    pub fn sample_std_dev(&self) -> f64 {
        let n = self.values.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq_diff: f64 = self.values.iter().map(|&x| (x - mean).powi(2)).sum();
        (sum_sq_diff / (n - 1) as f64).sqrt()
    }

    /// Percentile `q` in `[0, 100]` with linear interpolation between closest ranks.
    pub fn percentile(&self, q: f64) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mut sorted = self.values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        percentile_sorted(&sorted, q)
    }
}

/// Percentile of an already ascending-sorted slice.
fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (q.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Whether a spread is too small to divide by. Scaled to the magnitude of the
/// data so a window of identical non-integral values still counts as flat.
pub fn is_degenerate(std_dev: f64, scale: f64) -> bool {
    !std_dev.is_finite() || std_dev <= f64::EPSILON * scale.abs().max(1.0) * 16.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let s = Sample::new(&values);
        assert_eq!(s.mean(), 3.0);
        // Population variance of 1..5 is 2.0, sample variance 2.5
        assert!((s.variance() - 2.0).abs() < 1e-12);
        assert!((s.sample_std_dev() - 2.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [10.0, 20.0, 30.0, 40.0, 50.0];
        let s = Sample::new(&values);
        assert_eq!(s.percentile(0.0), 10.0);
        assert_eq!(s.percentile(50.0), 30.0);
        assert_eq!(s.percentile(100.0), 50.0);
        // rank 0.05 * 4 = 0.2 -> 10 + 0.2 * 10
        assert!((s.percentile(5.0) - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_edge_sizes() {
        assert_eq!(percentile_sorted(&[], 50.0), 0.0);
        assert_eq!(percentile_sorted(&[7.0], 99.0), 7.0);
        // Out-of-range quantiles clamp to the ends
        assert_eq!(percentile_sorted(&[1.0, 2.0, 3.0], 150.0), 3.0);
        assert_eq!(percentile_sorted(&[1.0, 2.0, 3.0], -10.0), 1.0);
        assert_eq!(Sample::new(&[]).percentile(50.0), 0.0);
    }

    #[test]
    fn test_degenerate_spread() {
        let values = [0.1; 30];
        let s = Sample::new(&values);
        assert!(is_degenerate(s.sample_std_dev(), s.mean()));
        assert!(!is_degenerate(1.0, 100.0));
        assert!(is_degenerate(f64::NAN, 1.0));
    }
}
