//! Scalar Kalman filter with variance-ratio likelihood fit

use statrs::distribution::{ContinuousCDF, Normal};
use tracing::debug;

use crate::config::KalmanConfig;
use crate::model::signal::Estimate;

/// Posterior after one observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanStep {
    pub y: f64,
    pub x: f64,
    pub v: f64,
}

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    pub x: f64,
    pub v: f64,
    /// Process variance
    pub q: f64,
    /// Measurement variance
    pub r: f64,
}

impl KalmanFilter {
    pub fn new(x0: f64, v0: f64, q: f64, r: f64) -> Self {
        Self { x: x0, v: v0, q, r }
    }

    pub fn update(&mut self, y: f64) -> KalmanStep {
        let v_prior = self.v + self.q;
        let k = v_prior / (v_prior + self.r);
        self.x += k * (y - self.x);
        self.v = (1.0 - k) * v_prior;
        KalmanStep {
            y,
            x: self.x,
            v: self.v,
        }
    }

    pub fn fit(&mut self, ys: &[f64]) -> Vec<KalmanStep> {
        ys.iter().map(|y| self.update(*y)).collect()
    }
}

/// Fits `r` (and `q = r * pmv_ratio`) by minimising the Gaussian negative log-likelihood
#[derive(Debug, Clone)]
pub struct KalmanOptimizer {
    pub x0: f64,
    pub v0: f64,
    pub pmv_ratio: f64,
}

const GOLDEN: f64 = 0.618_033_988_749_894_8;
/// Search range of ln(r)
const LN_R_RANGE: (f64, f64) = (-60.0, 10.0);

impl KalmanOptimizer {
    /// Loss over `a = ln r`
    pub fn loss(&self, a: f64, ys: &[f64]) -> f64 {
        let r = a.exp();
        let mut kf = KalmanFilter::new(self.x0, self.v0, r * self.pmv_ratio, r);
        kf.fit(ys)
            .iter()
            .map(|s| (s.v + r).ln() + (s.y - s.x).powi(2) / (s.v + r))
            .sum()
    }

    /// Returns `(q, r)`
    pub fn optimize(&self, ys: &[f64]) -> (f64, f64) {
        // Coarse scan locates the basin, golden-section search refines it
        let (lo, hi) = LN_R_RANGE;
        let mut best_a = lo;
        let mut best_loss = f64::INFINITY;
        let mut a = lo;
        while a <= hi {
            let l = self.loss(a, ys);
            if l < best_loss {
                best_loss = l;
                best_a = a;
            }
            a += 1.0;
        }
        let a = self.golden_section(best_a - 1.0, best_a + 1.0, ys);
        let r = a.exp();
        debug!("measurement variance: {:e}, process variance: {:e}", r, r * self.pmv_ratio);
        (r * self.pmv_ratio, r)
    }

    fn golden_section(&self, mut lo: f64, mut hi: f64, ys: &[f64]) -> f64 {
        let mut c = hi - GOLDEN * (hi - lo);
        let mut d = lo + GOLDEN * (hi - lo);
        let mut fc = self.loss(c, ys);
        let mut fd = self.loss(d, ys);
        for _ in 0..100 {
            if (hi - lo).abs() < 1e-8 {
                break;
            }
            if fc < fd {
                hi = d;
                d = c;
                fd = fc;
                c = hi - GOLDEN * (hi - lo);
                fc = self.loss(c, ys);
            } else {
                lo = c;
                c = d;
                fc = fd;
                d = lo + GOLDEN * (hi - lo);
                fd = self.loss(d, ys);
            }
        }
        (lo + hi) / 2.0
    }
}

#[derive(Debug, Clone)]
pub struct Kalman {
    optimizer: KalmanOptimizer,
    ci_level: f64,
    min_len: usize,
}

impl Kalman {
    pub fn new(config: &KalmanConfig) -> Self {
        Self {
            optimizer: KalmanOptimizer {
                x0: config.x0,
                v0: config.v0,
                pmv_ratio: config.pmv_ratio,
            },
            ci_level: config.ci_level,
            min_len: config.min_len.max(2),
        }
    }

    /// Refit on the whole window, then take the last posterior
    pub fn estimate(&self, series: &[f64]) -> Option<Estimate> {
        if series.len() < self.min_len {
            return None;
        }
        let (q, r) = self.optimizer.optimize(series);
        let mut kf = KalmanFilter::new(self.optimizer.x0, self.optimizer.v0, q, r);
        let last = *kf.fit(series).last()?;
        let scale = (last.v + q).sqrt();
        let normal = Normal::new(last.x, scale).ok()?;
        let tail = (1.0 - self.ci_level) / 2.0;
        Some(Estimate {
            mean: last.x,
            ci_lower: normal.inverse_cdf(tail),
            ci_upper: normal.inverse_cdf(1.0 - tail),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use rand_distr::{Distribution, Normal as Gaussian};

    fn kalman() -> Kalman {
        Kalman::new(&KalmanConfig::default())
    }

    #[test]
    fn test_filter_recursion() {
        let mut kf = KalmanFilter::new(0.0, 1.0, 0.5, 1.0);
        let step = kf.update(2.0);
        // v_prior = 1.5, k = 0.6
        assert!((step.x - 1.2).abs() < 1e-12);
        assert!((step.v - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_filter_converges_to_constant_level() {
        let mut kf = KalmanFilter::new(0.0, 1.0, 1e-6, 1e-2);
        let steps = kf.fit(&[3.0; 500]);
        assert!((steps.last().unwrap().x - 3.0).abs() < 1e-3);
    }

    #[test]
    fn test_optimizer_recovers_noise_scale() {
        let mut rng = StdRng::seed_from_u64(42);
        let noise = Gaussian::<f64>::new(0.0, 1e-3).unwrap();
        let ys: Vec<f64> = (0..400).map(|_| noise.sample(&mut rng)).collect();
        let opt = KalmanOptimizer {
            x0: 0.0,
            v0: 1e-8,
            pmv_ratio: 1e-3,
        };
        let (q, r) = opt.optimize(&ys);
        assert!((q / r - 1e-3).abs() < 1e-12);
        // Sample variance is 1e-6; the fit should land within an order of magnitude
        assert!(r > 1e-7 && r < 1e-5, "r = {:e}", r);
        let a = r.ln();
        assert!(opt.loss(a, &ys) <= opt.loss(a + 0.5, &ys));
        assert!(opt.loss(a, &ys) <= opt.loss(a - 0.5, &ys));
    }

    #[test]
    fn test_estimate_interval_brackets_mean() {
        let ys: Vec<f64> = (0..100).map(|i| 0.001 + if i % 2 == 0 { 1e-4 } else { -1e-4 }).collect();
        let est = kalman().estimate(&ys).unwrap();
        assert!(est.ci_lower < est.mean && est.mean < est.ci_upper);
        assert!(est.mean > 0.0);
    }

    #[test]
    fn test_short_series_is_loading() {
        assert!(kalman().estimate(&[0.001; 5]).is_none());
    }
}
