//! Exponentially-weighted mean / variance detector

use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::config::EwmaConfig;
use crate::model::signal::Estimate;

/// Exponentially-weighted moments of a series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EwmMoments {
    pub mean: f64,
    pub std: f64,
    /// Kish effective sample size, (sum w)^2 / sum w^2
    pub n_eff: f64,
}

/// Weights `(1 - alpha)^(n-1-i)`, newest sample weighted 1.
/// Variance carries the unbiased-weights correction.
pub fn ewm_moments(series: &[f64], alpha: f64) -> Option<EwmMoments> {
    if series.len() < 2 {
        return None;
    }
    let decay = 1.0 - alpha;
    let n = series.len();
    let mut w_sum = 0.0;
    let mut w2_sum = 0.0;
    let mut wx_sum = 0.0;
    let mut w = 1.0;
    for x in series.iter().rev() {
        w_sum += w;
        w2_sum += w * w;
        wx_sum += w * x;
        w *= decay;
    }
    let mean = wx_sum / w_sum;

    let ss: f64 = series
        .iter()
        .enumerate()
        .map(|(i, x)| decay.powi((n - 1 - i) as i32) * (x - mean).powi(2))
        .sum();
    let denom = w_sum - w2_sum / w_sum;
    if denom <= 0.0 {
        return None;
    }
    Some(EwmMoments {
        mean,
        std: (ss / denom).sqrt(),
        n_eff: w_sum * w_sum / w2_sum,
    })
}

/// Student-t interval around the weighted mean with `n_eff - 1` degrees of freedom
pub fn t_interval(moments: &EwmMoments, level: f64) -> Option<(f64, f64)> {
    let df = moments.n_eff - 1.0;
    if df <= 0.0 {
        return None;
    }
    let t = StudentsT::new(0.0, 1.0, df).ok()?;
    let half = t.inverse_cdf((1.0 + level) / 2.0) * moments.std / moments.n_eff.sqrt();
    Some((moments.mean - half, moments.mean + half))
}

#[derive(Debug, Clone)]
pub struct Ewma {
    alpha: f64,
    ci_level: Option<f64>,
    min_len: usize,
}

impl Ewma {
    pub fn new(config: &EwmaConfig) -> Self {
        Self {
            alpha: config.alpha,
            ci_level: config.ci_level,
            min_len: config.min_len.max(2),
        }
    }

    /// `None` while the series is too short for the interval math
    pub fn estimate(&self, series: &[f64]) -> Option<Estimate> {
        if series.len() < self.min_len {
            return None;
        }
        // Guard against an alpha of exactly 1 (all weight on the last sample)
        let alpha = self.alpha.min(1.0 - 1e-12);
        let moments = ewm_moments(series, alpha)?;
        let (ci_lower, ci_upper) = match self.ci_level {
            Some(level) => t_interval(&moments, level)?,
            None => (moments.mean, moments.mean),
        };
        Some(Estimate {
            mean: moments.mean,
            ci_lower,
            ci_upper,
        })
    }
}
