//! Granularity selection by Ljung-Box autocorrelation evidence

use statrs::distribution::{ChiSquared, ContinuousCDF};
use tracing::debug;

use crate::model::feature::FeatureSeries;
use crate::types::{Granularity, Quote};

/// Largest lag tested
const MAX_LAGS: usize = 40;

/// Winning granularity and its feature values
#[derive(Debug, Clone)]
pub struct SieveResult {
    pub granularity: Granularity,
    pub series: Vec<f64>,
    /// Mean weighted p-value; `None` when there was nothing to compare
    pub score: Option<f64>,
}

pub struct GranularitySieve {
    feature: FeatureSeries,
    weight_decay: f64,
}

impl GranularitySieve {
    pub fn new(feature: FeatureSeries, weight_decay: f64) -> Self {
        Self {
            feature,
            weight_decay,
        }
    }

    pub fn feature(&self) -> &FeatureSeries {
        &self.feature
    }

    /// Pick the candidate with the lowest Ljung-Box score.
    /// Candidates are scanned in order, so ties keep the earlier one.
    /// Returns `None` when every candidate series is empty.
    pub fn select(&self, history: &[(Granularity, Vec<Quote>)]) -> Option<SieveResult> {
        if let [(granularity, window)] = history {
            let series = self.feature.values(window);
            return (!series.is_empty()).then(|| SieveResult {
                granularity: granularity.clone(),
                series,
                score: None,
            });
        }

        let mut best: Option<SieveResult> = None;
        for (granularity, window) in history {
            let series = self.feature.values(window);
            if series.is_empty() {
                debug!("{}: empty feature series", granularity);
                continue;
            }
            let score = self.score(&series);
            debug!("{}: p-score {:.6}", granularity, score);
            let better = best
                .as_ref()
                .and_then(|b| b.score)
                .map_or(true, |s| score < s);
            if better {
                best = Some(SieveResult {
                    granularity: granularity.clone(),
                    series,
                    score: Some(score),
                });
            }
        }
        best
    }

    /// Mean of `p_k / (1 - decay)^(k-1)` over the tested lags
    fn score(&self, series: &[f64]) -> f64 {
        let pvalues = ljung_box_pvalues(series);
        if pvalues.is_empty() {
            return 1.0;
        }
        let keep = 1.0 - self.weight_decay;
        pvalues
            .iter()
            .enumerate()
            .map(|(k, p)| p / keep.powi(k as i32))
            .sum::<f64>()
            / pvalues.len() as f64
    }
}

/// Ljung-Box p-values for lags 1..=h, h = min(n/2 - 2, 40) (at least 1).
/// A constant series has no autocorrelation to measure and yields p = 1.
pub fn ljung_box_pvalues(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n < 3 {
        return Vec::new();
    }
    let lags = (n / 2).saturating_sub(2).clamp(1, MAX_LAGS).min(n - 1);
    let mean = x.iter().sum::<f64>() / n as f64;
    let dev: Vec<f64> = x.iter().map(|v| v - mean).collect();
    let denom: f64 = dev.iter().map(|d| d * d).sum();
    if denom <= 0.0 {
        return vec![1.0; lags];
    }

    let nf = n as f64;
    let mut q = 0.0;
    let mut out = Vec::with_capacity(lags);
    for k in 1..=lags {
        let r: f64 = (k..n).map(|t| dev[t] * dev[t - k]).sum::<f64>() / denom;
        q += r * r / (nf - k as f64);
        let stat = nf * (nf + 2.0) * q;
        let p = match ChiSquared::new(k as f64) {
            Ok(chi2) => 1.0 - chi2.cdf(stat),
            Err(_) => 1.0,
        };
        out.push(p);
    }
    out
}
