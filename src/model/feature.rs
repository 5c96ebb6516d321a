//! Log-return feature series derived from a quote window
//!
//! The first sample of every series is NaN (a difference needs two points);
//! `FeatureSeries::values` drops it together with any other non-finite value,
//! and with exact zeros when `drop_zero` is set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;
use crate::types::Quote;

/// Scalar transform applied to a quote window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FeatureKind {
    /// ln(mid[t]) - ln(mid[t-1])
    LogReturn,
    /// Log return per elapsed second
    LogReturnVelocity,
    /// First difference of velocity per elapsed second
    LogReturnAcceleration,
}

impl FeatureKind {
    /// Short code used in status lines
    pub fn code(&self) -> &'static str {
        match self {
            Self::LogReturn => "LR",
            Self::LogReturnVelocity => "LRV",
            Self::LogReturnAcceleration => "LRA",
        }
    }
}

impl FromStr for FeatureKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lr" | "log return" | "log_return" => Ok(Self::LogReturn),
            "lrv" | "lr velocity" | "log_return_velocity" => Ok(Self::LogReturnVelocity),
            "lra" | "lr acceleration" | "log_return_acceleration" => {
                Ok(Self::LogReturnAcceleration)
            }
            _ => Err(EngineError::Configuration(format!(
                "invalid feature type: {}",
                s
            ))),
        }
    }
}

impl TryFrom<String> for FeatureKind {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FeatureKind> for String {
    fn from(value: FeatureKind) -> Self {
        match value {
            FeatureKind::LogReturn => "log return",
            FeatureKind::LogReturnVelocity => "lr velocity",
            FeatureKind::LogReturnAcceleration => "lr acceleration",
        }
        .to_string()
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One derived feature value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureSample {
    pub time: DateTime<Utc>,
    pub value: f64,
}

/// Converts a quote window into a return series
#[derive(Debug, Clone)]
pub struct FeatureSeries {
    kind: FeatureKind,
    spread_weighted: bool,
    drop_zero: bool,
}

impl FeatureSeries {
    pub fn new(kind: FeatureKind, spread_weighted: bool) -> Self {
        Self {
            kind,
            spread_weighted,
            drop_zero: false,
        }
    }

    /// Skip samples where the price did not move (repeated tick mids)
    pub fn with_drop_zero(mut self, drop_zero: bool) -> Self {
        self.drop_zero = drop_zero;
        self
    }

    pub fn kind(&self) -> FeatureKind {
        self.kind
    }

    /// Full series aligned with the window; leading samples are NaN
    pub fn series(&self, window: &[Quote]) -> Vec<FeatureSample> {
        let values = match self.kind {
            FeatureKind::LogReturn => self.log_return(window),
            FeatureKind::LogReturnVelocity => self.log_return_velocity(window),
            FeatureKind::LogReturnAcceleration => self.log_return_acceleration(window),
        };
        window
            .iter()
            .zip(values)
            .map(|(q, value)| FeatureSample {
                time: q.time,
                value,
            })
            .collect()
    }

    /// Finite values only, ready for the sieve and the detectors
    pub fn values(&self, window: &[Quote]) -> Vec<f64> {
        self.series(window)
            .into_iter()
            .map(|s| s.value)
            .filter(|v| v.is_finite() && !(self.drop_zero && *v == 0.0))
            .collect()
    }

    fn log_return(&self, window: &[Quote]) -> Vec<f64> {
        let weights = if self.spread_weighted {
            sample_weights(window)
        } else {
            vec![1.0; window.len()]
        };
        let mut out = Vec::with_capacity(window.len());
        for (i, q) in window.iter().enumerate() {
            if i == 0 {
                out.push(f64::NAN);
            } else {
                let diff = q.mid().ln() - window[i - 1].mid().ln();
                out.push(diff * weights[i]);
            }
        }
        out
    }

    fn log_return_velocity(&self, window: &[Quote]) -> Vec<f64> {
        let dt = elapsed_seconds(window);
        self.log_return(window)
            .into_iter()
            .zip(dt)
            .map(|(lr, dt)| lr / dt)
            .collect()
    }

    fn log_return_acceleration(&self, window: &[Quote]) -> Vec<f64> {
        let dt = elapsed_seconds(window);
        let lrv = self.log_return_velocity(window);
        (0..lrv.len())
            .map(|i| {
                if i == 0 {
                    f64::NAN
                } else {
                    (lrv[i] - lrv[i - 1]) / dt[i]
                }
            })
            .collect()
    }
}

/// Seconds since the previous quote (NaN for the first)
fn elapsed_seconds(window: &[Quote]) -> Vec<f64> {
    (0..window.len())
        .map(|i| {
            if i == 0 {
                f64::NAN
            } else {
                (window[i].time - window[i - 1].time).num_milliseconds() as f64 / 1000.0
            }
        })
        .collect()
}

/// Weight proportional to the inverse log spread and to the volume, each normalised by its mean.
/// A component that cannot be normalised (zero spread, zero volume) falls back to 1.
fn sample_weights(window: &[Quote]) -> Vec<f64> {
    let inv_spread: Vec<f64> = window
        .iter()
        .map(|q| 1.0 / (q.ask.ln() - q.bid.ln()))
        .collect();
    let spread_part = normalised(&inv_spread);
    let volumes: Vec<f64> = window.iter().map(|q| q.volume).collect();
    let volume_part = normalised(&volumes);
    spread_part
        .iter()
        .zip(volume_part.iter())
        .map(|(s, v)| s * v)
        .collect()
}

fn normalised(xs: &[f64]) -> Vec<f64> {
    if xs.is_empty() || xs.iter().any(|x| !x.is_finite() || *x <= 0.0) {
        return vec![1.0; xs.len()];
    }
    let mean = xs.iter().sum::<f64>() / xs.len() as f64;
    xs.iter().map(|x| x / mean).collect()
}
