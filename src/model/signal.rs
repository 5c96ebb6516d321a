//! Signal detection: `SignalModel` dispatches to the EWMA or Kalman detector

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::config::ModelConfig;
use crate::error::EngineError;
use crate::model::ewma::Ewma;
use crate::model::kalman::Kalman;
use crate::model::sieve::SieveResult;
use crate::types::{Granularity, Position, Side};

/// Point estimate and interval produced by a detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub mean: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

/// Action proposed by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Long,
    Short,
    Closing,
    None,
}

impl SignalAction {
    pub fn from_side(side: Side) -> Self {
        match side {
            Side::Long => Self::Long,
            Side::Short => Self::Short,
        }
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
            Self::Closing => write!(f, "closing"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Detector output for one instrument and one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalResult {
    pub action: SignalAction,
    pub mean: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub granularity: Option<Granularity>,
    pub log_string: String,
}

impl SignalResult {
    /// No usable series yet
    pub fn loading(granularity: Option<Granularity>) -> Self {
        Self {
            action: SignalAction::None,
            mean: f64::NAN,
            ci_lower: f64::NAN,
            ci_upper: f64::NAN,
            granularity,
            log_string: String::new(),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.mean.is_nan()
    }
}

/// Detector selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Ewma,
    Kalman,
}

impl FromStr for ModelKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ewma" => Ok(Self::Ewma),
            "kalman" => Ok(Self::Kalman),
            _ => Err(EngineError::Configuration(format!("invalid model name: {}", s))),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ewma => write!(f, "ewma"),
            Self::Kalman => write!(f, "kalman"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SignalModel {
    Ewma(Ewma),
    Kalman(Kalman),
}

impl SignalModel {
    pub fn from_config(kind: ModelKind, config: &ModelConfig) -> Self {
        match kind {
            ModelKind::Ewma => Self::Ewma(Ewma::new(&config.ewma)),
            ModelKind::Kalman => Self::Kalman(Kalman::new(&config.kalman)),
        }
    }

    pub fn estimate(&self, series: &[f64]) -> Option<Estimate> {
        match self {
            Self::Ewma(m) => m.estimate(series),
            Self::Kalman(m) => m.estimate(series),
        }
    }

    /// Turn the sieve's selected series into an action proposal.
    /// `feature_code` only labels the log string.
    pub fn detect(
        &self,
        selected: Option<&SieveResult>,
        position: Option<&Position>,
        contrarian: bool,
        feature_code: &str,
    ) -> SignalResult {
        let Some(selected) = selected else {
            return SignalResult::loading(None);
        };
        let granularity = selected.granularity.clone();
        let Some(est) = self.estimate(&selected.series) else {
            return SignalResult::loading(Some(granularity));
        };
        let action = propose_action(&est, position.map(|p| p.side), contrarian);
        let log_string = format!(
            "{:>3}({}):{:>10.2e} [{:>10.2e},{:>10.2e}]",
            feature_code,
            granularity.label(),
            est.mean,
            est.ci_lower,
            est.ci_upper
        );
        SignalResult {
            action,
            mean: est.mean,
            ci_lower: est.ci_lower,
            ci_upper: est.ci_upper,
            granularity: Some(granularity),
            log_string,
        }
    }
}

/// Interval above zero proposes long, below zero short (swapped when contrarian).
/// An open position whose side disagrees with the sign of the point estimate is closed.
pub fn propose_action(est: &Estimate, position: Option<Side>, contrarian: bool) -> SignalAction {
    let orient = |side: Side| if contrarian { side.opposite() } else { side };
    let lean = if est.mean > 0.0 {
        Some(orient(Side::Long))
    } else if est.mean < 0.0 {
        Some(orient(Side::Short))
    } else {
        None
    };
    if let (Some(held), Some(lean)) = (position, lean) {
        if held != lean {
            return SignalAction::Closing;
        }
    }
    if est.ci_lower > 0.0 {
        SignalAction::from_side(orient(Side::Long))
    } else if est.ci_upper < 0.0 {
        SignalAction::from_side(orient(Side::Short))
    } else {
        SignalAction::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EwmaConfig;

    fn est(mean: f64, lo: f64, hi: f64) -> Estimate {
        Estimate {
            mean,
            ci_lower: lo,
            ci_upper: hi,
        }
    }

    #[test]
    fn test_interval_above_zero_is_long() {
        let e = est(0.002, 0.0005, 0.0035);
        assert_eq!(propose_action(&e, None, false), SignalAction::Long);
        assert_eq!(propose_action(&e, None, true), SignalAction::Short);
        assert_eq!(propose_action(&e, Some(Side::Long), false), SignalAction::Long);
    }

    #[test]
    fn test_straddling_interval_is_none() {
        let e = est(0.0001, -0.001, 0.0012);
        assert_eq!(propose_action(&e, None, false), SignalAction::None);
        assert_eq!(propose_action(&e, Some(Side::Long), false), SignalAction::None);
    }

    #[test]
    fn test_flip_against_open_position_is_closing() {
        let below = est(-0.002, -0.0035, -0.0005);
        assert_eq!(propose_action(&below, Some(Side::Long), false), SignalAction::Closing);
        // Point estimate flipped even though the interval still straddles zero
        let weak = est(-0.0001, -0.001, 0.0008);
        assert_eq!(propose_action(&weak, Some(Side::Long), false), SignalAction::Closing);
        // Contrarian holds a short on a rising estimate
        let above = est(0.002, 0.0005, 0.0035);
        assert_eq!(propose_action(&above, Some(Side::Short), true), SignalAction::Short);
        assert_eq!(propose_action(&above, Some(Side::Long), true), SignalAction::Closing);
    }

    #[test]
    fn test_detect_without_series_is_loading() {
        let model = SignalModel::Ewma(Ewma::new(&EwmaConfig::default()));
        let r = model.detect(None, None, false, "LR");
        assert!(r.is_loading());
        assert_eq!(r.action, SignalAction::None);

        let short = SieveResult {
            granularity: Granularity::Tick,
            series: vec![0.001; 3],
            score: None,
        };
        let r = model.detect(Some(&short), None, false, "LR");
        assert!(r.is_loading());
        assert_eq!(r.granularity, Some(Granularity::Tick));
    }

    #[test]
    fn test_detect_formats_log_string() {
        let model = SignalModel::from_config(ModelKind::Ewma, &ModelConfig::default());
        let series: Vec<f64> = (0..100).map(|i| 0.002 + if i % 2 == 0 { 1e-4 } else { -1e-4 }).collect();
        let selected = SieveResult {
            granularity: "S5".parse().unwrap(),
            series,
            score: Some(0.3),
        };
        let r = model.detect(Some(&selected), None, false, "LR");
        assert_eq!(r.action, SignalAction::Long);
        assert!(r.log_string.contains("LR(05S)"), "{}", r.log_string);
    }

    fn drifting(mean: f64) -> SieveResult {
        SieveResult {
            granularity: Granularity::Tick,
            series: (0..100).map(|i| mean + if i % 2 == 0 { 1e-4 } else { -1e-4 }).collect(),
            score: None,
        }
    }

    #[test]
    fn test_kalman_detect_follows_drift() {
        let model = SignalModel::from_config(ModelKind::Kalman, &ModelConfig::default());
        let up = model.detect(Some(&drifting(0.002)), None, false, "LR");
        assert_eq!(up.action, SignalAction::Long);
        assert!(up.ci_lower > 0.0 && up.ci_lower < up.mean && up.mean < up.ci_upper);
        assert!(up.log_string.contains("LR(TCK)"), "{}", up.log_string);

        let down = model.detect(Some(&drifting(-0.002)), None, false, "LR");
        assert_eq!(down.action, SignalAction::Short);
        assert!(down.ci_upper < 0.0);
    }

    #[test]
    fn test_contrarian_detect_inverts_both_models() {
        let held_long = Position {
            instrument: "EUR_USD".to_string(),
            side: Side::Long,
            units: 100,
        };
        for kind in [ModelKind::Ewma, ModelKind::Kalman] {
            let model = SignalModel::from_config(kind, &ModelConfig::default());
            let up = drifting(0.002);
            assert_eq!(model.detect(Some(&up), None, true, "LR").action, SignalAction::Short, "{}", kind);
            assert_eq!(
                model.detect(Some(&drifting(-0.002)), None, true, "LR").action,
                SignalAction::Long,
                "{}",
                kind
            );
            assert_eq!(
                model.detect(Some(&up), Some(&held_long), true, "LR").action,
                SignalAction::Closing,
                "{}",
                kind
            );
        }
    }

    #[test]
    fn test_model_kind_parsing() {
        assert_eq!("Kalman".parse::<ModelKind>().unwrap(), ModelKind::Kalman);
        assert!("arima".parse::<ModelKind>().is_err());
    }
}
