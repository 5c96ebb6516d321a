//! Trader configuration loaded from YAML

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::model::bet::BetStrategy;
use crate::model::feature::FeatureKind;
use crate::types::Granularity;

/// Broker environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Practice,
    Live,
}

impl Environment {
    pub fn rest_url(&self) -> &'static str {
        match self {
            Self::Practice => "https://api-fxpractice.oanda.com",
            Self::Live => "https://api-fxtrade.oanda.com",
        }
    }

    pub fn stream_url(&self) -> &'static str {
        match self {
            Self::Practice => "https://stream-fxpractice.oanda.com",
            Self::Live => "https://stream-fxtrade.oanda.com",
        }
    }
}

/// Broker credentials
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OandaConfig {
    pub environment: Environment,
    pub account_id: String,
    /// Falls back to `$OANDA_TOKEN` when empty
    pub access_token: String,
}

/// Position sizing as fractions of account balance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarginNavRatio {
    /// Unit bet size
    pub unit: f64,
    /// Initial bet size (falls back to `unit`)
    pub init: Option<f64>,
    /// Margin that must stay untouched
    pub preserve: f64,
}

impl Default for MarginNavRatio {
    fn default() -> Self {
        Self {
            unit: 0.01,
            init: None,
            preserve: 0.03,
        }
    }
}

/// Order limit prices as fractions of the fill price
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitPriceRatio {
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
    pub trailing_stop: Option<f64>,
    /// Worst fill price for buys, above the ask
    pub upper_bound: Option<f64>,
    /// Worst fill price for sells, below the bid
    pub lower_bound: Option<f64>,
    /// Maximum spread / mid ratio before the instrument is skipped
    pub max_spread: f64,
}

impl Default for LimitPriceRatio {
    fn default() -> Self {
        Self {
            take_profit: Some(0.01),
            stop_loss: Some(0.01),
            trailing_stop: Some(0.01),
            upper_bound: None,
            lower_bound: None,
            max_spread: 0.001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// Betting system name
    pub bet: BetStrategy,
    pub margin_nav_ratio: MarginNavRatio,
    pub limit_price_ratio: LimitPriceRatio,
    /// Seconds a position may stay on one side before it is closed
    pub ttl_sec: Option<u64>,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            bet: BetStrategy::Martingale,
            margin_nav_ratio: MarginNavRatio::default(),
            limit_price_ratio: LimitPriceRatio::default(),
            ttl_sec: Some(86_400),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    #[serde(rename = "type")]
    pub kind: FeatureKind,
    /// Candidate resolutions for the sieve; `TICK` means the rate cache itself
    pub granularities: Vec<Granularity>,
    /// Candles fetched per granularity
    pub cache_length: usize,
    /// Discount wide-spread / thin samples in the log return
    pub spread_weighted: bool,
    /// Drop zero feature values before the sieve and the detectors
    pub drop_zero: bool,
    /// Lag weight decay used when scoring Ljung-Box p-values
    pub weight_decay: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            kind: FeatureKind::LogReturn,
            granularities: vec![Granularity::Tick],
            cache_length: 1000,
            spread_weighted: false,
            drop_zero: false,
            weight_decay: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EwmaConfig {
    /// Decay factor in (0, 1]
    pub alpha: f64,
    /// Student-t interval level; `None` collapses the interval onto the mean
    pub ci_level: Option<f64>,
    /// Minimum feature samples before a signal is emitted
    pub min_len: usize,
}

impl Default for EwmaConfig {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            ci_level: Some(0.99),
            min_len: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    pub x0: f64,
    pub v0: f64,
    /// Process / measurement variance ratio
    pub pmv_ratio: f64,
    pub ci_level: f64,
    pub min_len: usize,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            x0: 0.0,
            v0: 1e-8,
            pmv_ratio: 1.0,
            ci_level: 0.99,
            min_len: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelConfig {
    pub ewma: EwmaConfig,
    pub kalman: KalmanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub min_len: usize,
    pub max_len: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_len: 20,
            max_len: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Per-instrument bound of the shared quote queue
    pub max_len: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_len: 1000 }
    }
}

/// Complete trader configuration (`fract.yml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraderConfig {
    pub oanda: OandaConfig,
    pub instruments: Vec<String>,
    pub position: PositionConfig,
    pub feature: FeatureConfig,
    pub model: ModelConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    /// Minimum spacing of broker state refreshes within a cycle (ms)
    pub pacing_ms: u64,
}

impl Default for TraderConfig {
    fn default() -> Self {
        Self {
            oanda: OandaConfig::default(),
            instruments: vec!["EUR_USD".to_string(), "USD_JPY".to_string()],
            position: PositionConfig::default(),
            feature: FeatureConfig::default(),
            model: ModelConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            pacing_ms: 500,
        }
    }
}

const TEMPLATE_HEADER: &str = "\
# fract configuration
# position.bet: Martingale | Paroli | d'Alembert | reverse d'Alembert | Pyramid | Oscar's grind
# feature.type: log return | lr velocity | lr acceleration
# feature.granularities: TICK and/or candle codes (S5, M1, H1, D, ...)
";

impl TraderConfig {
    /// Resolve the config path: explicit path, then `$FRACT_YML`, then `./fract.yml`
    pub fn resolve_path(path: Option<&Path>) -> PathBuf {
        path.map(Path::to_path_buf)
            .or_else(|| std::env::var("FRACT_YML").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("fract.yml"))
    }

    /// Read and validate a YAML config
    pub fn load(path: &Path) -> EngineResult<Self> {
        debug!("Reading config: {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> EngineResult<Self> {
        let mut config: Self = serde_yaml::from_str(text)
            .map_err(|e| EngineError::Configuration(e.to_string()))?;
        if config.oanda.access_token.is_empty() {
            if let Ok(token) = std::env::var("OANDA_TOKEN") {
                config.oanda.access_token = token;
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Write a default template; refuses to overwrite
    pub fn write_template(path: &Path) -> EngineResult<bool> {
        if path.exists() {
            info!("A file already exists: {}", path.display());
            return Ok(false);
        }
        let body = serde_yaml::to_string(&Self::default())?;
        std::fs::write(path, format!("{}{}", TEMPLATE_HEADER, body))?;
        info!("A YAML template was generated: {}", path.display());
        Ok(true)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let bad = |msg: String| Err(EngineError::Configuration(msg));

        if self.instruments.is_empty() {
            return bad("no instruments configured".to_string());
        }
        if self.cache.min_len == 0 || self.cache.min_len > self.cache.max_len {
            return bad(format!(
                "cache.min_len ({}) must be in 1..=cache.max_len ({})",
                self.cache.min_len, self.cache.max_len
            ));
        }
        if self.feature.granularities.is_empty() {
            return bad("feature.granularities is empty".to_string());
        }
        if !(0.0..1.0).contains(&self.feature.weight_decay) {
            return bad(format!(
                "feature.weight_decay must be in [0, 1): {}",
                self.feature.weight_decay
            ));
        }

        let ewma = &self.model.ewma;
        if !(ewma.alpha > 0.0 && ewma.alpha <= 1.0) {
            return bad(format!("model.ewma.alpha must be in (0, 1]: {}", ewma.alpha));
        }
        for level in ewma.ci_level.iter().chain([self.model.kalman.ci_level].iter()) {
            if !(*level > 0.0 && *level < 1.0) {
                return bad(format!("ci_level must be in (0, 1): {}", level));
            }
        }
        if self.model.kalman.pmv_ratio <= 0.0 {
            return bad(format!(
                "model.kalman.pmv_ratio must be positive: {}",
                self.model.kalman.pmv_ratio
            ));
        }

        let mnr = &self.position.margin_nav_ratio;
        for (name, ratio) in [("unit", Some(mnr.unit)), ("init", mnr.init), ("preserve", Some(mnr.preserve))] {
            if let Some(r) = ratio {
                if !(0.0..=1.0).contains(&r) {
                    return bad(format!("margin_nav_ratio.{} must be in [0, 1]: {}", name, r));
                }
            }
        }
        if mnr.unit <= 0.0 {
            return bad("margin_nav_ratio.unit must be positive".to_string());
        }

        let lpr = &self.position.limit_price_ratio;
        if lpr.max_spread <= 0.0 {
            return bad(format!("limit_price_ratio.max_spread must be positive: {}", lpr.max_spread));
        }
        for (name, ratio) in [
            ("take_profit", lpr.take_profit),
            ("stop_loss", lpr.stop_loss),
            ("trailing_stop", lpr.trailing_stop),
            ("upper_bound", lpr.upper_bound),
            ("lower_bound", lpr.lower_bound),
        ] {
            if let Some(r) = ratio {
                if !(r > 0.0 && r <= 1.0) {
                    return bad(format!("limit_price_ratio.{} must be in (0, 1]: {}", name, r));
                }
            }
        }

        Ok(())
    }

    /// Sub-tree written to `parameter.yml` in the log directory
    pub fn parameter_dump(&self) -> EngineResult<String> {
        #[derive(Serialize)]
        struct Parameters<'a> {
            instrument: &'a [String],
            position: &'a PositionConfig,
            feature: &'a FeatureConfig,
            model: &'a ModelConfig,
        }
        Ok(serde_yaml::to_string(&Parameters {
            instrument: &self.instruments,
            position: &self.position,
            feature: &self.feature,
            model: &self.model,
        })?)
    }
}
