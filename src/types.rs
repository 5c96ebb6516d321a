//! Domain types shared by the decision engine, the broker client and the quote sources

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Position / order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// +1 for long, -1 for short
    pub fn sign(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// A bid/ask quote for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub instrument: String,
    pub time: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
    /// Traded volume behind the quote (1.0 for raw ticks)
    #[serde(default = "unit_volume")]
    pub volume: f64,
}

fn unit_volume() -> f64 {
    1.0
}

impl Quote {
    pub fn new(instrument: &str, time: DateTime<Utc>, bid: f64, ask: f64) -> Self {
        Self {
            instrument: instrument.to_string(),
            time,
            bid,
            ask,
            volume: 1.0,
        }
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    /// Spread relative to the mid price
    pub fn spread_ratio(&self) -> f64 {
        self.spread() / self.mid()
    }

    /// Price an order on `side` would fill at
    pub fn price_for(&self, side: Side) -> f64 {
        match side {
            Side::Long => self.ask,
            Side::Short => self.bid,
        }
    }
}

/// Bid/ask candle as returned by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub instrument: String,
    pub time: DateTime<Utc>,
    pub close_bid: f64,
    pub close_ask: f64,
    pub volume: f64,
    pub complete: bool,
}

impl Candle {
    pub fn to_quote(&self) -> Quote {
        Quote {
            instrument: self.instrument.clone(),
            time: self.time,
            bid: self.close_bid,
            ask: self.close_ask,
            volume: self.volume,
        }
    }
}

/// Time resolution of a quote series
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Granularity {
    Tick,
    Candle(String),
}

const CANDLE_CODES: &[&str] = &[
    "S5", "S10", "S15", "S30", "M1", "M2", "M4", "M5", "M10", "M15", "M30", "H1", "H2", "H3",
    "H4", "H6", "H8", "H12", "D", "W", "M",
];

impl Granularity {
    pub fn is_tick(&self) -> bool {
        matches!(self, Self::Tick)
    }

    /// Broker code (`TICK`, `S5`, `H1`, ...)
    pub fn code(&self) -> &str {
        match self {
            Self::Tick => "TICK",
            Self::Candle(code) => code,
        }
    }

    /// Fixed-width label for status lines: `TCK`, `05S`, `01H`, `01D`
    pub fn label(&self) -> String {
        match self {
            Self::Tick => "TCK".to_string(),
            Self::Candle(code) => {
                let (unit, count) = code.split_at(1);
                let count: u32 = count.parse().unwrap_or(1);
                format!("{:0>2}{}", count, unit)
            }
        }
    }
}

impl FromStr for Granularity {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_uppercase();
        if code == "TICK" {
            Ok(Self::Tick)
        } else if CANDLE_CODES.contains(&code.as_str()) {
            Ok(Self::Candle(code))
        } else {
            Err(EngineError::Configuration(format!(
                "invalid granularity: {}",
                s
            )))
        }
    }
}

impl TryFrom<String> for Granularity {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Granularity> for String {
    fn from(value: Granularity) -> Self {
        value.code().to_string()
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Snapshot of an open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    pub side: Side,
    pub units: u64,
}

/// Historical fill record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: u64,
    pub instrument: Option<String>,
    /// Signed fill units (negative for sells)
    pub units: i64,
    pub realized_pl: f64,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub kind: String,
}

/// Broker account snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: f64,
    pub margin_available: f64,
    pub margin_used: f64,
    pub currency: String,
    #[serde(default)]
    pub last_transaction_id: u64,
}

/// Static trading properties of an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub name: String,
    pub pip_size: f64,
    pub display_precision: u32,
    /// Trailing stop distance bounds in price units
    pub min_trailing_stop: f64,
    pub max_trailing_stop: f64,
    pub margin_rate: f64,
    pub max_order_units: f64,
    pub halted: bool,
}

impl InstrumentInfo {
    /// Split `EUR_USD` into (`EUR`, `USD`)
    pub fn currencies(&self) -> Option<(&str, &str)> {
        self.name.split_once('_')
    }
}

/// Current tradeable price of an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub instrument: String,
    pub time: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
    pub tradeable: bool,
}

impl PriceSnapshot {
    pub fn to_quote(&self) -> Quote {
        Quote::new(&self.instrument, self.time, self.bid, self.ask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_derived_fields() {
        let q = Quote::new("EUR_USD", Utc::now(), 1.1000, 1.1002);
        assert!((q.mid() - 1.1001).abs() < 1e-12);
        assert!((q.spread() - 0.0002).abs() < 1e-12);
        assert_eq!(q.price_for(Side::Long), 1.1002);
        assert_eq!(q.price_for(Side::Short), 1.1000);
    }

    #[test]
    fn test_granularity_parsing_and_labels() {
        assert_eq!("tick".parse::<Granularity>().unwrap(), Granularity::Tick);
        assert_eq!("S5".parse::<Granularity>().unwrap().label(), "05S");
        assert_eq!("m15".parse::<Granularity>().unwrap().label(), "15M");
        assert_eq!("D".parse::<Granularity>().unwrap().label(), "01D");
        assert_eq!(Granularity::Tick.label(), "TCK");
        assert!("X7".parse::<Granularity>().is_err());
    }

    #[test]
    fn test_granularity_serde_uses_codes() {
        let g: Vec<Granularity> = serde_yaml::from_str("[TICK, M1, H4]").unwrap();
        assert_eq!(g[0], Granularity::Tick);
        assert_eq!(g[2].code(), "H4");
        assert!(serde_yaml::from_str::<Vec<Granularity>>("[Y1]").is_err());
    }

    #[test]
    fn test_instrument_currencies() {
        let info = InstrumentInfo {
            name: "USD_JPY".to_string(),
            pip_size: 0.01,
            display_precision: 3,
            min_trailing_stop: 0.05,
            max_trailing_stop: 100.0,
            margin_rate: 0.04,
            max_order_units: 1e8,
            halted: false,
        };
        assert_eq!(info.currencies(), Some(("USD", "JPY")));
    }
}
