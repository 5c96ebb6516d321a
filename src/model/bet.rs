//! Streak-based position sizing
//!
//! Sizing is a pure function of the realized-P&L tail of the instrument's
//! transaction history; nothing is persisted between calls.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::EngineError;
use crate::types::Transaction;

/// Betting system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BetStrategy {
    Martingale,
    Paroli,
    DAlembert,
    ReverseDAlembert,
    Pyramid,
    OscarsGrind,
}

impl BetStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Martingale => "Martingale",
            Self::Paroli => "Paroli",
            Self::DAlembert => "d'Alembert",
            Self::ReverseDAlembert => "reverse d'Alembert",
            Self::Pyramid => "Pyramid",
            Self::OscarsGrind => "Oscar's grind",
        }
    }
}

impl FromStr for BetStrategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match key.as_str() {
            "martingale" => Ok(Self::Martingale),
            "paroli" => Ok(Self::Paroli),
            "dalembert" => Ok(Self::DAlembert),
            "reversedalembert" => Ok(Self::ReverseDAlembert),
            "pyramid" => Ok(Self::Pyramid),
            "oscarsgrind" => Ok(Self::OscarsGrind),
            _ => Err(EngineError::Configuration(format!(
                "invalid strategy name: {}",
                s
            ))),
        }
    }
}

impl TryFrom<String> for BetStrategy {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BetStrategy> for String {
    fn from(value: BetStrategy) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for BetStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of the most recent trades
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastOutcome {
    Won,
    Lost,
    /// A win that has not yet recovered the preceding losing streak
    Undetermined,
}

/// State derived from the realized-P&L tail
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetState {
    pub last_size: u64,
    pub outcome: LastOutcome,
    pub is_all_time_high: bool,
}

impl BetState {
    /// `None` when no transaction has realized P&L yet.
    /// `history` must be in chronological order and already filtered to one instrument.
    pub fn from_history(history: &[Transaction]) -> Option<Self> {
        let closed: Vec<&Transaction> = history.iter().filter(|t| t.realized_pl != 0.0).collect();
        let last = closed.last()?;
        let pl: Vec<f64> = closed.iter().map(|t| t.realized_pl).collect();

        let outcome = if last.realized_pl < 0.0 {
            LastOutcome::Lost
        } else {
            match pl.iter().rposition(|p| *p < 0.0) {
                None => LastOutcome::Won,
                Some(last_loss) => {
                    let streak_start = pl[..=last_loss]
                        .iter()
                        .rposition(|p| *p > 0.0)
                        .map_or(0, |i| i + 1);
                    if pl[streak_start..].iter().sum::<f64>() < 0.0 {
                        LastOutcome::Undetermined
                    } else {
                        LastOutcome::Won
                    }
                }
            }
        };

        let mut cum = 0.0;
        let mut peak = f64::NEG_INFINITY;
        for p in &pl {
            cum += p;
            peak = peak.max(cum);
        }

        Some(Self {
            last_size: last.units.unsigned_abs(),
            outcome,
            is_all_time_high: cum > 0.0 && cum >= peak,
        })
    }
}

/// Applies a `BetStrategy` to the transaction history
#[derive(Debug, Clone)]
pub struct BettingSizer {
    strategy: BetStrategy,
}

impl BettingSizer {
    pub fn new(strategy: BetStrategy) -> Self {
        Self { strategy }
    }

    /// Units for the next order
    pub fn size(&self, unit_size: u64, init_size: Option<u64>, history: &[Transaction]) -> u64 {
        let init = init_size.unwrap_or(unit_size);
        let Some(state) = BetState::from_history(history) else {
            return init;
        };
        debug!("bet state: {:?}", state);
        let (u, s) = (unit_size, state.last_size);

        if self.strategy == BetStrategy::OscarsGrind && state.is_all_time_high {
            return init;
        }
        let won = match state.outcome {
            LastOutcome::Won => true,
            LastOutcome::Lost => false,
            LastOutcome::Undetermined => return s,
        };

        match (self.strategy, won) {
            (BetStrategy::Martingale, true) => u,
            (BetStrategy::Martingale, false) => s * 2,
            (BetStrategy::Paroli, true) => s * 2,
            (BetStrategy::Paroli, false) => u,
            (BetStrategy::DAlembert, true) => u,
            (BetStrategy::DAlembert, false) => s + u,
            (BetStrategy::ReverseDAlembert, true) => s + u,
            (BetStrategy::ReverseDAlembert, false) => u,
            (BetStrategy::Pyramid, true) if s >= u => s - u,
            (BetStrategy::Pyramid, true) => s,
            (BetStrategy::Pyramid, false) => s + u,
            (BetStrategy::OscarsGrind, true) => s + u,
            (BetStrategy::OscarsGrind, false) => s,
        }
    }
}
