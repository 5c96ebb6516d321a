//! Per-instrument decision state machine
//!
//! Guards are evaluated in a fixed priority order and the first match wins:
//! warm-up, halt, empty balance, missing margin, wide spread, then the signal.

use serde::Serialize;
use std::fmt;

use crate::model::signal::SignalAction;
use crate::types::{Position, Side};

/// Order action decided for this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Open on `side`, closing an opposite position first
    Open(Side),
    Close,
    None,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(side) => write!(f, "open {}", side.to_string().to_lowercase()),
            Self::Close => write!(f, "close"),
            Self::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DecisionState {
    Loading { pct: u32 },
    TradingHalted,
    NoFund,
    LackOfFunds,
    OverSpread,
    Closing,
    Opening { from: Option<Side>, to: Side },
    Holding { side: Side, exposure_pct: f64 },
    Idle,
}

impl fmt::Display for DecisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading { pct } => write!(f, "LOADING {:>3}%", pct),
            Self::TradingHalted => write!(f, "TRADING HALTED"),
            Self::NoFund => write!(f, "NO FUND"),
            Self::LackOfFunds => write!(f, "LACK OF FUNDS"),
            Self::OverSpread => write!(f, "OVER-SPREAD"),
            Self::Closing => write!(f, "CLOSING"),
            Self::Opening { from: None, to } => write!(f, "-> {}", to),
            Self::Opening { from: Some(from), to } => write!(f, "{} -> {}", from, to),
            Self::Holding { side, exposure_pct } => write!(f, "{:.1}% {}", exposure_pct, side),
            Self::Idle => write!(f, "-"),
        }
    }
}

/// Everything the state machine looks at for one instrument
#[derive(Debug, Clone)]
pub struct DecisionInput<'a> {
    pub warm: bool,
    pub load_pct: u32,
    pub halted: bool,
    pub balance: f64,
    pub margin_available: f64,
    /// `margin_nav_ratio.preserve`
    pub preserve_ratio: f64,
    pub spread_ratio: f64,
    pub max_spread: f64,
    pub position: Option<&'a Position>,
    /// Position has stayed on its side longer than the TTL
    pub expired: bool,
    /// Position value as a percentage of balance
    pub exposure_pct: f64,
    pub signal: SignalAction,
    /// Detector could not produce an estimate
    pub signal_loading: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub action: Action,
    pub state: DecisionState,
}

impl Decision {
    fn new(action: Action, state: DecisionState) -> Self {
        Self { action, state }
    }

    fn idle(state: DecisionState) -> Self {
        Self::new(Action::None, state)
    }
}

pub fn decide(input: &DecisionInput) -> Decision {
    if !input.warm || input.signal_loading {
        let pct = if input.warm { 100 } else { input.load_pct.min(99) };
        return Decision::idle(DecisionState::Loading { pct });
    }
    if input.halted {
        return Decision::idle(DecisionState::TradingHalted);
    }
    if input.balance == 0.0 {
        return Decision::idle(DecisionState::NoFund);
    }
    if input.position.is_none()
        && input.margin_available < input.balance * input.preserve_ratio
    {
        return Decision::idle(DecisionState::LackOfFunds);
    }
    if input.spread_ratio > input.max_spread {
        return Decision::idle(DecisionState::OverSpread);
    }

    let held = input.position.map(|p| p.side);
    if held.is_some() && (input.signal == SignalAction::Closing || input.expired) {
        return Decision::new(Action::Close, DecisionState::Closing);
    }

    let proposed = match input.signal {
        SignalAction::Long => Some(Side::Long),
        SignalAction::Short => Some(Side::Short),
        SignalAction::Closing | SignalAction::None => None,
    };
    match (proposed, held) {
        (Some(to), None) => Decision::new(Action::Open(to), DecisionState::Opening { from: None, to }),
        (Some(to), Some(from)) if from != to => Decision::new(
            Action::Open(to),
            DecisionState::Opening {
                from: Some(from),
                to,
            },
        ),
        (_, Some(side)) => Decision::idle(DecisionState::Holding {
            side,
            exposure_pct: input.exposure_pct,
        }),
        (None, None) => Decision::idle(DecisionState::Idle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(signal: SignalAction) -> DecisionInput<'static> {
        DecisionInput {
            warm: true,
            load_pct: 100,
            halted: false,
            balance: 10_000.0,
            margin_available: 9_000.0,
            preserve_ratio: 0.03,
            spread_ratio: 0.0001,
            max_spread: 0.001,
            position: None,
            expired: false,
            exposure_pct: 0.0,
            signal,
            signal_loading: false,
        }
    }

    fn long_position() -> Position {
        Position {
            instrument: "EUR_USD".to_string(),
            side: Side::Long,
            units: 1000,
        }
    }

    #[test]
    fn test_loading_before_everything() {
        let mut input = base(SignalAction::Long);
        input.warm = false;
        input.load_pct = 15;
        input.halted = true;
        let d = decide(&input);
        assert_eq!(d.action, Action::None);
        assert_eq!(d.state, DecisionState::Loading { pct: 15 });
        assert_eq!(d.state.to_string(), "LOADING  15%");
    }

    #[test]
    fn test_halted_overrides_signal() {
        let mut input = base(SignalAction::Short);
        input.halted = true;
        assert_eq!(decide(&input).state, DecisionState::TradingHalted);
    }

    #[test]
    fn test_zero_balance_is_no_fund() {
        let mut input = base(SignalAction::Long);
        input.balance = 0.0;
        input.margin_available = 0.0;
        assert_eq!(decide(&input).state.to_string(), "NO FUND");
    }

    #[test]
    fn test_lack_of_funds_precedes_over_spread() {
        let mut input = base(SignalAction::Long);
        input.margin_available = 100.0;
        input.spread_ratio = 0.002;
        let d = decide(&input);
        assert_eq!(d.state, DecisionState::LackOfFunds);
        assert_eq!(d.action, Action::None);
    }

    #[test]
    fn test_lack_of_funds_ignored_with_open_position() {
        let pos = long_position();
        let mut input = base(SignalAction::None);
        input.margin_available = 100.0;
        input.position = Some(&pos);
        input.exposure_pct = 2.54;
        let d = decide(&input);
        assert_eq!(d.state.to_string(), "2.5% LONG");
    }

    #[test]
    fn test_over_spread_blocks_any_signal() {
        for signal in [SignalAction::Long, SignalAction::Short, SignalAction::None] {
            let mut input = base(signal);
            input.spread_ratio = 0.002;
            let d = decide(&input);
            assert_eq!(d.state.to_string(), "OVER-SPREAD");
            assert_eq!(d.action, Action::None);
        }
    }

    #[test]
    fn test_open_and_reverse() {
        let d = decide(&base(SignalAction::Long));
        assert_eq!(d.action, Action::Open(Side::Long));
        assert_eq!(d.state.to_string(), "-> LONG");

        let pos = long_position();
        let mut input = base(SignalAction::Short);
        input.position = Some(&pos);
        let d = decide(&input);
        assert_eq!(d.action, Action::Open(Side::Short));
        assert_eq!(d.state.to_string(), "LONG -> SHORT");
    }

    #[test]
    fn test_closing_signal_and_expiry() {
        let pos = long_position();
        let mut input = base(SignalAction::Closing);
        input.position = Some(&pos);
        let d = decide(&input);
        assert_eq!(d.action, Action::Close);
        assert_eq!(d.state.to_string(), "CLOSING");

        let mut input = base(SignalAction::Long);
        input.position = Some(&pos);
        input.expired = true;
        assert_eq!(decide(&input).action, Action::Close);
    }

    #[test]
    fn test_hold_and_idle() {
        let pos = long_position();
        let mut input = base(SignalAction::Long);
        input.position = Some(&pos);
        input.exposure_pct = 12.0;
        let d = decide(&input);
        assert_eq!(d.action, Action::None);
        assert_eq!(d.state.to_string(), "12.0% LONG");

        let d = decide(&base(SignalAction::None));
        assert_eq!(d.state, DecisionState::Idle);
        assert_eq!(d.state.to_string(), "-");
    }
}
