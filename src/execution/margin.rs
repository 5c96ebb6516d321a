//! Margin arithmetic: unit cost in account currency and the derived bet sizes

use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::types::{AccountSnapshot, PriceSnapshot};

/// Account-currency value of one unit of the base currency of `instrument`
pub fn base_unit_value(
    instrument: &str,
    account_currency: &str,
    prices: &HashMap<String, PriceSnapshot>,
) -> EngineResult<f64> {
    let (base, quote) = instrument.split_once('_').ok_or_else(|| {
        EngineError::Configuration(format!("not a currency pair: {}", instrument))
    })?;
    let ask = |name: &str| {
        prices.get(name).map(|p| p.ask).ok_or_else(|| {
            EngineError::UpstreamApi(format!("no price for {}", name))
        })
    };

    if base == account_currency {
        return Ok(1.0);
    }
    if quote == account_currency {
        return ask(instrument);
    }
    // Cross through the pair linking the quote and account currencies
    let direct = format!("{}_{}", quote, account_currency);
    let inverse = format!("{}_{}", account_currency, quote);
    if prices.contains_key(&direct) {
        Ok(ask(instrument)? * ask(&direct)?)
    } else if prices.contains_key(&inverse) {
        Ok(ask(instrument)? / ask(&inverse)?)
    } else {
        Err(EngineError::UpstreamApi(format!(
            "no conversion from {} to {}",
            quote, account_currency
        )))
    }
}

/// Margin consumed by one unit
pub fn unit_cost(
    instrument: &str,
    margin_rate: f64,
    account_currency: &str,
    prices: &HashMap<String, PriceSnapshot>,
) -> EngineResult<f64> {
    Ok(base_unit_value(instrument, account_currency, prices)? * margin_rate)
}

/// `ceil(balance * ratio / unit_cost)`
pub fn units_for_ratio(balance: f64, ratio: f64, unit_cost: f64) -> u64 {
    if unit_cost <= 0.0 {
        return 0;
    }
    (balance * ratio / unit_cost).ceil().max(0.0) as u64
}

/// Units that fit in the margin left above the preserved fraction of balance
pub fn available_units(account: &AccountSnapshot, preserve: f64, unit_cost: f64) -> u64 {
    if unit_cost <= 0.0 {
        return 0;
    }
    ((account.margin_available - account.balance * preserve) / unit_cost)
        .ceil()
        .max(0.0) as u64
}

/// Position margin as a percentage of balance
pub fn exposure_pct(units: u64, unit_cost: f64, balance: f64) -> f64 {
    if balance <= 0.0 {
        return 0.0;
    }
    units as f64 * unit_cost * 100.0 / balance
}
