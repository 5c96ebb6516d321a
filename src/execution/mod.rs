//! Order execution: margin arithmetic, sizing and broker order placement

pub mod executor;
pub mod margin;

pub use executor::{ExecutionMode, MarketContext, OrderExecutor, OrderOutcome, OrderRecord};
