//! Brokerage API capability
//!
//! `BrokerClient` is everything the decision engine needs from the broker;
//! `OandaClient` implements it over the OANDA v20 REST API.

pub mod client;
#[cfg(test)]
pub mod mock;
pub mod models;

pub use client::OandaClient;

use serde::Serialize;
use std::collections::HashMap;

use crate::error::EngineResult;
use crate::types::{
    AccountSnapshot, Candle, Granularity, InstrumentInfo, Position, PriceSnapshot, Quote, Side,
    Transaction,
};

/// Protective limits attached to a market order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrderLimits {
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
    /// Distance in price units
    pub trailing_stop: Option<f64>,
    /// Worst acceptable fill price
    pub price_bound: Option<f64>,
}

/// Market order to place
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub instrument: String,
    pub side: Side,
    pub units: u64,
    pub limits: OrderLimits,
    /// Decimal places accepted for prices on this instrument
    pub precision: u32,
}

impl OrderRequest {
    /// Units signed by side, as the broker expects them
    pub fn signed_units(&self) -> i64 {
        match self.side {
            Side::Long => self.units as i64,
            Side::Short => -(self.units as i64),
        }
    }
}

/// Broker acknowledgement, kept verbatim for the order log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderResult {
    pub instrument: String,
    pub transaction_id: Option<u64>,
    pub response: serde_json::Value,
}

#[allow(async_fn_in_trait)]
pub trait BrokerClient {
    async fn get_account(&self) -> EngineResult<AccountSnapshot>;

    /// Every instrument tradeable on the account
    async fn get_instruments(&self) -> EngineResult<HashMap<String, InstrumentInfo>>;

    async fn get_prices(&self, instruments: &[String]) -> EngineResult<HashMap<String, PriceSnapshot>>;

    /// Open positions keyed by instrument
    async fn get_positions(&self) -> EngineResult<HashMap<String, Position>>;

    /// Transactions with id greater than `since_id`, oldest first
    async fn get_transaction_history(&self, since_id: u64) -> EngineResult<Vec<Transaction>>;

    async fn get_candles(
        &self,
        instrument: &str,
        granularity: &Granularity,
        count: usize,
    ) -> EngineResult<Vec<Candle>>;

    async fn get_latest_price(&self, instrument: &str) -> EngineResult<Quote>;

    async fn create_order(&self, request: &OrderRequest) -> EngineResult<OrderResult>;

    async fn close_position(&self, instrument: &str) -> EngineResult<OrderResult>;
}
