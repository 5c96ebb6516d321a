//! In-memory broker for unit tests

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{TimeZone, Utc};

use super::{BrokerClient, OrderRequest, OrderResult};
use crate::error::{EngineError, EngineResult};
use crate::types::{
    AccountSnapshot, Candle, Granularity, InstrumentInfo, Position, PriceSnapshot, Quote, Side,
    Transaction,
};

pub struct MockBroker {
    pub account: Mutex<AccountSnapshot>,
    pub instruments: HashMap<String, InstrumentInfo>,
    pub prices: Mutex<HashMap<String, PriceSnapshot>>,
    pub positions: Mutex<HashMap<String, Position>>,
    pub transactions: Mutex<Vec<Transaction>>,
    pub candles: HashMap<(String, String), Vec<Candle>>,
    pub reject_orders: bool,
    pub fail_api: bool,
    pub calls: Mutex<Vec<String>>,
}

pub fn instrument(name: &str) -> InstrumentInfo {
    InstrumentInfo {
        name: name.to_string(),
        pip_size: 0.0001,
        display_precision: 5,
        min_trailing_stop: 0.0005,
        max_trailing_stop: 1.0,
        margin_rate: 0.02,
        max_order_units: 100_000_000.0,
        halted: false,
    }
}

pub fn price(name: &str, bid: f64, ask: f64) -> PriceSnapshot {
    PriceSnapshot {
        instrument: name.to_string(),
        time: Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap(),
        bid,
        ask,
        tradeable: true,
    }
}

impl MockBroker {
    /// USD account holding 10k with EUR_USD at 1.1000/1.1002
    pub fn new() -> Self {
        let mut instruments = HashMap::new();
        instruments.insert("EUR_USD".to_string(), instrument("EUR_USD"));
        let mut prices = HashMap::new();
        prices.insert("EUR_USD".to_string(), price("EUR_USD", 1.1000, 1.1002));
        Self {
            account: Mutex::new(AccountSnapshot {
                balance: 10_000.0,
                margin_available: 10_000.0,
                margin_used: 0.0,
                currency: "USD".to_string(),
                last_transaction_id: 0,
            }),
            instruments,
            prices: Mutex::new(prices),
            positions: Mutex::new(HashMap::new()),
            transactions: Mutex::new(Vec::new()),
            candles: HashMap::new(),
            reject_orders: false,
            fail_api: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_api(&self) -> EngineResult<()> {
        if self.fail_api {
            return Err(EngineError::UpstreamApi("connection reset".to_string()));
        }
        Ok(())
    }
}

impl BrokerClient for MockBroker {
    async fn get_account(&self) -> EngineResult<AccountSnapshot> {
        self.check_api()?;
        Ok(self.account.lock().unwrap().clone())
    }

    async fn get_instruments(&self) -> EngineResult<HashMap<String, InstrumentInfo>> {
        self.check_api()?;
        Ok(self.instruments.clone())
    }

    async fn get_prices(&self, instruments: &[String]) -> EngineResult<HashMap<String, PriceSnapshot>> {
        self.check_api()?;
        let prices = self.prices.lock().unwrap();
        Ok(instruments
            .iter()
            .filter_map(|i| prices.get(i).map(|p| (i.clone(), p.clone())))
            .collect())
    }

    async fn get_positions(&self) -> EngineResult<HashMap<String, Position>> {
        self.check_api()?;
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn get_transaction_history(&self, since_id: u64) -> EngineResult<Vec<Transaction>> {
        self.check_api()?;
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.id > since_id)
            .cloned()
            .collect())
    }

    async fn get_candles(
        &self,
        instrument: &str,
        granularity: &Granularity,
        count: usize,
    ) -> EngineResult<Vec<Candle>> {
        self.check_api()?;
        let all = self
            .candles
            .get(&(instrument.to_string(), granularity.code().to_string()))
            .cloned()
            .unwrap_or_default();
        let skip = all.len().saturating_sub(count);
        Ok(all.into_iter().skip(skip).collect())
    }

    async fn get_latest_price(&self, instrument: &str) -> EngineResult<Quote> {
        self.check_api()?;
        self.prices
            .lock()
            .unwrap()
            .get(instrument)
            .map(PriceSnapshot::to_quote)
            .ok_or_else(|| EngineError::UpstreamApi(format!("no price for {}", instrument)))
    }

    async fn create_order(&self, request: &OrderRequest) -> EngineResult<OrderResult> {
        self.record(format!(
            "create_order {} {} {}",
            request.instrument, request.side, request.units
        ));
        if self.reject_orders {
            return Err(EngineError::OrderPlacement("INSUFFICIENT_MARGIN".to_string()));
        }
        self.positions.lock().unwrap().insert(
            request.instrument.clone(),
            Position {
                instrument: request.instrument.clone(),
                side: request.side,
                units: request.units,
            },
        );
        Ok(OrderResult {
            instrument: request.instrument.clone(),
            transaction_id: None,
            response: serde_json::json!({ "orderFillTransaction": { "units": request.signed_units() } }),
        })
    }

    async fn close_position(&self, instrument: &str) -> EngineResult<OrderResult> {
        self.record(format!("close_position {}", instrument));
        if self.reject_orders {
            return Err(EngineError::OrderPlacement("POSITION_CLOSEOUT_FAILED".to_string()));
        }
        let removed = self.positions.lock().unwrap().remove(instrument);
        if removed.is_none() {
            return Err(EngineError::OrderPlacement(format!("no open position for {}", instrument)));
        }
        Ok(OrderResult {
            instrument: instrument.to_string(),
            transaction_id: None,
            response: serde_json::json!({ "closed": instrument }),
        })
    }
}

pub fn position(instrument: &str, side: Side, units: u64) -> Position {
    Position {
        instrument: instrument.to_string(),
        side,
        units,
    }
}
