//! OANDA v20 REST Data Models
//!
//! Request and response bodies of the v20 endpoints used by the trader. The API
//! encodes decimals as strings; `decimal` accepts both strings and numbers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{
    AccountSnapshot, Candle, InstrumentInfo, Position, PriceSnapshot, Side, Transaction,
};

/// Deserialize `"1.2345"` or `1.2345`
fn decimal<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }
    match Raw::deserialize(d)? {
        Raw::Num(v) => Ok(v),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn opt_decimal<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    struct Wrap(#[serde(deserialize_with = "decimal")] f64);
    Ok(Option::<Wrap>::deserialize(d)?.map(|w| w.0))
}

/// Transaction and account ids are decimal strings
fn id<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    decimal(d).map(|v| v as u64)
}

// ============================================================================
// Account
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AccountSummaryResponse {
    pub account: AccountBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBody {
    #[serde(deserialize_with = "decimal")]
    pub balance: f64,
    #[serde(deserialize_with = "decimal")]
    pub margin_available: f64,
    #[serde(deserialize_with = "decimal")]
    pub margin_used: f64,
    pub currency: String,
    #[serde(rename = "lastTransactionID", deserialize_with = "id")]
    pub last_transaction_id: u64,
}

impl From<AccountBody> for AccountSnapshot {
    fn from(a: AccountBody) -> Self {
        Self {
            balance: a.balance,
            margin_available: a.margin_available,
            margin_used: a.margin_used,
            currency: a.currency,
            last_transaction_id: a.last_transaction_id,
        }
    }
}

// ============================================================================
// Instruments
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct InstrumentsResponse {
    pub instruments: Vec<InstrumentBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentBody {
    pub name: String,
    pub pip_location: i32,
    pub display_precision: u32,
    #[serde(deserialize_with = "decimal")]
    pub minimum_trailing_stop_distance: f64,
    #[serde(deserialize_with = "decimal")]
    pub maximum_trailing_stop_distance: f64,
    #[serde(deserialize_with = "decimal")]
    pub margin_rate: f64,
    #[serde(deserialize_with = "decimal")]
    pub maximum_order_units: f64,
}

impl From<InstrumentBody> for InstrumentInfo {
    fn from(i: InstrumentBody) -> Self {
        Self {
            name: i.name,
            pip_size: 10f64.powi(i.pip_location),
            display_precision: i.display_precision,
            min_trailing_stop: i.minimum_trailing_stop_distance,
            max_trailing_stop: i.maximum_trailing_stop_distance,
            margin_rate: i.margin_rate,
            max_order_units: i.maximum_order_units,
            // v20 reports halts through the pricing endpoint
            halted: false,
        }
    }
}

// ============================================================================
// Pricing
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PricingResponse {
    pub prices: Vec<PriceBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceBucket {
    #[serde(deserialize_with = "decimal")]
    pub price: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBody {
    pub instrument: String,
    pub time: DateTime<Utc>,
    pub bids: Vec<PriceBucket>,
    pub asks: Vec<PriceBucket>,
    #[serde(default = "default_true")]
    pub tradeable: bool,
}

fn default_true() -> bool {
    true
}

impl PriceBody {
    /// Top of book; `None` when either side of the book is empty
    pub fn to_snapshot(&self) -> Option<PriceSnapshot> {
        Some(PriceSnapshot {
            instrument: self.instrument.clone(),
            time: self.time,
            bid: self.bids.first()?.price,
            ask: self.asks.first()?.price,
            tradeable: self.tradeable,
        })
    }
}

/// One line of the pricing stream
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamMessage {
    #[serde(rename = "PRICE")]
    Price(PriceBody),
    #[serde(rename = "HEARTBEAT")]
    Heartbeat { time: DateTime<Utc> },
}

// ============================================================================
// Candles
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CandlesResponse {
    pub instrument: String,
    pub candles: Vec<CandleBody>,
}

#[derive(Debug, Deserialize)]
pub struct Ohlc {
    #[serde(deserialize_with = "decimal")]
    pub c: f64,
}

#[derive(Debug, Deserialize)]
pub struct CandleBody {
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub complete: bool,
    pub bid: Option<Ohlc>,
    pub ask: Option<Ohlc>,
}

impl CandleBody {
    /// Candles requested with `price=BA`; others are skipped
    pub fn to_candle(&self, instrument: &str) -> Option<Candle> {
        Some(Candle {
            instrument: instrument.to_string(),
            time: self.time,
            close_bid: self.bid.as_ref()?.c,
            close_ask: self.ask.as_ref()?.c,
            volume: self.volume,
            complete: self.complete,
        })
    }
}

// ============================================================================
// Positions
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PositionsResponse {
    pub positions: Vec<PositionBody>,
}

#[derive(Debug, Deserialize)]
pub struct PositionSideBody {
    #[serde(deserialize_with = "decimal")]
    pub units: f64,
}

#[derive(Debug, Deserialize)]
pub struct PositionBody {
    pub instrument: String,
    pub long: PositionSideBody,
    pub short: PositionSideBody,
}

impl PositionBody {
    /// Net position (hedged accounts are not traded)
    pub fn to_position(&self) -> Option<Position> {
        let net = self.long.units + self.short.units;
        let side = if net > 0.0 {
            Side::Long
        } else if net < 0.0 {
            Side::Short
        } else {
            return None;
        };
        Some(Position {
            instrument: self.instrument.clone(),
            side,
            units: net.abs() as u64,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PositionResponse {
    pub position: PositionBody,
}

/// Body of `PUT .../positions/{instrument}/close`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePositionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_units: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_units: Option<String>,
}

// ============================================================================
// Transactions
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<TransactionBody>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionBody {
    #[serde(deserialize_with = "id")]
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub time: DateTime<Utc>,
    pub instrument: Option<String>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub units: Option<f64>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub pl: Option<f64>,
}

impl From<TransactionBody> for Transaction {
    fn from(t: TransactionBody) -> Self {
        Self {
            id: t.id,
            instrument: t.instrument,
            units: t.units.unwrap_or(0.0) as i64,
            realized_pl: t.pl.unwrap_or(0.0),
            time: t.time,
            kind: t.kind,
        }
    }
}

// ============================================================================
// Orders
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CreateOrderRequest {
    pub order: MarketOrderBody,
}

#[derive(Debug, Serialize)]
pub struct PriceDetails {
    pub price: String,
}

#[derive(Debug, Serialize)]
pub struct DistanceDetails {
    pub distance: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketOrderBody {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub instrument: String,
    /// Signed; negative sells
    pub units: String,
    pub time_in_force: &'static str,
    pub position_fill: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_on_fill: Option<PriceDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss_on_fill: Option<PriceDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trailing_stop_loss_on_fill: Option<DistanceDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_bound: Option<String>,
    pub client_extensions: ClientExtensions,
}

/// Client-side order tag echoed back in transactions
#[derive(Debug, Serialize)]
pub struct ClientExtensions {
    pub id: String,
    pub tag: &'static str,
}

/// v20 error body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error_message: Option<String>,
    pub error_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_summary_parsing() {
        let json = r#"{"account": {"balance": "100000.0000", "marginAvailable": "99500.5",
            "marginUsed": "499.5", "currency": "JPY", "lastTransactionID": "6356",
            "openTradeCount": 1}}"#;
        let resp: AccountSummaryResponse = serde_json::from_str(json).unwrap();
        let snapshot = AccountSnapshot::from(resp.account);
        assert_eq!(snapshot.balance, 100_000.0);
        assert_eq!(snapshot.margin_available, 99_500.5);
        assert_eq!(snapshot.currency, "JPY");
        assert_eq!(snapshot.last_transaction_id, 6356);
    }

    #[test]
    fn test_instrument_parsing() {
        let json = r#"{"name": "EUR_USD", "type": "CURRENCY", "pipLocation": -4,
            "displayPrecision": 5, "minimumTrailingStopDistance": "0.00050",
            "maximumTrailingStopDistance": "1.00000", "marginRate": "0.02",
            "maximumOrderUnits": "100000000"}"#;
        let info = InstrumentInfo::from(serde_json::from_str::<InstrumentBody>(json).unwrap());
        assert!((info.pip_size - 0.0001).abs() < 1e-15);
        assert_eq!(info.min_trailing_stop, 0.0005);
        assert_eq!(info.max_order_units, 1e8);
    }

    #[test]
    fn test_price_and_stream_message_parsing() {
        let line = r#"{"type":"PRICE","time":"2024-01-02T10:00:00.123456789Z",
            "bids":[{"price":"1.10012","liquidity":10000000}],
            "asks":[{"price":"1.10026","liquidity":10000000}],
            "closeoutBid":"1.10012","closeoutAsk":"1.10026","status":"tradeable",
            "tradeable":true,"instrument":"EUR_USD"}"#;
        match serde_json::from_str::<StreamMessage>(line).unwrap() {
            StreamMessage::Price(p) => {
                let s = p.to_snapshot().unwrap();
                assert_eq!(s.bid, 1.10012);
                assert_eq!(s.ask, 1.10026);
                assert!(s.tradeable);
            }
            other => panic!("unexpected {:?}", other),
        }
        let hb = r#"{"type":"HEARTBEAT","time":"2024-01-02T10:00:05.000000000Z"}"#;
        assert!(matches!(
            serde_json::from_str::<StreamMessage>(hb).unwrap(),
            StreamMessage::Heartbeat { .. }
        ));
    }

    #[test]
    fn test_position_netting() {
        let json = r#"{"instrument":"USD_JPY","long":{"units":"0"},"short":{"units":"-2500"}}"#;
        let p = serde_json::from_str::<PositionBody>(json).unwrap().to_position().unwrap();
        assert_eq!(p.side, Side::Short);
        assert_eq!(p.units, 2500);
        let flat = r#"{"instrument":"USD_JPY","long":{"units":"0"},"short":{"units":"0"}}"#;
        assert!(serde_json::from_str::<PositionBody>(flat).unwrap().to_position().is_none());
    }

    #[test]
    fn test_transaction_parsing() {
        let json = r#"{"transactions":[
            {"id":"101","type":"ORDER_FILL","time":"2024-01-02T10:00:00Z","instrument":"EUR_USD","units":"-1000","pl":"-3.2100"},
            {"id":"102","type":"DAILY_FINANCING","time":"2024-01-02T21:00:00Z"}]}"#;
        let resp: TransactionsResponse = serde_json::from_str(json).unwrap();
        let txns: Vec<Transaction> = resp.transactions.into_iter().map(Transaction::from).collect();
        assert_eq!(txns[0].units, -1000);
        assert_eq!(txns[0].realized_pl, -3.21);
        assert_eq!(txns[1].instrument, None);
        assert_eq!(txns[1].realized_pl, 0.0);
    }

    #[test]
    fn test_order_body_omits_unset_limits() {
        let body = CreateOrderRequest {
            order: MarketOrderBody {
                kind: "MARKET",
                instrument: "EUR_USD".to_string(),
                units: "-100".to_string(),
                time_in_force: "FOK",
                position_fill: "DEFAULT",
                take_profit_on_fill: None,
                stop_loss_on_fill: Some(PriceDetails {
                    price: "1.11100".to_string(),
                }),
                trailing_stop_loss_on_fill: None,
                price_bound: Some("1.09780".to_string()),
                client_extensions: ClientExtensions {
                    id: "fract-0a1b2c3d".to_string(),
                    tag: "fract",
                },
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["order"]["type"], "MARKET");
        assert_eq!(json["order"]["timeInForce"], "FOK");
        assert_eq!(json["order"]["stopLossOnFill"]["price"], "1.11100");
        assert!(json["order"].get("takeProfitOnFill").is_none());
        assert_eq!(json["order"]["priceBound"], "1.09780");
        assert_eq!(json["order"]["clientExtensions"]["id"], "fract-0a1b2c3d");
    }
}
