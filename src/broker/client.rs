//! OANDA v20 API Client
//!
//! HTTP client for the v20 REST endpoints, authenticated with a bearer token.

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::models::*;
use super::{BrokerClient, OrderRequest, OrderResult};
use crate::config::OandaConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::{
    AccountSnapshot, Candle, Granularity, InstrumentInfo, Position, PriceSnapshot, Quote,
    Transaction,
};

/// Largest candle count accepted by a single request
pub const MAX_CANDLE_COUNT: usize = 5000;

/// OANDA REST client bound to one account
#[derive(Clone)]
pub struct OandaClient {
    client: Client,
    base_url: String,
    stream_url: String,
    account_id: String,
    access_token: String,
}

impl OandaClient {
    pub fn new(config: &OandaConfig) -> EngineResult<Self> {
        if config.account_id.is_empty() {
            return Err(EngineError::Configuration(
                "oanda.account_id is not set".to_string(),
            ));
        }
        if config.access_token.is_empty() {
            return Err(EngineError::Configuration(
                "oanda.access_token is not set (or export OANDA_TOKEN)".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::Configuration(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.environment.rest_url().to_string(),
            stream_url: config.environment.stream_url().to_string(),
            account_id: config.account_id.clone(),
            access_token: config.access_token.clone(),
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    fn account_url(&self, suffix: &str) -> String {
        format!("{}/v3/accounts/{}{}", self.base_url, self.account_id, suffix)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.access_token)
            .header("Accept-Datetime-Format", "RFC3339")
    }

    /// Send a request and decode the JSON body
    async fn send<R: DeserializeOwned>(&self, builder: RequestBuilder, endpoint: &str) -> EngineResult<R> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| EngineError::UpstreamApi(format!("request to {} failed: {}", endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|e| e.error_message)
                .unwrap_or(body);
            return Err(EngineError::UpstreamApi(format!(
                "request to {} failed ({}): {}",
                endpoint, status, message
            )));
        }

        response
            .json()
            .await
            .map_err(|e| EngineError::UpstreamApi(format!("failed to parse response from {}: {}", endpoint, e)))
    }

    async fn get<R: DeserializeOwned>(&self, url: String, query: &[(&str, String)]) -> EngineResult<R> {
        debug!("GET {}", url);
        self.send(self.client.get(&url).query(query), &url).await
    }

    /// Open the line-delimited pricing stream
    pub async fn open_price_stream(&self, instruments: &[String]) -> EngineResult<reqwest::Response> {
        let url = format!(
            "{}/v3/accounts/{}/pricing/stream",
            self.stream_url, self.account_id
        );
        info!("Opening pricing stream: {}", instruments.join(","));
        let response = self
            .authorized(self.client.get(&url))
            .query(&[("instruments", instruments.join(","))])
            // Streams stay open indefinitely
            .timeout(Duration::from_secs(24 * 60 * 60))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::UpstreamApi(format!(
                "pricing stream failed ({}): {}",
                status, body
            )));
        }
        Ok(response)
    }

    /// Reject/cancel transactions in a 2xx order response mean the order did not fill
    fn order_result(instrument: &str, response: serde_json::Value) -> EngineResult<OrderResult> {
        for key in ["orderRejectTransaction", "orderCancelTransaction"] {
            if let Some(txn) = response.get(key) {
                let reason = txn
                    .get("reason")
                    .or_else(|| txn.get("rejectReason"))
                    .and_then(|r| r.as_str())
                    .unwrap_or("unknown");
                return Err(EngineError::OrderPlacement(format!(
                    "{} order not filled: {}",
                    instrument, reason
                )));
            }
        }
        let transaction_id = response
            .get("lastTransactionID")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok());
        Ok(OrderResult {
            instrument: instrument.to_string(),
            transaction_id,
            response,
        })
    }
}

/// Short unique id for the order's client extensions
fn client_order_id() -> String {
    format!("fract-{}", &Uuid::new_v4().simple().to_string()[..8])
}

fn price_string(price: f64, precision: u32) -> String {
    format!("{:.*}", precision as usize, price)
}

fn placement_error(e: EngineError) -> EngineError {
    match e {
        EngineError::UpstreamApi(msg) => EngineError::OrderPlacement(msg),
        other => other,
    }
}

impl BrokerClient for OandaClient {
    async fn get_account(&self) -> EngineResult<AccountSnapshot> {
        let resp: AccountSummaryResponse = self.get(self.account_url("/summary"), &[]).await?;
        Ok(resp.account.into())
    }

    async fn get_instruments(&self) -> EngineResult<HashMap<String, InstrumentInfo>> {
        let resp: InstrumentsResponse = self.get(self.account_url("/instruments"), &[]).await?;
        debug!("Found {} instruments", resp.instruments.len());
        Ok(resp
            .instruments
            .into_iter()
            .map(|i| (i.name.clone(), InstrumentInfo::from(i)))
            .collect())
    }

    async fn get_prices(&self, instruments: &[String]) -> EngineResult<HashMap<String, PriceSnapshot>> {
        let resp: PricingResponse = self
            .get(
                self.account_url("/pricing"),
                &[("instruments", instruments.join(","))],
            )
            .await?;
        Ok(resp
            .prices
            .iter()
            .filter_map(PriceBody::to_snapshot)
            .map(|p| (p.instrument.clone(), p))
            .collect())
    }

    async fn get_positions(&self) -> EngineResult<HashMap<String, Position>> {
        let resp: PositionsResponse = self.get(self.account_url("/openPositions"), &[]).await?;
        Ok(resp
            .positions
            .iter()
            .filter_map(PositionBody::to_position)
            .map(|p| (p.instrument.clone(), p))
            .collect())
    }

    async fn get_transaction_history(&self, since_id: u64) -> EngineResult<Vec<Transaction>> {
        let resp: TransactionsResponse = self
            .get(
                self.account_url("/transactions/sinceid"),
                &[("id", since_id.to_string())],
            )
            .await?;
        Ok(resp.transactions.into_iter().map(Transaction::from).collect())
    }

    async fn get_candles(
        &self,
        instrument: &str,
        granularity: &Granularity,
        count: usize,
    ) -> EngineResult<Vec<Candle>> {
        if granularity.is_tick() {
            return Err(EngineError::Configuration(
                "tick data is not available as candles".to_string(),
            ));
        }
        let url = format!("{}/v3/instruments/{}/candles", self.base_url, instrument);
        let resp: CandlesResponse = self
            .get(
                url,
                &[
                    ("granularity", granularity.code().to_string()),
                    ("count", count.min(MAX_CANDLE_COUNT).to_string()),
                    ("price", "BA".to_string()),
                ],
            )
            .await?;
        Ok(resp
            .candles
            .iter()
            .filter_map(|c| c.to_candle(&resp.instrument))
            .collect())
    }

    async fn get_latest_price(&self, instrument: &str) -> EngineResult<Quote> {
        let prices = self.get_prices(&[instrument.to_string()]).await?;
        prices
            .get(instrument)
            .map(PriceSnapshot::to_quote)
            .ok_or_else(|| EngineError::UpstreamApi(format!("no price returned for {}", instrument)))
    }

    async fn create_order(&self, request: &OrderRequest) -> EngineResult<OrderResult> {
        info!(
            "Placing market order: {} {} x {}",
            request.instrument, request.side, request.units
        );
        let limits = &request.limits;
        let body = CreateOrderRequest {
            order: MarketOrderBody {
                kind: "MARKET",
                instrument: request.instrument.clone(),
                units: request.signed_units().to_string(),
                time_in_force: "FOK",
                position_fill: "DEFAULT",
                take_profit_on_fill: limits.take_profit.map(|p| PriceDetails {
                    price: price_string(p, request.precision),
                }),
                stop_loss_on_fill: limits.stop_loss.map(|p| PriceDetails {
                    price: price_string(p, request.precision),
                }),
                trailing_stop_loss_on_fill: limits.trailing_stop.map(|d| DistanceDetails {
                    distance: price_string(d, request.precision),
                }),
                price_bound: limits.price_bound.map(|p| price_string(p, request.precision)),
                client_extensions: ClientExtensions {
                    id: client_order_id(),
                    tag: "fract",
                },
            },
        };
        let url = self.account_url("/orders");
        let response: serde_json::Value = self
            .send(self.client.post(&url).json(&body), &url)
            .await
            .map_err(placement_error)?;
        let result = Self::order_result(&request.instrument, response)?;
        info!("Order filled: {} (txn {:?})", request.instrument, result.transaction_id);
        Ok(result)
    }

    async fn close_position(&self, instrument: &str) -> EngineResult<OrderResult> {
        info!("Closing position for instrument: {}", instrument);
        let resp: PositionResponse = self
            .get(self.account_url(&format!("/positions/{}", instrument)), &[])
            .await
            .map_err(placement_error)?;
        let all = |units: f64| (units != 0.0).then(|| "ALL".to_string());
        let body = ClosePositionRequest {
            long_units: all(resp.position.long.units),
            short_units: all(resp.position.short.units),
        };
        if body.long_units.is_none() && body.short_units.is_none() {
            return Err(EngineError::OrderPlacement(format!(
                "no open position for {}",
                instrument
            )));
        }
        let url = self.account_url(&format!("/positions/{}/close", instrument));
        let response: serde_json::Value = self
            .send(self.client.put(&url).json(&body), &url)
            .await
            .map_err(placement_error)?;
        let result = Self::order_result(instrument, response)?;
        info!("Position closed for instrument: {}", instrument);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;

    fn config() -> OandaConfig {
        OandaConfig {
            environment: Environment::Practice,
            account_id: "101-001-1234567-001".to_string(),
            access_token: "token".to_string(),
        }
    }

    #[test]
    fn test_missing_credentials_are_configuration_errors() {
        let mut c = config();
        c.access_token.clear();
        assert!(matches!(OandaClient::new(&c), Err(EngineError::Configuration(_))));
        let mut c = config();
        c.account_id.clear();
        assert!(matches!(OandaClient::new(&c), Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_account_url() {
        let client = OandaClient::new(&config()).unwrap();
        assert_eq!(
            client.account_url("/summary"),
            "https://api-fxpractice.oanda.com/v3/accounts/101-001-1234567-001/summary"
        );
    }

    #[test]
    fn test_price_string_respects_precision() {
        assert_eq!(price_string(1.1234567, 5), "1.12346");
        assert_eq!(price_string(151.2, 3), "151.200");
    }

    #[test]
    fn test_client_order_ids_are_unique() {
        let a = client_order_id();
        assert!(a.starts_with("fract-"));
        assert_eq!(a.len(), 14);
        assert_ne!(a, client_order_id());
    }

    #[test]
    fn test_order_result_detects_cancellation() {
        let filled = serde_json::json!({
            "orderFillTransaction": {"id": "7", "units": "100"},
            "lastTransactionID": "7"
        });
        let r = OandaClient::order_result("EUR_USD", filled).unwrap();
        assert_eq!(r.transaction_id, Some(7));

        let cancelled = serde_json::json!({
            "orderCancelTransaction": {"reason": "INSUFFICIENT_MARGIN"},
            "lastTransactionID": "8"
        });
        let err = OandaClient::order_result("EUR_USD", cancelled).unwrap_err();
        assert!(matches!(err, EngineError::OrderPlacement(ref m) if m.contains("INSUFFICIENT_MARGIN")));
    }
}
