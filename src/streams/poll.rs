//! Standalone quote source polling the broker's latest price

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{QuoteSource, SourceUpdate};
use crate::broker::BrokerClient;
use crate::error::EngineResult;

pub struct PollingSource<B> {
    broker: Arc<B>,
    last_seen: HashMap<String, DateTime<Utc>>,
}

impl<B: BrokerClient> PollingSource<B> {
    pub fn new(broker: Arc<B>) -> Self {
        Self {
            broker,
            last_seen: HashMap::new(),
        }
    }
}

impl<B: BrokerClient> QuoteSource for PollingSource<B> {
    async fn next_quotes(&mut self, instrument: &str) -> EngineResult<SourceUpdate> {
        let quote = self.broker.get_latest_price(instrument).await?;
        if self
            .last_seen
            .get(instrument)
            .is_some_and(|t| quote.time <= *t)
        {
            debug!("{}: no new price since {}", instrument, quote.time);
            return Ok(SourceUpdate::Empty);
        }
        self.last_seen.insert(instrument.to_string(), quote.time);
        Ok(SourceUpdate::Quotes(vec![quote]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::{price, MockBroker};
    use chrono::Duration;

    #[tokio::test]
    async fn test_repeated_price_is_empty() {
        let broker = Arc::new(MockBroker::new());
        let mut source = PollingSource::new(broker.clone());

        let first = source.next_quotes("EUR_USD").await.unwrap();
        assert!(matches!(first, SourceUpdate::Quotes(ref q) if q.len() == 1 && q[0].bid == 1.1));
        assert_eq!(source.next_quotes("EUR_USD").await.unwrap(), SourceUpdate::Empty);

        let mut next = price("EUR_USD", 1.1001, 1.1003);
        next.time += Duration::seconds(5);
        broker.prices.lock().unwrap().insert("EUR_USD".to_string(), next);
        let update = source.next_quotes("EUR_USD").await.unwrap();
        assert!(matches!(update, SourceUpdate::Quotes(ref q) if q[0].ask == 1.1003));
    }

    #[tokio::test]
    async fn test_unknown_instrument_is_upstream_error() {
        let mut source = PollingSource::new(Arc::new(MockBroker::new()));
        let err = source.next_quotes("GBP_USD").await.unwrap_err();
        assert!(err.is_upstream());
    }
}
