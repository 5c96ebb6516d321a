//! Quote sources feeding the decision loop
//!
//! - `poll`: asks the broker for the latest price every cycle (standalone mode)
//! - `queue`: drains a shared bounded per-instrument queue filled by a producer
//! - `pricing`: the producer, reading the broker's pricing stream into the queue

pub mod poll;
pub mod pricing;
pub mod queue;

pub use poll::PollingSource;
pub use pricing::{pump_price_lines, spawn_price_stream};
pub use queue::{QueueEntry, QueueSource, SharedQueue};

use crate::error::EngineResult;
use crate::types::Quote;

/// What a source produced for one instrument this cycle
#[derive(Debug, Clone, PartialEq)]
pub enum SourceUpdate {
    /// New quotes, oldest first
    Quotes(Vec<Quote>),
    /// Nothing new; the decision for this instrument is skipped
    Empty,
    /// Upstream disconnected; the loop must stop
    Disconnected(String),
}

#[allow(async_fn_in_trait)]
pub trait QuoteSource {
    async fn next_quotes(&mut self, instrument: &str) -> EngineResult<SourceUpdate>;

    /// Release any shared resources held by the source
    async fn release(&mut self) {}
}
