//! Shared bounded quote queue
//!
//! One FIFO per instrument holding JSON-encoded entries:
//! `{"tick": {"instrument", "time", "bid", "ask"}}` or `{"disconnect": {...}}`.
//! The producer pushes, the decision loop pops; pushing past the bound
//! evicts the oldest entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{QuoteSource, SourceUpdate};
use crate::error::EngineResult;
use crate::types::Quote;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument: String,
    pub time: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disconnect {
    pub instrument: String,
    pub time: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueEntry {
    Tick(Tick),
    Disconnect(Disconnect),
}

impl QueueEntry {
    pub fn instrument(&self) -> &str {
        match self {
            Self::Tick(t) => &t.instrument,
            Self::Disconnect(d) => &d.instrument,
        }
    }
}

impl From<&Quote> for QueueEntry {
    fn from(q: &Quote) -> Self {
        Self::Tick(Tick {
            instrument: q.instrument.clone(),
            time: q.time,
            bid: q.bid,
            ask: q.ask,
        })
    }
}

/// Cloneable handle to the per-instrument queues
#[derive(Clone)]
pub struct SharedQueue {
    inner: Arc<Mutex<HashMap<String, VecDeque<String>>>>,
    max_len: usize,
}

impl SharedQueue {
    pub fn new(max_len: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max_len: max_len.max(1),
        }
    }

    pub async fn push(&self, entry: &QueueEntry) -> EngineResult<()> {
        let payload = serde_json::to_string(entry)?;
        let mut queues = self.inner.lock().await;
        let queue = queues.entry(entry.instrument().to_string()).or_default();
        queue.push_back(payload);
        while queue.len() > self.max_len {
            queue.pop_front();
        }
        Ok(())
    }

    /// Pop every queued entry for `instrument`, oldest first.
    /// Entries that fail to decode are dropped with a warning.
    pub async fn drain(&self, instrument: &str) -> Vec<QueueEntry> {
        let payloads: Vec<String> = {
            let mut queues = self.inner.lock().await;
            match queues.get_mut(instrument) {
                Some(queue) => queue.drain(..).collect(),
                None => Vec::new(),
            }
        };
        payloads
            .iter()
            .filter_map(|p| match serde_json::from_str(p) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Dropping malformed queue entry {}: {}", p, e);
                    None
                }
            })
            .collect()
    }

    pub async fn len(&self, instrument: &str) -> usize {
        self.inner
            .lock()
            .await
            .get(instrument)
            .map_or(0, VecDeque::len)
    }

    /// Delete the queues of `instruments`
    pub async fn clear(&self, instruments: &[String]) {
        let mut queues = self.inner.lock().await;
        for instrument in instruments {
            queues.remove(instrument);
        }
    }

    /// Push a raw payload, bypassing encoding
    #[cfg(test)]
    pub(crate) async fn push_raw(&self, instrument: &str, payload: &str) {
        self.inner
            .lock()
            .await
            .entry(instrument.to_string())
            .or_default()
            .push_back(payload.to_string());
    }
}

/// Consumer side of the shared queue
pub struct QueueSource {
    queue: SharedQueue,
    instruments: Vec<String>,
}

impl QueueSource {
    pub fn new(queue: SharedQueue, instruments: Vec<String>) -> Self {
        Self { queue, instruments }
    }
}

impl QuoteSource for QueueSource {
    async fn next_quotes(&mut self, instrument: &str) -> EngineResult<SourceUpdate> {
        let mut quotes = Vec::new();
        for entry in self.queue.drain(instrument).await {
            match entry {
                QueueEntry::Tick(t) => quotes.push(Quote::new(&t.instrument, t.time, t.bid, t.ask)),
                QueueEntry::Disconnect(d) => {
                    info!("{}: upstream disconnected at {}: {}", d.instrument, d.time, d.reason);
                    return Ok(SourceUpdate::Disconnected(d.reason));
                }
            }
        }
        if quotes.is_empty() {
            debug!("{}: queue is empty", instrument);
            Ok(SourceUpdate::Empty)
        } else {
            Ok(SourceUpdate::Quotes(quotes))
        }
    }

    async fn release(&mut self) {
        info!("Releasing quote queues: {}", self.instruments.join(","));
        self.queue.clear(&self.instruments).await;
    }
}
