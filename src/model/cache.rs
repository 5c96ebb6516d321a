//! Per-instrument bounded sliding window of quotes

use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::types::Quote;

/// FIFO window capped at `max_len`
#[derive(Debug, Clone, Default)]
pub struct RateWindow {
    quotes: VecDeque<Quote>,
}

impl RateWindow {
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    pub fn latest(&self) -> Option<&Quote> {
        self.quotes.back()
    }

    pub fn to_vec(&self) -> Vec<Quote> {
        self.quotes.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Quote> {
        self.quotes.iter()
    }
}

/// Rate windows for every traded instrument
#[derive(Debug, Clone)]
pub struct RateCache {
    min_len: usize,
    max_len: usize,
    windows: HashMap<String, RateWindow>,
}

impl RateCache {
    pub fn new(min_len: usize, max_len: usize) -> Self {
        Self {
            min_len,
            max_len,
            windows: HashMap::new(),
        }
    }

    /// Append quotes and evict the oldest beyond `max_len`.
    /// Quotes not newer than the current tail are skipped so the window stays time-ordered.
    pub fn push(&mut self, instrument: &str, quotes: &[Quote]) -> &RateWindow {
        let max_len = self.max_len;
        let window = self.windows.entry(instrument.to_string()).or_default();
        let mut skipped = 0;
        for q in quotes {
            if window.latest().is_some_and(|last| q.time <= last.time) {
                skipped += 1;
                continue;
            }
            window.quotes.push_back(q.clone());
        }
        while window.quotes.len() > max_len {
            window.quotes.pop_front();
        }
        if skipped > 0 {
            debug!("{}: skipped {} out-of-order quotes", instrument, skipped);
        }
        debug!("{}: cache length {}", instrument, window.len());
        window
    }

    pub fn window(&self, instrument: &str) -> Option<&RateWindow> {
        self.windows.get(instrument)
    }

    pub fn len(&self, instrument: &str) -> usize {
        self.window(instrument).map_or(0, RateWindow::len)
    }

    /// Window has reached `min_len`
    pub fn is_warm(&self, instrument: &str) -> bool {
        self.len(instrument) >= self.min_len
    }

    /// Warm-up progress in percent (0..=100)
    pub fn load_pct(&self, instrument: &str) -> u32 {
        ((self.len(instrument) as f64 / self.min_len as f64).min(1.0) * 100.0) as u32
    }

    pub fn latest(&self, instrument: &str) -> Option<&Quote> {
        self.window(instrument).and_then(RateWindow::latest)
    }
}
