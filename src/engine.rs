//! Decision Engine
//!
//! Owns every per-instrument cache and runs the polling loop: refresh the
//! broker state, pull quotes from the `QuoteSource`, select a granularity,
//! detect a signal, decide, then hand the action to the `OrderExecutor`.
//!
//! API error policy: `UpstreamApi` errors stop the loop unless
//! `ignore_api_error` is set, in which case the instrument (or the whole
//! cycle when the refresh failed) is skipped. Order failures never stop it.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::broker::BrokerClient;
use crate::config::TraderConfig;
use crate::error::{EngineError, EngineResult};
use crate::execution::{margin, ExecutionMode, MarketContext, OrderExecutor, OrderRecord};
use crate::model::{
    decide, Action, BettingSizer, DecisionInput, FeatureSeries, GranularitySieve, ModelKind,
    RateCache, RateWindow, SignalModel, SignalResult,
};
use crate::record::{status_line, RecordLog, TurnRecord};
use crate::streams::{QuoteSource, SourceUpdate};
use crate::types::{
    AccountSnapshot, Candle, Granularity, InstrumentInfo, Position, PriceSnapshot, Quote,
    Transaction,
};

/// Transactions kept per instrument for sizing and net P&L
const TRANSACTION_TAIL: usize = 1000;

/// Run-time switches coming from the command line
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub model: ModelKind,
    pub mode: ExecutionMode,
    /// Sleep between cycles
    pub interval: Duration,
    /// Stop when no quote has arrived for this long
    pub timeout: Option<Duration>,
    pub contrarian: bool,
    pub ignore_api_error: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            model: ModelKind::Ewma,
            mode: ExecutionMode::Live,
            interval: Duration::from_secs(0),
            timeout: Some(Duration::from_secs(3600)),
            contrarian: false,
            ignore_api_error: false,
            log_dir: None,
        }
    }
}

/// Result of one decision for one instrument
#[derive(Debug, Clone)]
pub struct Turn {
    pub record: TurnRecord,
    pub signal: SignalResult,
    pub orders: Vec<OrderRecord>,
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Continue(Vec<Turn>),
    /// The quote source disconnected
    Stop(String),
}

pub struct DecisionEngine<B, Q> {
    broker: Arc<B>,
    source: Q,
    config: TraderConfig,
    options: EngineOptions,
    sieve: GranularitySieve,
    model: SignalModel,
    executor: OrderExecutor,
    cache: RateCache,
    account: Option<AccountSnapshot>,
    instruments: HashMap<String, InstrumentInfo>,
    prices: HashMap<String, PriceSnapshot>,
    positions: HashMap<String, Position>,
    transactions: HashMap<String, VecDeque<Transaction>>,
    last_transaction_id: u64,
    side_changed_at: HashMap<String, DateTime<Utc>>,
    latest_update: Instant,
    log: Option<RecordLog>,
}

impl<B: BrokerClient, Q: QuoteSource> DecisionEngine<B, Q> {
    pub fn new(
        broker: Arc<B>,
        source: Q,
        config: TraderConfig,
        options: EngineOptions,
    ) -> EngineResult<Self> {
        config.validate()?;
        let feature = FeatureSeries::new(config.feature.kind, config.feature.spread_weighted)
            .with_drop_zero(config.feature.drop_zero);
        let sieve = GranularitySieve::new(feature, config.feature.weight_decay);
        let model = SignalModel::from_config(options.model, &config.model);
        let executor = OrderExecutor::new(
            options.mode,
            BettingSizer::new(config.position.bet),
            config.position.margin_nav_ratio.clone(),
            config.position.limit_price_ratio.clone(),
        );
        let cache = RateCache::new(config.cache.min_len, config.cache.max_len);
        let log = options
            .log_dir
            .as_deref()
            .map(|dir| RecordLog::create(dir, &config))
            .transpose()?;

        Ok(Self {
            broker,
            source,
            config,
            options,
            sieve,
            model,
            executor,
            cache,
            account: None,
            instruments: HashMap::new(),
            prices: HashMap::new(),
            positions: HashMap::new(),
            transactions: HashMap::new(),
            last_transaction_id: 0,
            side_changed_at: HashMap::new(),
            latest_update: Instant::now(),
            log,
        })
    }

    /// Latest transactions of `instrument` observed since start-up, oldest first
    pub fn transactions(&self, instrument: &str) -> Vec<Transaction> {
        self.transactions
            .get(instrument)
            .map(|tail| tail.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Load the account and instruments; unknown configured instruments are fatal
    pub async fn initialize(&mut self) -> EngineResult<()> {
        let account = self.broker.get_account().await?;
        self.last_transaction_id = account.last_transaction_id;
        info!(
            "Account: balance {:.2} {} (last transaction {})",
            account.balance, account.currency, account.last_transaction_id
        );
        self.account = Some(account);

        self.instruments = self.broker.get_instruments().await?;
        for name in &self.config.instruments {
            if !self.instruments.contains_key(name) {
                return Err(EngineError::Configuration(format!(
                    "instrument not tradeable on this account: {}",
                    name
                )));
            }
        }
        info!(
            "Trading {} with {} model ({})",
            self.config.instruments.join(","),
            self.options.model,
            self.executor.mode()
        );
        self.latest_update = Instant::now();
        Ok(())
    }

    /// Run until the source disconnects, the timeout expires or a fatal error occurs.
    /// The source is released on every exit path.
    pub async fn run(&mut self) -> EngineResult<()> {
        let result = self.run_loop().await;
        self.release().await;
        result
    }

    /// Release the quote source, e.g. after an interrupted `run`
    pub async fn release(&mut self) {
        self.source.release().await;
    }

    async fn run_loop(&mut self) -> EngineResult<()> {
        self.initialize().await?;
        loop {
            if !self.is_healthy() {
                warn!(
                    "No update for {:.1}s, stopping",
                    self.latest_update.elapsed().as_secs_f64()
                );
                return Ok(());
            }
            match self.run_cycle().await {
                Ok(CycleOutcome::Continue(turns)) => debug!("Cycle done: {} decisions", turns.len()),
                Ok(CycleOutcome::Stop(reason)) => {
                    info!("Quote source disconnected: {}", reason);
                    return Ok(());
                }
                Err(e) => self.tolerate(e)?,
            }
            if !self.options.interval.is_zero() {
                tokio::time::sleep(self.options.interval).await;
            }
        }
    }

    /// Time since the last fresh quote is within the configured timeout
    pub fn is_healthy(&self) -> bool {
        self.options
            .timeout
            .map_or(true, |t| self.latest_update.elapsed() <= t)
    }

    fn tolerate(&self, e: EngineError) -> EngineResult<()> {
        if self.options.ignore_api_error && e.is_upstream() {
            warn!("Ignoring API error: {}", e);
            Ok(())
        } else {
            Err(e)
        }
    }

    /// One pass over every configured instrument
    pub async fn run_cycle(&mut self) -> EngineResult<CycleOutcome> {
        self.refresh_state().await?;
        let mut turns = Vec::new();
        for instrument in self.config.instruments.clone() {
            match self.source.next_quotes(&instrument).await {
                Ok(SourceUpdate::Quotes(quotes)) => self.ingest(&instrument, &quotes),
                Ok(SourceUpdate::Empty) => continue,
                Ok(SourceUpdate::Disconnected(reason)) => return Ok(CycleOutcome::Stop(reason)),
                Err(e) => {
                    self.tolerate(e)?;
                    continue;
                }
            }
            match self.trade(&instrument).await {
                Ok(turn) => turns.push(turn),
                Err(e) => self.tolerate(e)?,
            }
        }
        Ok(CycleOutcome::Continue(turns))
    }

    /// Refresh account, transactions, instruments, prices and positions, paced
    /// at `pacing_ms` steps from the start of the refresh
    pub async fn refresh_state(&mut self) -> EngineResult<()> {
        let t0 = Instant::now();
        self.account = Some(self.broker.get_account().await?);
        self.pace(t0, 1).await;
        self.refresh_transactions().await?;
        self.pace(t0, 2).await;
        self.instruments = self.broker.get_instruments().await?;
        self.pace(t0, 3).await;
        let mut names: Vec<String> = self.instruments.keys().cloned().collect();
        names.sort();
        self.prices = self.broker.get_prices(&names).await?;
        self.pace(t0, 4).await;
        let positions = self.broker.get_positions().await?;
        self.track_side_changes(&positions);
        self.positions = positions;
        Ok(())
    }

    async fn pace(&self, t0: Instant, step: u64) {
        if self.config.pacing_ms == 0 {
            return;
        }
        let due = Duration::from_millis(self.config.pacing_ms * step);
        let elapsed = t0.elapsed();
        if elapsed < due {
            tokio::time::sleep(due - elapsed).await;
        }
    }

    async fn refresh_transactions(&mut self) -> EngineResult<()> {
        let since = self.last_transaction_id;
        let new: Vec<Transaction> = self
            .broker
            .get_transaction_history(since)
            .await?
            .into_iter()
            .filter(|t| t.id > since)
            .collect();
        if new.is_empty() {
            return Ok(());
        }
        for t in &new {
            info!(
                "Transaction {}: {} {} {} (P&L {:.2})",
                t.id,
                t.kind,
                t.instrument.as_deref().unwrap_or("-"),
                t.units,
                t.realized_pl
            );
        }
        self.last_transaction_id = new.iter().map(|t| t.id).max().unwrap_or(since);
        self.write_log(|log| log.write_transactions(&new));
        for t in new {
            let Some(instrument) = t.instrument.clone() else {
                continue;
            };
            let tail = self.transactions.entry(instrument).or_default();
            tail.push_back(t);
            while tail.len() > TRANSACTION_TAIL {
                tail.pop_front();
            }
        }
        Ok(())
    }

    fn track_side_changes(&mut self, positions: &HashMap<String, Position>) {
        let now = Utc::now();
        for (instrument, position) in positions {
            let changed = self
                .positions
                .get(instrument)
                .map_or(true, |old| old.side != position.side);
            if changed || !self.side_changed_at.contains_key(instrument) {
                debug!("{}: side is now {}", instrument, position.side);
                self.side_changed_at.insert(instrument.clone(), now);
            }
        }
        self.side_changed_at
            .retain(|instrument, _| positions.contains_key(instrument));
    }

    fn is_expired(&self, instrument: &str) -> bool {
        match (self.config.position.ttl_sec, self.side_changed_at.get(instrument)) {
            (Some(ttl), Some(since)) => (Utc::now() - *since).num_seconds() > ttl as i64,
            _ => false,
        }
    }

    fn ingest(&mut self, instrument: &str, quotes: &[Quote]) {
        let tail = self.cache.latest(instrument).map(|q| q.time);
        let fresh: Vec<Quote> = quotes
            .iter()
            .filter(|q| tail.map_or(true, |t| q.time > t))
            .cloned()
            .collect();
        self.cache.push(instrument, quotes);
        if !fresh.is_empty() {
            self.latest_update = Instant::now();
            self.write_log(|log| log.write_rates(instrument, &fresh));
        }
    }

    /// Candidate series for the sieve, one per configured granularity
    async fn history(&self, instrument: &str) -> EngineResult<Vec<(Granularity, Vec<Quote>)>> {
        let mut history = Vec::new();
        for granularity in &self.config.feature.granularities {
            let quotes = if granularity.is_tick() {
                self.cache
                    .window(instrument)
                    .map(RateWindow::to_vec)
                    .unwrap_or_default()
            } else {
                self.broker
                    .get_candles(instrument, granularity, self.config.feature.cache_length)
                    .await?
                    .iter()
                    .filter(|c| c.complete)
                    .map(Candle::to_quote)
                    .collect()
            };
            history.push((granularity.clone(), quotes));
        }
        Ok(history)
    }

    /// Decide and act for one instrument using the state loaded by the last refresh
    pub async fn trade(&mut self, instrument: &str) -> EngineResult<Turn> {
        let missing = |what: &str| EngineError::UpstreamApi(format!("{} not loaded for {}", what, instrument));
        let account = self.account.clone().ok_or_else(|| missing("account"))?;
        let info = self
            .instruments
            .get(instrument)
            .cloned()
            .ok_or_else(|| missing("instrument"))?;
        let price = self
            .prices
            .get(instrument)
            .cloned()
            .ok_or_else(|| missing("price"))?;
        let position = self.positions.get(instrument).cloned();
        let quote = self
            .cache
            .latest(instrument)
            .cloned()
            .unwrap_or_else(|| price.to_quote());

        let warm = self.cache.is_warm(instrument);
        let signal = if warm {
            let history = self.history(instrument).await?;
            let selected = self.sieve.select(&history);
            self.model.detect(
                selected.as_ref(),
                position.as_ref(),
                self.options.contrarian,
                self.sieve.feature().kind().code(),
            )
        } else {
            SignalResult::loading(None)
        };

        let unit_cost = margin::unit_cost(
            instrument,
            info.margin_rate,
            &account.currency,
            &self.prices,
        )?;
        let exposure_pct = position
            .as_ref()
            .map_or(0.0, |p| margin::exposure_pct(p.units, unit_cost, account.balance));
        let decision = decide(&DecisionInput {
            warm,
            load_pct: self.cache.load_pct(instrument),
            halted: info.halted || !price.tradeable,
            balance: account.balance,
            margin_available: account.margin_available,
            preserve_ratio: self.config.position.margin_nav_ratio.preserve,
            spread_ratio: price.to_quote().spread_ratio(),
            max_spread: self.config.position.limit_price_ratio.max_spread,
            position: position.as_ref(),
            expired: self.is_expired(instrument),
            exposure_pct,
            signal: signal.action,
            signal_loading: signal.is_loading(),
        });

        let history = self.transactions(instrument);
        let orders = if decision.action == Action::None {
            Vec::new()
        } else {
            let ctx = MarketContext {
                account: &account,
                instrument: &info,
                price: &price,
                position: position.as_ref(),
                unit_cost,
                transactions: &history,
            };
            self.executor
                .place(self.broker.as_ref(), decision.action, &ctx)
                .await?
        };
        self.write_log(|log| log.write_orders(&orders));

        let net_pl: f64 = history.iter().map(|t| t.realized_pl).sum();
        info!("{}", status_line(instrument, &quote, net_pl, &signal, &decision));
        let record = TurnRecord::new(instrument, &quote, &signal, &decision);
        self.write_log(|log| log.write_signal(&record));

        Ok(Turn {
            record,
            signal,
            orders,
        })
    }

    /// Log sink failures are reported but never stop trading
    fn write_log<F>(&self, write: F)
    where
        F: FnOnce(&RecordLog) -> EngineResult<()>,
    {
        if let Some(log) = &self.log {
            if let Err(e) = write(log) {
                warn!("Failed to write to {}: {}", log.dir().display(), e);
            }
        }
    }
}
