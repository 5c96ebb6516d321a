//! Order Executor
//!
//! Translates a `Decision` into broker calls: at most one close and one open
//! per invocation, no internal retries. Placement failures are logged and
//! reported in the returned records; they never abort the trading loop.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerClient, OrderLimits, OrderRequest};
use crate::config::{LimitPriceRatio, MarginNavRatio};
use crate::error::EngineResult;
use crate::execution::margin;
use crate::model::bet::BettingSizer;
use crate::model::decision::Action;
use crate::types::{AccountSnapshot, InstrumentInfo, Position, PriceSnapshot, Side, Transaction};

/// Execution mode determines whether orders are sent to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum ExecutionMode {
    /// Log the would-be call only
    DryRun,
    #[default]
    Live,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DryRun => write!(f, "Dry-run"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// What happened to one broker call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderOutcome {
    Filled(serde_json::Value),
    DryRun,
    Failed(String),
    Skipped(String),
}

/// One line of the order log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRecord {
    pub time: DateTime<Utc>,
    /// `create_order` or `close_position`
    pub func: &'static str,
    pub args: serde_json::Value,
    pub outcome: OrderOutcome,
}

impl OrderRecord {
    fn new(func: &'static str, args: serde_json::Value, outcome: OrderOutcome) -> Self {
        Self {
            time: Utc::now(),
            func,
            args,
            outcome,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, OrderOutcome::Failed(_))
    }
}

/// Broker state the executor sizes and prices against
#[derive(Debug, Clone, Copy)]
pub struct MarketContext<'a> {
    pub account: &'a AccountSnapshot,
    pub instrument: &'a InstrumentInfo,
    pub price: &'a PriceSnapshot,
    pub position: Option<&'a Position>,
    /// Margin per unit in account currency
    pub unit_cost: f64,
    /// Transactions of this instrument, oldest first
    pub transactions: &'a [Transaction],
}

pub struct OrderExecutor {
    mode: ExecutionMode,
    sizer: BettingSizer,
    margin_nav_ratio: MarginNavRatio,
    limit_price_ratio: LimitPriceRatio,
}

impl OrderExecutor {
    pub fn new(
        mode: ExecutionMode,
        sizer: BettingSizer,
        margin_nav_ratio: MarginNavRatio,
        limit_price_ratio: LimitPriceRatio,
    ) -> Self {
        Self {
            mode,
            sizer,
            margin_nav_ratio,
            limit_price_ratio,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Take-profit / stop-loss around the fill price, a clamped trailing-stop distance
    /// and the worst fill price (upper bound for buys, lower bound for sells)
    pub fn design_limits(&self, side: Side, price: &PriceSnapshot, info: &InstrumentInfo) -> OrderLimits {
        let rate = match side {
            Side::Long => price.ask,
            Side::Short => price.bid,
        };
        let precision = info.display_precision as i32;
        let round = |v: f64| {
            let scale = 10f64.powi(precision);
            (v * scale).round() / scale
        };
        let r = &self.limit_price_ratio;
        OrderLimits {
            take_profit: r
                .take_profit
                .map(|ratio| round(rate * (1.0 + side.sign() * ratio))),
            stop_loss: r
                .stop_loss
                .map(|ratio| round(rate * (1.0 - side.sign() * ratio))),
            trailing_stop: r.trailing_stop.map(|ratio| {
                round((rate * ratio).clamp(info.min_trailing_stop, info.max_trailing_stop))
            }),
            price_bound: match side {
                Side::Long => r.upper_bound.map(|ratio| round(rate * (1.0 + ratio))),
                Side::Short => r.lower_bound.map(|ratio| round(rate * (1.0 - ratio))),
            },
        }
    }

    /// `min(bet size, available margin capacity, max order units)`
    pub fn design_units(&self, ctx: &MarketContext) -> u64 {
        let balance = ctx.account.balance;
        let ratio = &self.margin_nav_ratio;
        let available = margin::available_units(ctx.account, ratio.preserve, ctx.unit_cost);
        let unit = margin::units_for_ratio(balance, ratio.unit, ctx.unit_cost);
        let init = ratio
            .init
            .map(|r| margin::units_for_ratio(balance, r, ctx.unit_cost));
        let bet = self.sizer.size(unit, init, ctx.transactions);
        debug!(
            "{}: available {} unit {} init {:?} bet {}",
            ctx.instrument.name, available, unit, init, bet
        );
        bet.min(available).min(ctx.instrument.max_order_units as u64)
    }

    /// Carry out `action`; the opposite position is closed before a reversal
    pub async fn place<B: BrokerClient>(
        &self,
        broker: &B,
        action: Action,
        ctx: &MarketContext<'_>,
    ) -> EngineResult<Vec<OrderRecord>> {
        let instrument = ctx.instrument.name.as_str();
        let mut records = Vec::new();

        let must_close = match (action, ctx.position) {
            (Action::Close, Some(_)) => true,
            (Action::Open(side), Some(p)) => p.side != side,
            _ => false,
        };
        if must_close {
            let record = self.close(broker, instrument).await;
            let failed = record.is_failed();
            records.push(record);
            if failed {
                warn!("{}: close failed, not opening a new position", instrument);
                return Ok(records);
            }
        }

        if let Action::Open(side) = action {
            if ctx.position.is_some_and(|p| p.side == side) {
                return Ok(records);
            }
            let request = OrderRequest {
                instrument: instrument.to_string(),
                side,
                units: self.design_units(ctx),
                limits: self.design_limits(side, ctx.price, ctx.instrument),
                precision: ctx.instrument.display_precision,
            };
            debug!("{}: order request {:?}", instrument, request);
            records.push(self.open(broker, &request).await?);
        }
        Ok(records)
    }

    async fn close<B: BrokerClient>(&self, broker: &B, instrument: &str) -> OrderRecord {
        let args = serde_json::json!({ "instrument": instrument });
        info!("Close a position: {}", instrument);
        if self.mode == ExecutionMode::DryRun {
            info!("[dry-run] close_position {}", args);
            return OrderRecord::new("close_position", args, OrderOutcome::DryRun);
        }
        match broker.close_position(instrument).await {
            Ok(result) => OrderRecord::new("close_position", args, OrderOutcome::Filled(result.response)),
            Err(e) => {
                error!("close_position {} failed: {}", args, e);
                OrderRecord::new("close_position", args, OrderOutcome::Failed(e.to_string()))
            }
        }
    }

    async fn open<B: BrokerClient>(&self, broker: &B, request: &OrderRequest) -> EngineResult<OrderRecord> {
        let args = serde_json::to_value(request)?;
        if request.units == 0 {
            warn!("{}: no units available, order skipped", request.instrument);
            return Ok(OrderRecord::new(
                "create_order",
                args,
                OrderOutcome::Skipped("zero units".to_string()),
            ));
        }
        info!("Open an order: {} {}", request.instrument, request.side);
        if self.mode == ExecutionMode::DryRun {
            info!("[dry-run] create_order {}", args);
            return Ok(OrderRecord::new("create_order", args, OrderOutcome::DryRun));
        }
        Ok(match broker.create_order(request).await {
            Ok(result) => OrderRecord::new("create_order", args, OrderOutcome::Filled(result.response)),
            Err(e) => {
                error!("create_order {} failed: {}", args, e);
                OrderRecord::new("create_order", args, OrderOutcome::Failed(e.to_string()))
            }
        })
    }
}
