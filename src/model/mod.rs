//! Decision core: rate cache, features, granularity sieve, detectors, sizing and the state machine

pub mod bet;
pub mod cache;
pub mod decision;
pub mod ewma;
pub mod feature;
pub mod kalman;
pub mod sieve;
pub mod signal;

pub use bet::{BetStrategy, BettingSizer};
pub use cache::{RateCache, RateWindow};
pub use decision::{decide, Action, Decision, DecisionInput, DecisionState};
pub use feature::{FeatureKind, FeatureSample, FeatureSeries};
pub use sieve::{GranularitySieve, SieveResult};
pub use signal::{Estimate, ModelKind, SignalAction, SignalModel, SignalResult};
