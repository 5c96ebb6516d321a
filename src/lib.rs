// Library crate - exports the decision engine and its collaborators

pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod model;
pub mod record;
pub mod streams;
pub mod types;

// Re-export commonly used types
pub use types::*;
pub use config::TraderConfig;
pub use engine::{CycleOutcome, DecisionEngine, EngineOptions, Turn};
pub use error::{EngineError, EngineResult};
