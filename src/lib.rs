//! Trade-lifecycle orchestration for multi-leg options strategies.
//!
//! The crate runs one trade through its stages — entry, protective stops,
//! and exit monitoring — against an unreliable remote broker. Every remote
//! interaction goes through the retry engine or the order reconciler, every
//! stage transition through the job queue, so a lifecycle survives process
//! restarts and broker flakiness without ever re-placing an order blindly.

pub mod broker;
pub mod config;
pub mod domain;
pub mod error;
pub mod exit_strategies;
pub mod indicator;
pub mod queue;
pub mod remote;
pub mod store;
pub mod strategies;
pub mod util;

pub use config::AppConfig;
pub use error::{LegworkError, Result};
pub use exit_strategies::{Capabilities, StrategyOutcome};
