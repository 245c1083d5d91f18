//! Sentinel Library
//!
//! Decision and execution core of a multi-asset trading agent.
//!
//! # Pipeline
//!
//! - Regime classification from a price window
//! - Four-pillar confidence score against a dynamic threshold
//! - Soft strategy / regime suitability
//! - Execution coordinator: one position per asset at a time, across tasks
//!   and across worker processes sharing a store
//! - Risk circuits: breakeven lock, trailing stop, profit-drawdown exit

pub mod core;
pub mod broker;
pub mod data;
pub mod config;
pub mod error;
pub mod signals;
pub mod status;

pub use crate::error::ExecutionError;
