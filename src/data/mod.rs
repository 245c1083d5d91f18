//! Data Module
//!
//! Shared state that outlives a single process.
//! - `store`: the [`SharedStore`] contract and trade records
//! - `database`: SQLite implementation shared across worker processes
//! - `memory`: in-process implementation

pub mod store;
pub mod database;
pub mod memory;

pub use database::SqliteStore;
pub use memory::MemoryStore;
pub use store::{SharedStore, TradeRecord};
