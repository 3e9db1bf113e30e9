//! Data ingestion for the tick simulator.
//!
//! This crate handles:
//! - Tick loading (CSV files, in-memory buffers)
//! - Contract reference data loading

pub mod contract_loader;
pub mod tick_loader;

pub use contract_loader::load_contracts;
pub use tick_loader::{CsvTickLoader, MemoryTickSource, TickSource};
