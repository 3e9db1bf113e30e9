//! Core types and configuration for the tick simulator.
//!
//! This crate provides shared types used across all other crates:
//! - Market data and order types (ticks, orders, positions, account)
//! - Contract reference data
//! - Configuration structures
//! - Common error types

pub mod config;
pub mod contract;
pub mod error;
pub mod types;

pub use config::Config;
pub use contract::{ContractInfo, ContractProvider, ContractTable};
pub use error::{Error, Result};
pub use types::*;
