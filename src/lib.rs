//! Ephemeral containerized test ledgers for integration tests.

pub mod cli;
pub mod config;
pub mod error;
pub mod ledger;
pub mod testing;
