// Library interface for swap402
// This allows the binary crate to import the modules

pub mod chain;
pub mod cli;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod prelude;
pub mod quote;
pub mod webapp;
pub mod x402;
