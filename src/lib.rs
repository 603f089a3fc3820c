//! BRACKETEER: protective bracket orders for crypto exchanges
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod resolver;
pub mod gateway;
pub mod engine;
