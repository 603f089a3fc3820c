//! Core engine: one bracket trade from entry to protective legs.

pub mod accountant;
pub mod controller;
pub mod executor;
