//! STAKEFLOW: Stake-Progression Trading Bot Engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod amount;
pub mod config;
pub mod types;
pub mod strategy;
pub mod risk;
pub mod engine;
pub mod storage;
pub mod dashboard;
