//! Multi-exchange market data feeders, hot-coin ranking and a replayable
//! strategy executor.

pub mod adapter;
pub mod config;
pub mod error;
pub mod executor;
pub mod feed;
pub mod logging;
pub mod market;
pub mod ranker;
pub mod strategy;
