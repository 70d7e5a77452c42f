//! liqfade: liquidation-reversion trading bot for USDT-M perpetuals.
//!
//! Forced-order events on the venue's public stream are scored by a
//! multi-factor gate; qualifying liquidations are faded with a short-hold
//! reversion position managed by take-profit, stop-loss and time-stop
//! exits under a daily risk governor.

pub mod config;
pub mod control;
pub mod execution;
pub mod feeds;
pub mod models;
pub mod risk;
pub mod signals;
pub mod sink;
pub mod strategy;
pub mod telemetry;
