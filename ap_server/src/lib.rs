//! HTTP surface for the arena_pay wallet, payment and escrow engine.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
