//! Clientgate - Per-Client Request Rate Limiting
//!
//! This crate implements an in-process rate limiter that counts requests per
//! client identifier within a fixed window. A background task clears all
//! counters once per window, and callers are told on every check whether a
//! client may proceed.

pub mod config;
pub mod error;
pub mod ratelimit;
