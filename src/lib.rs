//! Floodgate - Sliding-Window Rate Limiting
//!
//! This crate implements a multi-strategy sliding-window rate limiting
//! subsystem: accurate distributed request counting backed by an ordered-set
//! store, automatic degradation to an in-process fallback when the shared
//! store is unreachable, composable admission policies, and threshold-based
//! anomaly alerting. Callers embed it as a library and translate `Decision`
//! values into their own over-limit responses.

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod limiter;
pub mod monitor;
pub mod store;
