//! Middleware module for the Plaza HTTP server
//!
//! Provides:
//! - Global REST rate limiting (sliding window over the shared store)

pub mod rate_limit;
