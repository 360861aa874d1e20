//! Transport layer for plsgate.
//!
//! HTTP via axum is the only transport.

pub mod http;

pub use http::{ErrorPages, routes, serve};
