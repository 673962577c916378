//! HTTP API Module
//!
//! Provides a REST API over the quorum table.

mod http;

pub use http::{AppState, HttpServer};
