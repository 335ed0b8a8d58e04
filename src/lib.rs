//! car-svc - HTTP CRUD and search over a single car entity
//!
//! Layers, leaves first: schema validation, search query decoding, the car
//! store, request binding and the axum front end.

pub mod cli;
pub mod config;
pub mod errors;
pub mod http_server;
pub mod observability;
pub mod query;
pub mod request;
pub mod schema;
pub mod store;
