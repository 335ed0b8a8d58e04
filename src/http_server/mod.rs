//! # HTTP Server Module
//!
//! The axum front end of the car service.
//!
//! # Endpoints
//!
//! - `GET /car-svc?health=true` - Health check
//! - `POST /car-svc/v1/cars` - Create a car
//! - `GET /car-svc/v1/cars` - Search cars
//! - `GET|PUT|DELETE /car-svc/v1/cars/:id` - Read, update or delete one car

pub mod config;
pub mod health;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::{BuildInfo, HttpServerConfig};
pub use health::{HealthResponse, HEALTH_PATH};
pub use routes::CARS_PATH;
pub use server::{build_router, HttpServer, ServerError};
pub use state::AppState;
