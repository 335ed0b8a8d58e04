//! # Car Store
//!
//! Transactional persistence of the car entity and paginated search.
//!
//! Two implementations share one contract:
//!
//! - [`PostgresCarStore`]: production store over a `sqlx` connection pool
//! - [`MemoryCarStore`]: in-process store for local runs and tests
//!
//! Writes enforce that `(brand_name, model_name)` is unique and that the
//! caller's test flag matches the row's before an update or delete.

pub mod errors;
pub mod eval;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod sql;

use async_trait::async_trait;

pub use errors::{StoreError, StoreResult, BRAND_MODEL_INDEX, PRIMARY_KEY_CONSTRAINT};
pub use memory::MemoryCarStore;
pub use model::{
    Car, CarCreate, CarDelete, CarInput, CarPatch, CarRead, CarUpdate, CarsSearch, Pagination,
    SearchFilters, SortOrder, DEFAULT_LIMIT, MAX_LIMIT,
};
pub use postgres::{PostgresCarStore, PostgresConfig};

/// Persistence contract of the service
#[async_trait]
pub trait CarStore: Send + Sync + 'static {
    /// Inserts a new car and returns its id
    async fn create_car(&self, request: &CarCreate) -> StoreResult<String>;

    /// Returns the JSON encoding of one car
    async fn read_car(&self, request: &CarRead) -> StoreResult<Vec<u8>>;

    /// Applies a sparse update and bumps `date_updated`
    async fn update_car(&self, request: &CarUpdate) -> StoreResult<()>;

    /// Hard-deletes a car
    async fn delete_car(&self, request: &CarDelete) -> StoreResult<()>;

    /// Returns one page as a JSON array plus the filled-in pagination
    async fn search_cars(&self, request: &CarsSearch) -> StoreResult<(Vec<u8>, Pagination)>;

    /// Releases pooled resources
    async fn close(&self);

    /// Backend name for logs
    fn backend(&self) -> &'static str;
}

pub(crate) fn encode<T: serde::Serialize + ?Sized>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::internal(format!("encode car: {e}")))
}
