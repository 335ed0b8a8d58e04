//! PostgreSQL car store.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::query::FilterValue;

use super::errors::{StoreError, StoreResult, BRAND_MODEL_INDEX};
use super::model::{Car, CarCreate, CarDelete, CarRead, CarUpdate, CarsSearch, Pagination};
use super::{encode, sql, CarStore};

/// Default statement budget in seconds
const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Attempts after the first for a transaction aborted by a conflict
const DEFAULT_MAX_RETRIES: u32 = 3;

const RETRY_BASE_DELAY_MS: u64 = 20;

const CAR_COLUMNS: &str = "car_id, brand_name, model_name, test, date_created, date_updated";

/// PostgreSQL connection settings
#[derive(Clone)]
pub struct PostgresConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    /// Budget for one store operation, retries included
    pub query_timeout_secs: u64,
    pub max_retries: u32,
}

// Hide credentials carried in the URL
impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/car_svc".to_string(),
            max_connections: 10,
            connect_timeout_secs: 10,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// [`CarStore`] over a PostgreSQL pool
pub struct PostgresCarStore {
    pool: PgPool,
    query_timeout: Duration,
    max_retries: u32,
}

#[derive(Debug, Clone, Copy)]
enum Isolation {
    /// Read-write, retried on serialization failure
    Serializable,
    /// Read-only snapshot
    Snapshot,
}

impl Isolation {
    fn statement(&self) -> &'static str {
        match self {
            Isolation::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE, READ WRITE",
            Isolation::Snapshot => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY",
        }
    }
}

impl PostgresCarStore {
    /// Wraps an existing pool with default timeouts
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Connects a new pool
    #[instrument(skip(config))]
    pub async fn from_config(config: &PostgresConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| StoreError::Unavailable {
                message: e.to_string(),
            })?;

        info!(max_connections = config.max_connections, "connected to postgres");

        Ok(Self {
            pool,
            query_timeout: Duration::from_secs(config.query_timeout_secs),
            max_retries: config.max_retries,
        })
    }

    /// Creates the `car` table and its indexes when missing
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> StoreResult<()> {
        debug!("running migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS car (
                car_id TEXT NOT NULL,
                brand_name TEXT NOT NULL,
                model_name TEXT NOT NULL,
                test BOOLEAN NOT NULL DEFAULT FALSE,
                date_created TIMESTAMPTZ NOT NULL,
                date_updated TIMESTAMPTZ NULL,
                CONSTRAINT car_pkey PRIMARY KEY (car_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON car (brand_name, model_name)",
            BRAND_MODEL_INDEX
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS car_date_created_car_id_idx ON car (date_created, car_id)",
        )
        .execute(&self.pool)
        .await?;

        info!("migrations complete");
        Ok(())
    }

    async fn execute_with_timeout<T, F>(&self, operation: &str, future: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.query_timeout, future).await {
            Ok(result) => result,
            Err(_elapsed) => Err(StoreError::DeadlineExceeded {
                operation: operation.to_string(),
                timeout: self.query_timeout,
            }),
        }
    }

    /// Runs a read-write transaction body, re-running it while the database
    /// aborts it for a conflict. The body must not have effects outside the
    /// transaction.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut body: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let attempts = async {
            let mut attempt = 0;
            loop {
                match body().await {
                    Err(err) if err.is_retryable() && attempt < self.max_retries => {
                        attempt += 1;
                        warn!(operation, attempt, error = %err, "retrying aborted transaction");
                        let delay = RETRY_BASE_DELAY_MS * 2u64.pow(attempt - 1);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                    result => return result,
                }
            }
        };
        self.execute_with_timeout(operation, attempts).await
    }

    async fn begin(&self, isolation: Isolation) -> StoreResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(isolation.statement()).execute(&mut *tx).await?;
        Ok(tx)
    }

    async fn fetch_car(
        tx: &mut Transaction<'static, Postgres>,
        id: &str,
    ) -> StoreResult<Option<Car>> {
        let row = sqlx::query(&format!("SELECT {} FROM car WHERE car_id = $1", CAR_COLUMNS))
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        row.map(|row| row_to_car(&row)).transpose()
    }

    async fn create_in_tx(&self, request: &CarCreate) -> StoreResult<String> {
        let input = &request.user_input;
        let mut tx = self.begin(Isolation::Serializable).await?;

        let existing: i64 = sqlx::query_scalar(
            "SELECT COUNT(car_id) FROM car WHERE brand_name = $1 AND model_name = $2",
        )
        .bind(input.brand_name.as_str())
        .bind(input.model_name.as_str())
        .fetch_one(&mut *tx)
        .await?;
        if existing > 0 {
            return Err(StoreError::AlreadyExists);
        }

        let car_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO car (car_id, brand_name, model_name, test, date_created)
            VALUES ($1, $2, $3, $4, clock_timestamp())
            "#,
        )
        .bind(car_id.as_str())
        .bind(input.brand_name.as_str())
        .bind(input.model_name.as_str())
        .bind(request.test)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(car_id)
    }

    async fn update_in_tx(&self, request: &CarUpdate) -> StoreResult<()> {
        let mut tx = self.begin(Isolation::Serializable).await?;

        let car = Self::fetch_car(&mut tx, &request.id)
            .await?
            .ok_or(StoreError::NotFound)?;
        if car.test != request.test {
            return Err(StoreError::AccessForbiddenByTest);
        }
        if let Some(instant) = request.if_unmodified_since {
            if car.modified_since(instant) {
                return Err(StoreError::ModifiedSince);
            }
        }

        let patch = &request.user_input;
        sqlx::query(
            r#"
            UPDATE car
            SET brand_name = COALESCE($2, brand_name),
                model_name = COALESCE($3, model_name),
                date_updated = GREATEST(
                    clock_timestamp(),
                    COALESCE(date_updated, date_created) + INTERVAL '1 microsecond'
                )
            WHERE car_id = $1
            "#,
        )
        .bind(request.id.as_str())
        .bind(patch.brand_name.as_deref())
        .bind(patch.model_name.as_deref())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_in_tx(&self, request: &CarDelete) -> StoreResult<()> {
        let mut tx = self.begin(Isolation::Serializable).await?;

        let test: Option<bool> = sqlx::query_scalar("SELECT test FROM car WHERE car_id = $1")
            .bind(request.id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        match test {
            None => return Err(StoreError::NotFound),
            Some(test) if test != request.test => return Err(StoreError::AccessForbiddenByTest),
            Some(_) => {}
        }

        sqlx::query("DELETE FROM car WHERE car_id = $1")
            .bind(request.id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn search_in_snapshot(&self, request: &CarsSearch) -> StoreResult<(Vec<u8>, Pagination)> {
        let clause = sql::build_where(None, &request.filters.linked_filters)?;
        let (where_sql, values) = clause.to_positional(1);
        let page = &request.pagination;
        let order = page.order.as_sql();

        let select = format!(
            "SELECT {} FROM car{} ORDER BY date_created {}, car_id {} LIMIT ${} OFFSET ${}",
            CAR_COLUMNS,
            where_sql,
            order,
            order,
            values.len() + 1,
            values.len() + 2
        );
        let count = format!("SELECT COUNT(car_id) FROM car{}", where_sql);
        debug!(sql = %select, params = values.len(), "search");

        let mut tx = self.begin(Isolation::Snapshot).await?;

        let rows = bind_all(sqlx::query(&select), &values)
            .bind(i64::from(page.limit))
            .bind(i64::try_from(page.offset).unwrap_or(i64::MAX))
            .fetch_all(&mut *tx)
            .await?;
        let total: i64 = bind_all(sqlx::query(&count), &values)
            .fetch_one(&mut *tx)
            .await?
            .try_get(0)?;
        let read_timestamp = chrono::Utc::now();

        tx.commit().await?;

        let cars = rows.iter().map(row_to_car).collect::<StoreResult<Vec<_>>>()?;
        let pagination = Pagination {
            read_timestamp: Some(read_timestamp),
            total: Some(u64::try_from(total).unwrap_or_default()),
            ..page.clone()
        };
        Ok((encode(&cars)?, pagination))
    }
}

fn row_to_car(row: &PgRow) -> StoreResult<Car> {
    Ok(Car {
        car_id: row.try_get("car_id")?,
        brand_name: row.try_get("brand_name")?,
        model_name: row.try_get("model_name")?,
        test: row.try_get("test")?,
        date_created: row.try_get("date_created")?,
        date_updated: row.try_get("date_updated")?,
    })
}

fn bind_all<'q>(
    query: Query<'q, Postgres, PgArguments>,
    values: &[FilterValue],
) -> Query<'q, Postgres, PgArguments> {
    values.iter().fold(query, |query, value| match value {
        FilterValue::Bool(b) => query.bind(*b),
        FilterValue::Int64(n) => query.bind(*n),
        FilterValue::Float64(f) => query.bind(*f),
        FilterValue::String(s) => query.bind(s.clone()),
        FilterValue::Datetime(t) => query.bind(*t),
        FilterValue::BoolArray(v) => query.bind(v.clone()),
        FilterValue::Int64Array(v) => query.bind(v.clone()),
        FilterValue::Float64Array(v) => query.bind(v.clone()),
        FilterValue::StringArray(v) => query.bind(v.clone()),
        FilterValue::DatetimeArray(v) => query.bind(v.clone()),
    })
}

#[async_trait]
impl CarStore for PostgresCarStore {
    #[instrument(skip(self, request), fields(test = request.test))]
    async fn create_car(&self, request: &CarCreate) -> StoreResult<String> {
        let car_id = self
            .with_retry("create_car", || self.create_in_tx(request))
            .await?;
        debug!(car_id = %car_id, "car created");
        Ok(car_id)
    }

    #[instrument(skip(self, request), fields(car_id = %request.id))]
    async fn read_car(&self, request: &CarRead) -> StoreResult<Vec<u8>> {
        let car = self
            .execute_with_timeout("read_car", async {
                let row = sqlx::query(&format!("SELECT {} FROM car WHERE car_id = $1", CAR_COLUMNS))
                    .bind(request.id.as_str())
                    .fetch_optional(&self.pool)
                    .await?
                    .ok_or(StoreError::NotFound)?;
                row_to_car(&row)
            })
            .await?;
        encode(&car)
    }

    #[instrument(skip(self, request), fields(car_id = %request.id))]
    async fn update_car(&self, request: &CarUpdate) -> StoreResult<()> {
        self.with_retry("update_car", || self.update_in_tx(request)).await?;
        debug!("car updated");
        Ok(())
    }

    #[instrument(skip(self, request), fields(car_id = %request.id))]
    async fn delete_car(&self, request: &CarDelete) -> StoreResult<()> {
        self.with_retry("delete_car", || self.delete_in_tx(request)).await?;
        debug!("car deleted");
        Ok(())
    }

    #[instrument(skip(self, request), fields(limit = request.pagination.limit, offset = request.pagination.offset))]
    async fn search_cars(&self, request: &CarsSearch) -> StoreResult<(Vec<u8>, Pagination)> {
        self.execute_with_timeout("search_cars", self.search_in_snapshot(request))
            .await
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("postgres pool closed");
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_debug_hides_url() {
        let config = PostgresConfig {
            database_url: "postgres://user:secret@db/cars".into(),
            ..PostgresConfig::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("max_connections: 10"));
    }

    #[test]
    fn test_isolation_statements() {
        assert!(Isolation::Serializable.statement().contains("SERIALIZABLE"));
        assert!(Isolation::Snapshot.statement().contains("REPEATABLE READ, READ ONLY"));
    }

    #[tokio::test]
    async fn test_lazy_pool_times_out_as_unavailable() {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(50))
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .unwrap();
        let store = PostgresCarStore::new(pool);
        let err = store
            .read_car(&CarRead {
                id: "x".into(),
                test: false,
                integration_test: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Unavailable { .. } | StoreError::DeadlineExceeded { .. }
        ));
    }
}
