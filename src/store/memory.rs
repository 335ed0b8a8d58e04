//! In-memory car store.
//!
//! Holds every row in one ordered map behind an async lock. Each write takes
//! the lock for its whole duration, which gives the same isolation the
//! Postgres store gets from SERIALIZABLE transactions.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::errors::{StoreError, StoreResult, BRAND_MODEL_INDEX};
use super::eval;
use super::model::{Car, CarCreate, CarDelete, CarRead, CarUpdate, CarsSearch, Pagination, SortOrder};
use super::{encode, sql, CarStore};

#[derive(Debug, Default)]
struct Tables {
    cars: BTreeMap<String, Car>,
    last_write: Option<DateTime<Utc>>,
}

impl Tables {
    /// Store clock: microsecond precision, strictly increasing
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let next = match self.last_write {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_write = Some(next);
        next
    }

    fn holds_pair(&self, brand_name: &str, model_name: &str, except: Option<&str>) -> bool {
        self.cars.values().any(|car| {
            car.brand_name == brand_name
                && car.model_name == model_name
                && Some(car.car_id.as_str()) != except
        })
    }
}

/// In-process [`CarStore`]
#[derive(Debug, Default)]
pub struct MemoryCarStore {
    tables: RwLock<Tables>,
}

impl MemoryCarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of stored cars
    pub async fn len(&self) -> usize {
        self.tables.read().await.cars.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CarStore for MemoryCarStore {
    #[instrument(skip(self, request), fields(test = request.test))]
    async fn create_car(&self, request: &CarCreate) -> StoreResult<String> {
        let mut tables = self.tables.write().await;
        let input = &request.user_input;

        if tables.holds_pair(&input.brand_name, &input.model_name, None) {
            return Err(StoreError::AlreadyExists);
        }

        let car_id = Uuid::new_v4().to_string();
        let date_created = tables.tick();
        tables.cars.insert(
            car_id.clone(),
            Car {
                brand_name: input.brand_name.clone(),
                model_name: input.model_name.clone(),
                car_id: car_id.clone(),
                date_created,
                date_updated: None,
                test: request.test,
            },
        );

        debug!(car_id = %car_id, "car created");
        Ok(car_id)
    }

    #[instrument(skip(self, request), fields(car_id = %request.id))]
    async fn read_car(&self, request: &CarRead) -> StoreResult<Vec<u8>> {
        let tables = self.tables.read().await;
        let car = tables.cars.get(&request.id).ok_or(StoreError::NotFound)?;
        encode(car)
    }

    #[instrument(skip(self, request), fields(car_id = %request.id))]
    async fn update_car(&self, request: &CarUpdate) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let current = tables.cars.get(&request.id).ok_or(StoreError::NotFound)?;

        if current.test != request.test {
            return Err(StoreError::AccessForbiddenByTest);
        }
        if let Some(instant) = request.if_unmodified_since {
            if current.modified_since(instant) {
                return Err(StoreError::ModifiedSince);
            }
        }

        let patch = &request.user_input;
        let brand_name = patch
            .brand_name
            .clone()
            .unwrap_or_else(|| current.brand_name.clone());
        let model_name = patch
            .model_name
            .clone()
            .unwrap_or_else(|| current.model_name.clone());

        if tables.holds_pair(&brand_name, &model_name, Some(&request.id)) {
            return Err(StoreError::UniqueViolation {
                index: BRAND_MODEL_INDEX.to_string(),
            });
        }

        let date_updated = tables.tick();
        let car = tables.cars.get_mut(&request.id).ok_or(StoreError::NotFound)?;
        car.brand_name = brand_name;
        car.model_name = model_name;
        car.date_updated = Some(date_updated);

        debug!("car updated");
        Ok(())
    }

    #[instrument(skip(self, request), fields(car_id = %request.id))]
    async fn delete_car(&self, request: &CarDelete) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let current = tables.cars.get(&request.id).ok_or(StoreError::NotFound)?;
        if current.test != request.test {
            return Err(StoreError::AccessForbiddenByTest);
        }
        tables.cars.remove(&request.id);
        debug!("car deleted");
        Ok(())
    }

    #[instrument(skip(self, request), fields(limit = request.pagination.limit, offset = request.pagination.offset))]
    async fn search_cars(&self, request: &CarsSearch) -> StoreResult<(Vec<u8>, Pagination)> {
        let sequence = &request.filters.linked_filters;
        sql::check_filters(sequence)?;

        let tables = self.tables.read().await;
        let read_timestamp = Utc::now();

        let mut hits: Vec<&Car> = tables
            .cars
            .values()
            .filter(|car| eval::matches(sequence, car))
            .collect();
        hits.sort_by(|a, b| {
            let ordering = (a.date_created, &a.car_id).cmp(&(b.date_created, &b.car_id));
            match request.pagination.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        let total = hits.len() as u64;
        let offset = usize::try_from(request.pagination.offset).unwrap_or(usize::MAX);
        let page: Vec<&Car> = hits
            .into_iter()
            .skip(offset)
            .take(request.pagination.limit as usize)
            .collect();

        let pagination = Pagination {
            read_timestamp: Some(read_timestamp),
            total: Some(total),
            ..request.pagination.clone()
        };
        debug!(returned = page.len(), total, "cars searched");
        Ok((encode(&page)?, pagination))
    }

    async fn close(&self) {}

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{with_test_conjunction, Filter, FilterValue, LinkedFilter};
    use crate::store::model::{CarInput, CarPatch, SearchFilters};

    fn create(brand: &str, model: &str, test: bool) -> CarCreate {
        CarCreate {
            user_input: CarInput {
                brand_name: brand.into(),
                model_name: model.into(),
            },
            test,
        }
    }

    fn search(user: Vec<LinkedFilter>, test: bool, pagination: Pagination) -> CarsSearch {
        CarsSearch {
            filters: SearchFilters {
                linked_filters: with_test_conjunction(user, test),
                test,
            },
            pagination,
            integration_test: false,
        }
    }

    async fn read(store: &MemoryCarStore, id: &str) -> Car {
        let bytes = store
            .read_car(&CarRead {
                id: id.into(),
                test: false,
                integration_test: false,
            })
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let store = MemoryCarStore::new();
        let id = store.create_car(&create("Audi", "A4", false)).await.unwrap();

        let car = read(&store, &id).await;
        assert_eq!(car.car_id, id);
        assert_eq!(car.brand_name, "Audi");
        assert!(car.date_updated.is_none());
        assert!(!car.test);
    }

    #[tokio::test]
    async fn test_duplicate_pair_rejected() {
        let store = MemoryCarStore::new();
        store.create_car(&create("Audi", "A4", false)).await.unwrap();
        let err = store.create_car(&create("Audi", "A4", true)).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_rules() {
        let store = MemoryCarStore::new();
        let id = store.create_car(&create("Audi", "A4", false)).await.unwrap();
        store.create_car(&create("Audi", "A6", false)).await.unwrap();

        let mut update = CarUpdate {
            id: id.clone(),
            user_input: CarPatch {
                model_name: Some("A6".into()),
                ..CarPatch::default()
            },
            test: false,
            if_unmodified_since: None,
        };
        let err = store.update_car(&update).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { ref index } if index == BRAND_MODEL_INDEX));

        update.test = true;
        let err = store.update_car(&update).await.unwrap_err();
        assert!(matches!(err, StoreError::AccessForbiddenByTest));

        update.test = false;
        update.user_input.model_name = Some("A5".into());
        store.update_car(&update).await.unwrap();
        let car = read(&store, &id).await;
        assert_eq!(car.model_name, "A5");
        assert_eq!(car.brand_name, "Audi");
        let first_update = car.date_updated.unwrap();
        assert!(first_update > car.date_created);

        store.update_car(&update).await.unwrap();
        assert!(read(&store, &id).await.date_updated.unwrap() > first_update);

        update.if_unmodified_since = Some(car.date_created - Duration::seconds(10));
        let err = store.update_car(&update).await.unwrap_err();
        assert!(matches!(err, StoreError::ModifiedSince));
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let store = MemoryCarStore::new();
        let id = store.create_car(&create("Audi", "A4", true)).await.unwrap();

        let err = store
            .delete_car(&CarDelete {
                id: id.clone(),
                test: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AccessForbiddenByTest));

        let delete = CarDelete { id, test: true };
        store.delete_car(&delete).await.unwrap();
        let err = store.delete_car(&delete).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_search_pages_and_counts() {
        let store = MemoryCarStore::new();
        for model in ["A1", "A3", "A4", "A6"] {
            store.create_car(&create("Audi", model, false)).await.unwrap();
        }
        store.create_car(&create("BMW", "X5", false)).await.unwrap();
        store.create_car(&create("Audi", "Q7", true)).await.unwrap();

        let audi = vec![
            LinkedFilter::OPEN,
            LinkedFilter::Filter(Filter::eq("brand_name", FilterValue::String("Audi".into()))),
            LinkedFilter::CLOSE,
        ];
        let page = Pagination {
            limit: 3,
            ..Pagination::default()
        };
        let (bytes, pagination) = store.search_cars(&search(audi.clone(), false, page)).await.unwrap();
        let cars: Vec<Car> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(cars.len(), 3);
        assert_eq!(pagination.total, Some(4));
        assert!(pagination.read_timestamp.is_some());
        assert!(cars.windows(2).all(|w| w[0].date_created < w[1].date_created));
        assert!(cars.iter().all(|c| c.brand_name == "Audi" && !c.test));

        let page = Pagination {
            limit: 3,
            offset: 3,
            order: SortOrder::Desc,
            ..Pagination::default()
        };
        let (bytes, _) = store.search_cars(&search(audi, false, page)).await.unwrap();
        let cars: Vec<Car> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(cars.len(), 1);
        assert_eq!(cars[0].model_name, "A1");

        let page = Pagination {
            limit: 0,
            ..Pagination::default()
        };
        let (bytes, pagination) = store.search_cars(&search(Vec::new(), true, page)).await.unwrap();
        assert_eq!(bytes, b"[]");
        assert_eq!(pagination.total, Some(1));
    }

    #[tokio::test]
    async fn test_search_rejects_unknown_column() {
        let store = MemoryCarStore::new();
        let colour = vec![
            LinkedFilter::OPEN,
            LinkedFilter::Filter(Filter::eq("colour", FilterValue::String("red".into()))),
            LinkedFilter::CLOSE,
        ];
        let err = store
            .search_cars(&search(colour, false, Pagination::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidFilter(_)));
    }
}
