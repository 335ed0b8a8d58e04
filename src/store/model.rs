//! Car entity and the request types the store operates on.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::query::LinkedFilter;

/// Default page size
pub const DEFAULT_LIMIT: u32 = 100;

/// Maximum page size
pub const MAX_LIMIT: u32 = 1000;

/// Persisted car row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Car {
    pub brand_name: String,
    pub model_name: String,
    pub car_id: String,
    pub date_created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_updated: Option<DateTime<Utc>>,
    pub test: bool,
}

impl Car {
    /// Instant of the last write to the row
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.date_updated.unwrap_or(self.date_created)
    }

    /// HTTP dates have whole-second precision, so against a whole-second
    /// instant the row counts as modified only when its last write falls in
    /// a later second. Sub-second instants are compared exactly.
    pub fn modified_since(&self, instant: DateTime<Utc>) -> bool {
        let last = self.last_modified();
        if instant.timestamp_subsec_nanos() == 0 {
            last.trunc_subsecs(0) > instant
        } else {
            last > instant
        }
    }
}

/// User-supplied fields of a new car
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarInput {
    pub brand_name: String,
    pub model_name: String,
}

/// User-supplied fields of an update; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

impl CarPatch {
    pub fn is_empty(&self) -> bool {
        self.brand_name.is_none() && self.model_name.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarCreate {
    pub user_input: CarInput,
    pub test: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarRead {
    pub id: String,
    pub test: bool,
    pub integration_test: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarUpdate {
    pub id: String,
    pub user_input: CarPatch,
    pub test: bool,
    /// Reject the update when the row changed after this instant
    pub if_unmodified_since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarDelete {
    pub id: String,
    pub test: bool,
}

/// Search expression already scoped to the caller's test flag
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFilters {
    pub linked_filters: Vec<LinkedFilter>,
    pub test: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CarsSearch {
    pub filters: SearchFilters,
    pub pagination: Pagination,
    pub integration_test: bool,
}

/// Sort direction over `(date_created, car_id)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Page request; `read_timestamp` and `total` are filled by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u64,
    pub order: SortOrder,
    pub cursor: String,
    pub read_timestamp: Option<DateTime<Utc>>,
    pub total: Option<u64>,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
            order: SortOrder::Asc,
            cursor: String::new(),
            read_timestamp: None,
            total: None,
        }
    }
}
