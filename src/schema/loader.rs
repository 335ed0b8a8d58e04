//! Schema loader for loading schemas once at startup
//!
//! - The service knows a fixed set of schema names
//! - Built-in definitions are embedded in the binary
//! - A schema directory, when configured, replaces them; it must hold one
//!   `<name>.json` file per schema
//! - Missing or malformed schemas cause startup failure (FATAL)

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::errors::{SchemaError, SchemaResult};
use super::types::Schema;

pub const CAR_CREATE: &str = "car_create";
pub const CAR_UPDATE: &str = "car_update";
pub const CARS_SEARCH: &str = "cars_search";
pub const CAR: &str = "car";
pub const CARS: &str = "cars";

/// Every schema the service loads
pub const SCHEMA_NAMES: [&str; 5] = [CAR_CREATE, CAR_UPDATE, CARS_SEARCH, CAR, CARS];

fn embedded_definition(name: &str) -> Option<&'static str> {
    match name {
        CAR_CREATE => Some(include_str!("../../schemas/car_create.json")),
        CAR_UPDATE => Some(include_str!("../../schemas/car_update.json")),
        CARS_SEARCH => Some(include_str!("../../schemas/cars_search.json")),
        CAR => Some(include_str!("../../schemas/car.json")),
        CARS => Some(include_str!("../../schemas/cars.json")),
        _ => None,
    }
}

/// In-memory registry of compiled schemas
#[derive(Debug, Clone)]
pub struct SchemaLoader {
    /// Directory the schemas were read from, `None` for the embedded set
    schema_dir: Option<PathBuf>,
    schemas: HashMap<String, Schema>,
}

impl SchemaLoader {
    /// Loads the embedded definitions
    pub fn embedded() -> SchemaResult<Self> {
        let mut schemas = HashMap::new();
        for name in SCHEMA_NAMES {
            let text = embedded_definition(name).ok_or_else(|| SchemaError::unknown_schema(name))?;
            schemas.insert(name.to_string(), Schema::parse(name, text)?);
        }
        Ok(Self {
            schema_dir: None,
            schemas,
        })
    }

    /// Loads every schema from `<dir>/<name>.json`
    pub fn from_dir(dir: &Path) -> SchemaResult<Self> {
        let mut schemas = HashMap::new();
        for name in SCHEMA_NAMES {
            let path = dir.join(format!("{}.json", name));
            let text = fs::read_to_string(&path).map_err(|e| {
                SchemaError::malformed_schema(
                    name,
                    format!("Failed to read {}: {}", path.display(), e),
                )
            })?;
            schemas.insert(name.to_string(), Schema::parse(name, &text)?);
        }
        Ok(Self {
            schema_dir: Some(dir.to_path_buf()),
            schemas,
        })
    }

    /// Loads from `dir` when given, the embedded set otherwise
    pub fn load(dir: Option<&Path>) -> SchemaResult<Self> {
        let loader = match dir {
            Some(dir) => Self::from_dir(dir)?,
            None => Self::embedded()?,
        };
        tracing::info!(
            schemas = loader.schemas.len(),
            dir = ?loader.schema_dir,
            "schemas loaded"
        );
        Ok(loader)
    }

    pub fn schema_dir(&self) -> Option<&Path> {
        self.schema_dir.as_deref()
    }

    /// Gets a schema by name.
    pub fn get(&self, name: &str) -> SchemaResult<&Schema> {
        self.schemas
            .get(name)
            .ok_or_else(|| SchemaError::unknown_schema(name))
    }

    /// Checks if a schema exists.
    pub fn exists(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Returns the number of loaded schemas.
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
