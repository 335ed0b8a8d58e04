//! Router state shared by every handler.

use std::sync::Arc;

use crate::request::RequestParser;
use crate::schema::SchemaValidator;
use crate::store::CarStore;

use super::config::HttpServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CarStore>,
    pub parser: RequestParser,
    pub config: Arc<HttpServerConfig>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn CarStore>,
        validator: Arc<SchemaValidator>,
        config: HttpServerConfig,
    ) -> Self {
        Self {
            store,
            parser: RequestParser::new(validator),
            config: Arc::new(config),
        }
    }

    pub fn validator(&self) -> &SchemaValidator {
        self.parser.validator()
    }
}
