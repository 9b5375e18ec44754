use std::sync::Arc;

use crate::config::{AuthConfig, IngestConfig};
use crate::persistence::{JobBroker, Store};
use crate::services::Metrics;

/// Shared state for the ingest router.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub broker: JobBroker,
    pub auth: Arc<AuthConfig>,
    pub ingest: Arc<IngestConfig>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(store: Store, broker: JobBroker, auth: AuthConfig, ingest: IngestConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            broker,
            auth: Arc::new(auth),
            ingest: Arc::new(ingest),
            metrics,
        }
    }
}
