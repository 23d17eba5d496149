//! API shared state

use std::sync::Arc;

use crate::service::MetricsService;
use crate::signing::Signer;
use crate::storage::StorageBackend;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub metrics: MetricsService,

    /// Signs response bodies when set
    pub signer: Option<Signer>,
}

impl ApiState {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            metrics: MetricsService::new(storage),
            signer: None,
        }
    }

    pub fn with_signer(mut self, signer: Option<Signer>) -> Self {
        self.signer = signer;
        self
    }
}
