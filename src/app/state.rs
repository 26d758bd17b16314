//! Application state management.
//!
//! This module provides the shared application state that is
//! accessible to all request handlers via Axum's State extractor.

use std::sync::Arc;

use crate::infra::observability::PrometheusHandle;

use super::reconciler::Reconciler;
use super::service::AppService;

/// Shared application state for the Axum web server.
///
/// All contained types are wrapped in `Arc` and implement `Send + Sync`,
/// making `AppState` safe to share across async tasks.
#[derive(Clone)]
pub struct AppState {
    /// Staging and health checks.
    pub service: Arc<AppService>,

    /// The engine behind `POST /reconcile` and the background worker.
    pub reconciler: Arc<Reconciler>,

    /// `None` when no global recorder could be installed.
    pub metrics: Option<Arc<PrometheusHandle>>,
}

impl AppState {
    #[must_use]
    pub fn new(
        service: Arc<AppService>,
        reconciler: Arc<Reconciler>,
        metrics: Option<Arc<PrometheusHandle>>,
    ) -> Self {
        Self {
            service,
            reconciler,
            metrics,
        }
    }
}
