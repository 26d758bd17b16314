//! Application layer containing business logic and shared state.

pub mod reconciler;
pub mod service;
pub mod state;
pub mod worker;

pub use reconciler::{EntityStores, Reconciler, StoredIn};
pub use service::AppService;
pub use state::AppState;
pub use worker::{ReconcileWorker, WorkerConfig, spawn_worker};
