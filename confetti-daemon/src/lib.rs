//! Watch session runtime: filesystem watcher, resource reconciler and the
//! session wiring that connects them to the sync engine.

mod error;
pub mod reconciler;
mod runtime;
pub mod watcher;
pub mod watermark;

pub use error::DaemonError;
pub use reconciler::{ReconcilerConfig, ResourceReconciler};
pub use runtime::{
    auth_provider, init_tracing, repository_root, start_blocking, sync_all, watch, Session,
    WatchOptions, ACCESS_TOKEN_ENV, LOG_FORMAT_ENV,
};
pub use watcher::{EventHandler, Handled, SyncWatcher};
pub use watermark::ResourceWatermark;
