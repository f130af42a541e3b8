pub mod api;
pub mod config;
pub mod credits;
pub mod db;
pub mod error;
pub mod gateway;
pub mod net;
pub mod providers;
pub mod usage;

use std::sync::Arc;

use crate::config::Config;
use crate::gateway::Gateway;
use crate::usage::SqliteUsageStore;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub gateway: Arc<Gateway>,
    /// Persisted usage, for admin totals. `None` when usage goes elsewhere.
    pub usage_store: Option<Arc<SqliteUsageStore>>,
}
