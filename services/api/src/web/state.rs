//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use sapt_core::ports::{DocumentStore, IdentityProvider};
use sapt_core::{AuthService, DataAccess};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub data: DataAccess,
    pub auth: AuthService,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires the core services on top of one store and one identity provider.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        config: Arc<Config>,
    ) -> Self {
        let data = DataAccess::new(store);
        let auth = AuthService::new(identity, data.clone());
        Self { data, auth, config }
    }
}
