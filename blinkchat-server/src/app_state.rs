use std::sync::Arc;

use shared::config::server::Config;

use crate::{
    auth::{AuthError, TokenService},
    services::chat_service::ChatService,
    store::Stores,
    ws::{Hub, HubWorker},
};

// Application state that will be shared across all routes
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Stores,
    pub hub: Hub,
    pub chats: ChatService,
    pub tokens: TokenService,
    pub(crate) pool: Option<sqlx::PgPool>,
}

impl AppState {
    /// Wire the collaborators together. The returned worker must be spawned
    /// before any connection registers.
    ///
    /// # Errors
    /// Returns [`AuthError::Misconfigured`] when the token settings are unusable.
    pub fn new(
        config: Arc<Config>,
        stores: Stores,
        pool: Option<sqlx::PgPool>,
    ) -> Result<(Arc<Self>, HubWorker), AuthError> {
        let tokens = TokenService::from_config(&config.auth)?;
        let (hub, worker) = Hub::new(stores.clone(), config.websocket.clone());
        let state = Self {
            chats: ChatService::new(stores.clone()),
            config,
            stores,
            hub,
            tokens,
            pool,
        };
        Ok((Arc::new(state), worker))
    }

    /// In-memory state with a running hub worker. Needs a tokio runtime.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Arc<Self> {
        let (state, worker) = Self::new(Arc::new(Config::for_tests()), Stores::in_memory(), None)
            .expect("test config is valid");
        tokio::spawn(worker.run());
        state
    }
}
