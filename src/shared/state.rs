use std::sync::Arc;

use crate::config::AppConfig;
use crate::tickets::lifecycle::TicketLifecycle;
use crate::tickets::store::TicketStore;

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn TicketStore>,
    pub lifecycle: Arc<TicketLifecycle>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }
}
