use std::sync::Arc;

use crate::config::ServerConfig;
use crate::db::SecurityRepository;
use crate::external::ObjectStore;
use crate::services::security_service::PageLimits;

#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn SecurityRepository>,
    pub object_store: Option<Arc<dyn ObjectStore>>,
    pub server: Arc<ServerConfig>,
}

impl AppState {
    pub fn limits(&self) -> PageLimits {
        PageLimits::from(self.server.as_ref())
    }
}
