use std::sync::Arc;
use std::time::Duration;

use crate::core::cache::{QueryCache, TAG_AUDIT};
use crate::core::config::AppConfig;
use crate::llm::observability::Tracer;
use crate::llm::LLMProvider;
use crate::security::auth_api::AuthConfig;
use crate::core::shared::utils::DbPool;

pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub auth: Arc<AuthConfig>,
    pub llm_provider: Arc<dyn LLMProvider>,
    pub tracer: Arc<Tracer>,
    pub query_cache: QueryCache,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        conn: DbPool,
        llm_provider: Arc<dyn LLMProvider>,
        tracer: Arc<Tracer>,
    ) -> Self {
        let auth = Arc::new(AuthConfig::from_settings(&config.auth));
        let query_cache = QueryCache::new(Duration::from_secs(config.cache.ttl_seconds));
        Self {
            conn,
            config,
            auth,
            llm_provider,
            tracer,
            query_cache,
        }
    }

    /// Drops cached reads after a committed mutation. Every mutation also
    /// writes an audit row, so the audit tag is always included.
    pub async fn invalidate(&self, tags: &[&str]) {
        self.query_cache.invalidate_tags(tags).await;
        self.query_cache.invalidate_tag(TAG_AUDIT).await;
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("server", &self.config.server)
            .field("llm_model", &self.llm_provider.model_name())
            .finish_non_exhaustive()
    }
}
