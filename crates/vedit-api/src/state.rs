//! Application state.

use std::sync::Arc;

use vedit_models::StageName;
use vedit_queue::{RedisStageQueue, StageQueue};
use vedit_store::{JobStore, RedisJobStore};

use crate::auth::{IdentityVerifier, JwtVerifier};
use crate::config::ApiConfig;
use crate::services::JobService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn StageQueue>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub jobs: JobService,
}

impl AppState {
    /// Create state backed by Redis and the HS256 verifier.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let secret = config
            .jwt_secret
            .clone()
            .ok_or("AUTH_JWT_SECRET must be set")?;
        let identity = JwtVerifier::new(&secret, config.jwt_issuer.as_deref());

        let store = RedisJobStore::from_env()?;
        let queue = RedisStageQueue::from_env()?;
        queue.init(StageName::ALL).await?;

        Ok(Self::from_parts(
            config,
            Arc::new(store),
            Arc::new(queue),
            Arc::new(identity),
        ))
    }

    /// Assemble state from existing collaborators.
    pub fn from_parts(
        config: ApiConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn StageQueue>,
        identity: Arc<dyn IdentityVerifier>,
    ) -> Self {
        let config = Arc::new(config);
        let jobs = JobService::new(Arc::clone(&config), Arc::clone(&store), Arc::clone(&queue));

        Self {
            config,
            store,
            queue,
            identity,
            jobs,
        }
    }
}
