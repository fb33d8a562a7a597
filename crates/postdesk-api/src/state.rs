//! Application state.

use std::sync::Arc;

use postdesk_firestore::{FirestoreClient, VideoRepository};

use crate::auth::{DirectoryClient, JwksCache};
use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub firestore: Arc<FirestoreClient>,
    pub videos: VideoRepository,
    pub directory: Arc<DirectoryClient>,
    pub jwks: Arc<JwksCache>,
}

impl AppState {
    /// Create new application state.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let firestore = FirestoreClient::from_env().await?;
        let jwks = JwksCache::new().await?;

        let project_id = std::env::var("FIREBASE_PROJECT_ID")
            .or_else(|_| std::env::var("GCP_PROJECT_ID"))?;
        let directory = DirectoryClient::from_env(project_id)?;

        let firestore = Arc::new(firestore);
        let videos = VideoRepository::new(firestore.as_ref().clone());

        Ok(Self {
            config,
            firestore,
            videos,
            directory: Arc::new(directory),
            jwks: Arc::new(jwks),
        })
    }
}
