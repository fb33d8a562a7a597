//! Cached Google OAuth access tokens.
//!
//! One refresh in flight at a time; readers share the cached token until
//! it gets within the refresh margin of expiry. A failed refresh falls
//! back to the previous token while it is still technically usable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gcp_auth::TokenProvider;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{FirestoreError, FirestoreResult};

/// Start refreshing this long before the token actually expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Assumed TTL when the provider reports no usable expiry.
const FALLBACK_TTL: Duration = Duration::from_secs(50 * 60);

/// OAuth scope for Firestore/Datastore access.
pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn fresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN < self.expires_at
    }

    fn usable(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Shared token cache over a [`TokenProvider`].
pub struct TokenCache {
    auth: Arc<dyn TokenProvider>,
    scopes: &'static [&'static str],
    cache: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    /// Cache tokens for the Firestore scope.
    pub fn new(auth: Arc<dyn TokenProvider>) -> Self {
        Self::with_scopes(auth, &[FIRESTORE_SCOPE])
    }

    /// Cache tokens for a different Google API scope set.
    pub fn with_scopes(auth: Arc<dyn TokenProvider>, scopes: &'static [&'static str]) -> Self {
        Self {
            auth,
            scopes,
            cache: RwLock::new(None),
        }
    }

    /// Drop the cached token, forcing a refresh on the next request.
    pub async fn invalidate(&self) {
        self.cache.write().await.take();
    }

    /// A valid access token, refreshed if the cached one has gone stale.
    pub async fn get_token(&self) -> FirestoreResult<String> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.fresh() {
                return Ok(cached.access_token.clone());
            }
        }

        let mut slot = self.cache.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(cached) = slot.as_ref() {
            if cached.fresh() {
                return Ok(cached.access_token.clone());
            }
        }

        self.refresh(&mut slot).await
    }

    async fn refresh(&self, slot: &mut Option<CachedToken>) -> FirestoreResult<String> {
        let token = match self.auth.token(self.scopes).await {
            Ok(token) => token,
            Err(e) => {
                // Keep serving the old token while it lasts.
                if let Some(cached) = slot.as_ref() {
                    if cached.usable() {
                        warn!("token refresh failed, reusing current token: {}", e);
                        return Ok(cached.access_token.clone());
                    }
                }
                return Err(FirestoreError::auth_error(format!(
                    "failed to obtain auth token: {}",
                    e
                )));
            }
        };

        let access_token = token.as_str().to_string();
        let expires_at = Instant::now() + remaining_ttl(token.expires_at());

        *slot = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at,
        });

        debug!("refreshed Google auth token");
        Ok(access_token)
    }
}

/// Time left on a token given its reported expiry. An expiry in the past
/// yields zero, which forces a refresh on the next request.
fn remaining_ttl(expiry: chrono::DateTime<Utc>) -> Duration {
    let now = Utc::now();
    if expiry <= now {
        return Duration::ZERO;
    }
    (expiry - now).to_std().unwrap_or(FALLBACK_TTL)
}
