//! Firebase ID token authentication and user directory lookups.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use postdesk_firestore::TokenCache;

use crate::error::ApiError;
use crate::state::AppState;

/// Google JWKS URL for Firebase Auth.
const GOOGLE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Firebase token issuer prefix.
const FIREBASE_ISSUER_PREFIX: &str = "https://securetoken.google.com/";

/// JWKS cache TTL.
const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600); // 1 hour

/// Identity Toolkit scope for account lookups.
const IDENTITY_TOOLKIT_SCOPES: &[&str] = &["https://www.googleapis.com/auth/identitytoolkit"];

/// Decoded Firebase ID token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirebaseClaims {
    /// User ID
    pub sub: String,
    /// Email (if available)
    pub email: Option<String>,
    /// Email verified
    pub email_verified: Option<bool>,
    /// Issuer
    pub iss: String,
    /// Audience (Firebase project ID)
    pub aud: String,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
}

impl From<FirebaseClaims> for AuthUser {
    fn from(claims: FirebaseClaims) -> Self {
        Self {
            uid: claims.sub,
            email: claims.email,
        }
    }
}

/// JWKS response from Google.
#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkKey>,
}

#[derive(Debug, Clone, Deserialize)]
struct JwkKey {
    kid: String,
    n: String,
    e: String,
}

/// Cached JWKS keys.
pub struct JwksCache {
    http: Client,
    keys: RwLock<HashMap<String, DecodingKey>>,
    last_refresh: RwLock<Instant>,
    project_id: String,
}

impl JwksCache {
    /// Create a new JWKS cache and fetch the initial key set.
    pub async fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let project_id = std::env::var("FIREBASE_PROJECT_ID")
            .or_else(|_| std::env::var("GCP_PROJECT_ID"))?;

        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;

        let cache = Self {
            http,
            keys: RwLock::new(HashMap::new()),
            last_refresh: RwLock::new(Instant::now() - JWKS_CACHE_TTL),
            project_id,
        };

        cache.refresh_keys().await?;

        Ok(cache)
    }

    #[cfg(test)]
    fn empty_for_tests(project_id: &str) -> Self {
        Self {
            http: Client::new(),
            keys: RwLock::new(HashMap::new()),
            last_refresh: RwLock::new(Instant::now()),
            project_id: project_id.to_string(),
        }
    }

    /// Refresh JWKS keys from Google.
    async fn refresh_keys(&self) -> Result<(), Box<dyn std::error::Error>> {
        debug!("Refreshing JWKS keys");

        let response = self.http.get(GOOGLE_JWKS_URL).send().await?;
        let jwks: JwksResponse = response.json().await?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)?;
            keys.insert(jwk.kid, key);
        }

        let key_count = keys.len();
        *self.keys.write().await = keys;
        *self.last_refresh.write().await = Instant::now();

        debug!("Refreshed {} JWKS keys", key_count);
        Ok(())
    }

    /// Get decoding key for a key ID.
    async fn get_key(&self, kid: &str) -> Option<DecodingKey> {
        let needs_refresh = {
            let last = self.last_refresh.read().await;
            last.elapsed() > JWKS_CACHE_TTL
        };

        if needs_refresh {
            if let Err(e) = self.refresh_keys().await {
                warn!("Failed to refresh JWKS keys: {}", e);
            }
        }

        self.keys.read().await.get(kid).cloned()
    }

    /// Verify a Firebase ID token.
    pub async fn verify_token(&self, token: &str) -> Result<FirebaseClaims, ApiError> {
        let header = decode_header(token)
            .map_err(|e| ApiError::unauthorized(format!("Invalid token header: {}", e)))?;

        let kid = header
            .kid
            .ok_or_else(|| ApiError::unauthorized("Token missing key ID"))?;

        let key = self
            .get_key(&kid)
            .await
            .ok_or_else(|| ApiError::unauthorized("Unknown key ID"))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[format!("{}{}", FIREBASE_ISSUER_PREFIX, self.project_id)]);
        validation.set_audience(&[&self.project_id]);

        let token_data = decode::<FirebaseClaims>(token, &key, &validation)
            .map_err(|e| ApiError::unauthorized(format!("Token validation failed: {}", e)))?;

        Ok(token_data.claims)
    }
}

/// Extract the bearer token from an Authorization header value.
fn parse_bearer(header: Option<&str>) -> Result<&str, ApiError> {
    let header = header.ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;
    header
        .strip_prefix("Bearer ")
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Invalid Authorization header format"))
}

/// Axum extractor for authenticated user.
#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok());

        let token = parse_bearer(auth_header)?;
        let claims = state.jwks.verify_token(token).await?;

        Ok(AuthUser::from(claims))
    }
}

// =============================================================================
// User Directory
// =============================================================================

#[derive(Debug, Deserialize)]
struct LookupResponse {
    users: Option<Vec<LookupUser>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
}

/// Resolves Firebase UIDs to display names via the Identity Toolkit API.
///
/// Lookups are best-effort: claim and create flows still need a name when the
/// directory is unreachable, so failures fall back to the email and finally
/// the uid itself.
pub struct DirectoryClient {
    http: Client,
    tokens: TokenCache,
    project_id: String,
}

impl DirectoryClient {
    pub fn new(provider: Arc<dyn TokenProvider>, project_id: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            tokens: TokenCache::with_scopes(provider, IDENTITY_TOOLKIT_SCOPES),
            project_id: project_id.into(),
        }
    }

    /// Create from GOOGLE_APPLICATION_CREDENTIALS.
    pub fn from_env(project_id: impl Into<String>) -> Result<Self, Box<dyn std::error::Error>> {
        let service_account = CustomServiceAccount::from_env()?
            .ok_or("GOOGLE_APPLICATION_CREDENTIALS not set")?;
        Ok(Self::new(Arc::new(service_account), project_id))
    }

    /// Resolve a uid to a human-readable name.
    pub async fn display_name(&self, uid: &str) -> String {
        match self.lookup(uid).await {
            Ok(Some(user)) => user
                .display_name
                .filter(|n| !n.is_empty())
                .or(user.email)
                .unwrap_or_else(|| uid.to_string()),
            Ok(None) => {
                warn!(uid, "account lookup returned no user");
                uid.to_string()
            }
            Err(e) => {
                warn!(uid, error = %e, "account lookup failed");
                uid.to_string()
            }
        }
    }

    async fn lookup(&self, uid: &str) -> Result<Option<LookupUser>, ApiError> {
        let token = self.tokens.get_token().await?;
        let url = format!(
            "https://identitytoolkit.googleapis.com/v1/projects/{}/accounts:lookup",
            self.project_id
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "localId": [uid] }))
            .send()
            .await
            .map_err(|e| ApiError::internal(format!("accounts:lookup failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ApiError::internal(format!(
                "accounts:lookup returned {}",
                response.status()
            )));
        }

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| ApiError::internal(format!("accounts:lookup decode failed: {}", e)))?;

        Ok(body
            .users
            .into_iter()
            .flatten()
            .find(|u| u.local_id == uid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer(Some("Bearer abc123")).unwrap(), "abc123");
        assert!(parse_bearer(None).is_err());
        assert!(parse_bearer(Some("Basic abc123")).is_err());
        assert!(parse_bearer(Some("Bearer ")).is_err());
    }

    #[tokio::test]
    async fn test_garbage_token_is_unauthorized() {
        let cache = JwksCache::empty_for_tests("test-project");
        let err = cache.verify_token("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }
}
