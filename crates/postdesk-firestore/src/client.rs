//! Thin client over the Firestore REST API.
//!
//! Handles auth token caching, connection pooling, per-request tracing
//! spans and metrics, and optimistic-concurrency preconditions. When
//! `FIRESTORE_EMULATOR_HOST` is set the client targets the emulator with
//! the static "owner" token, matching the official SDKs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{info_span, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_request;
use crate::retry::RetryConfig;
use crate::token_cache::TokenCache;
use crate::types::{
    Document, FromFirestoreValue, RunAggregationQueryRequest, RunAggregationQueryResponse,
    RunQueryRequest, RunQueryResponse, StructuredAggregationQuery, StructuredQuery, Value,
};

/// Connection settings for [`FirestoreClient`].
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    /// Usually "(default)".
    pub database_id: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
    /// Emulator endpoint such as "localhost:8080"; set, it disables real auth.
    pub emulator_host: Option<String>,
}

impl FirestoreConfig {
    /// Read the connection settings from the environment. A project id
    /// (`GCP_PROJECT_ID` or `FIREBASE_PROJECT_ID`) is the only hard
    /// requirement.
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .or_else(|_| std::env::var("FIREBASE_PROJECT_ID"))
            .ok()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                FirestoreError::auth_error(
                    "set GCP_PROJECT_ID or FIREBASE_PROJECT_ID to a non-empty project id",
                )
            })?;

        let connect_timeout_secs: u64 = std::env::var("FIRESTORE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            project_id,
            database_id: std::env::var("FIRESTORE_DATABASE_ID")
                .unwrap_or_else(|_| "(default)".to_string()),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
            emulator_host: std::env::var("FIRESTORE_EMULATOR_HOST").ok(),
        })
    }
}

enum AuthMode {
    ServiceAccount(Arc<TokenCache>),
    /// Emulator accepts the fixed "owner" token.
    Emulator,
}

/// Firestore REST transport shared by the repositories. Cheap to clone.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    base_url: String,
    auth: Arc<AuthMode>,
}

impl FirestoreClient {
    pub async fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        let auth = match &config.emulator_host {
            Some(_) => AuthMode::Emulator,
            None => {
                let provider = Self::create_auth_provider()?;
                AuthMode::ServiceAccount(Arc::new(TokenCache::new(provider)))
            }
        };

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("postdesk-firestore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FirestoreError::Network)?;

        let origin = match &config.emulator_host {
            Some(host) if host.contains("://") => host.clone(),
            Some(host) => format!("http://{}", host),
            None => "https://firestore.googleapis.com".to_string(),
        };
        let base_url = format!(
            "{}/v1/projects/{}/databases/{}/documents",
            origin, config.project_id, config.database_id
        );

        Ok(Self {
            http,
            config,
            base_url,
            auth: Arc::new(auth),
        })
    }

    fn create_auth_provider() -> FirestoreResult<Arc<dyn TokenProvider>> {
        CustomServiceAccount::from_env()
            .map_err(|e| {
                FirestoreError::auth_error(format!("failed to load service account: {}", e))
            })?
            .map(|sa| Arc::new(sa) as Arc<dyn TokenProvider>)
            .ok_or_else(|| {
                FirestoreError::auth_error(
                    "GOOGLE_APPLICATION_CREDENTIALS must point at a service account JSON file",
                )
            })
    }

    pub async fn from_env() -> FirestoreResult<Self> {
        let config = FirestoreConfig::from_env()?;
        Self::new(config).await
    }

    async fn get_token(&self) -> FirestoreResult<String> {
        match self.auth.as_ref() {
            AuthMode::ServiceAccount(cache) => cache.get_token().await,
            AuthMode::Emulator => Ok("owner".to_string()),
        }
    }

    fn is_access_token_expired(body: &str) -> bool {
        body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")
    }

    fn document_path(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, doc_id)
    }

    /// Full document resource name (cursor reference values need this).
    pub fn full_document_name(&self, collection: &str, doc_id: &str) -> String {
        format!(
            "projects/{}/databases/{}/documents/{}/{}",
            self.config.project_id, self.config.database_id, collection, doc_id
        )
    }

    /// Send a request, transparently refreshing an expired access token once.
    async fn send_authorized<F>(&self, build: F) -> FirestoreResult<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.get_token().await?;
        let response = build(&token).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if !Self::is_access_token_expired(&body) {
            return Err(FirestoreError::from_http_status(
                StatusCode::UNAUTHORIZED.as_u16(),
                body,
            ));
        }

        if let AuthMode::ServiceAccount(cache) = self.auth.as_ref() {
            cache.invalidate().await;
        }
        let token = self.get_token().await?;
        Ok(build(&token).send().await?)
    }

    /// Fetch a document, `None` if it does not exist.
    pub async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> FirestoreResult<Option<Document>> {
        let url = self.document_path(collection, doc_id);

        self.execute_request("get_document", collection, Some(doc_id), async {
            let response = self
                .send_authorized(|token| self.http.get(&url).bearer_auth(token))
                .await?;

            match response.status() {
                StatusCode::OK => {
                    let doc: Document = response.json().await?;
                    Ok(Some(doc))
                }
                StatusCode::NOT_FOUND => Ok(None),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Create a document, failing if the ID is already taken.
    pub async fn create_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
    ) -> FirestoreResult<Document> {
        let url = format!("{}/{}?documentId={}", self.base_url, collection, doc_id);
        let body = Document::new(fields);

        self.execute_request("create_document", collection, Some(doc_id), async {
            let response = self
                .send_authorized(|token| self.http.post(&url).bearer_auth(token).json(&body))
                .await?;

            match response.status() {
                StatusCode::OK | StatusCode::CREATED => {
                    let doc: Document = response.json().await?;
                    Ok(doc)
                }
                StatusCode::CONFLICT => Err(FirestoreError::AlreadyExists(format!(
                    "{}/{}",
                    collection, doc_id
                ))),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Update with optimistic concurrency control.
    ///
    /// When `update_time` is provided, the write only commits if the stored
    /// document still carries that updateTime; otherwise the call fails with
    /// [`FirestoreError::PreconditionFailed`].
    pub async fn update_document_with_precondition(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
        update_mask: Option<Vec<String>>,
        update_time: Option<&str>,
    ) -> FirestoreResult<Document> {
        let mut url = self.document_path(collection, doc_id);
        let mut params: Vec<String> = Vec::new();

        if let Some(mask) = update_mask {
            params.extend(mask.iter().map(|f| format!("updateMask.fieldPaths={}", f)));
        }
        if let Some(ts) = update_time {
            params.push(format!(
                "currentDocument.updateTime={}",
                urlencoding::encode(ts)
            ));
        }
        if !params.is_empty() {
            url = format!("{}?{}", url, params.join("&"));
        }

        let body = Document::new(fields);

        self.execute_request("update_document", collection, Some(doc_id), async {
            let response = self
                .send_authorized(|token| self.http.patch(&url).bearer_auth(token).json(&body))
                .await?;

            match response.status() {
                StatusCode::OK => {
                    let doc: Document = response.json().await?;
                    Ok(doc)
                }
                StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => {
                    let body_text = response.text().await.unwrap_or_default();
                    Err(FirestoreError::PreconditionFailed(format!(
                        "Precondition failed: {}",
                        body_text
                    )))
                }
                StatusCode::NOT_FOUND => {
                    Err(FirestoreError::not_found(format!("{}/{}", collection, doc_id)))
                }
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Delete a document, optionally guarded by an updateTime precondition.
    pub async fn delete_document_with_precondition(
        &self,
        collection: &str,
        doc_id: &str,
        update_time: Option<&str>,
    ) -> FirestoreResult<()> {
        let mut url = self.document_path(collection, doc_id);
        if let Some(ts) = update_time {
            url = format!(
                "{}?currentDocument.updateTime={}",
                url,
                urlencoding::encode(ts)
            );
        }

        self.execute_request("delete_document", collection, Some(doc_id), async {
            let response = self
                .send_authorized(|token| self.http.delete(&url).bearer_auth(token))
                .await?;

            match response.status() {
                StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
                StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => {
                    let body_text = response.text().await.unwrap_or_default();
                    Err(FirestoreError::PreconditionFailed(format!(
                        "Precondition failed: {}",
                        body_text
                    )))
                }
                StatusCode::NOT_FOUND => {
                    Err(FirestoreError::not_found(format!("{}/{}", collection, doc_id)))
                }
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Run a structured query.
    ///
    /// `parent_path` is the path containing the collection; `None` queries a
    /// root collection of the database.
    pub async fn run_query(
        &self,
        parent_path: Option<&str>,
        query: StructuredQuery,
    ) -> FirestoreResult<Vec<Document>> {
        let url = match parent_path {
            Some(parent) => format!("{}/{}:runQuery", self.base_url, parent),
            None => format!("{}:runQuery", self.base_url),
        };
        let request = RunQueryRequest {
            structured_query: query,
        };

        self.execute_request("run_query", parent_path.unwrap_or("(root)"), None, async {
            let response = self
                .send_authorized(|token| self.http.post(&url).bearer_auth(token).json(&request))
                .await?;

            match response.status() {
                StatusCode::OK => {
                    let body = response.text().await.unwrap_or_default();
                    // runQuery returns a JSON array of RunQueryResponse objects
                    let responses: Vec<RunQueryResponse> =
                        serde_json::from_str(&body).map_err(|e| {
                            FirestoreError::request_failed(format!(
                                "Failed to parse runQuery response: {} (body prefix: {})",
                                e,
                                body_prefix(&body)
                            ))
                        })?;

                    Ok(responses.into_iter().filter_map(|r| r.document).collect())
                }
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Run a COUNT aggregation, returning the total under `alias`.
    ///
    /// Served from the index, so the cost is independent of the result size.
    pub async fn run_count_query(
        &self,
        parent_path: Option<&str>,
        query: StructuredQuery,
        alias: &str,
    ) -> FirestoreResult<u64> {
        let url = match parent_path {
            Some(parent) => format!("{}/{}:runAggregationQuery", self.base_url, parent),
            None => format!("{}:runAggregationQuery", self.base_url),
        };
        let request = RunAggregationQueryRequest {
            structured_aggregation_query: StructuredAggregationQuery {
                structured_query: query,
                aggregations: vec![crate::types::Aggregation::count(alias)],
            },
        };

        self.execute_request(
            "run_aggregation_query",
            parent_path.unwrap_or("(root)"),
            None,
            async {
                let response = self
                    .send_authorized(|token| {
                        self.http.post(&url).bearer_auth(token).json(&request)
                    })
                    .await?;

                match response.status() {
                    StatusCode::OK => {
                        let body = response.text().await.unwrap_or_default();
                        let responses: Vec<RunAggregationQueryResponse> =
                            serde_json::from_str(&body).map_err(|e| {
                                FirestoreError::request_failed(format!(
                                    "Failed to parse aggregation response: {} (body prefix: {})",
                                    e,
                                    body_prefix(&body)
                                ))
                            })?;

                        let count = responses
                            .into_iter()
                            .filter_map(|r| r.result)
                            .find_map(|r| {
                                r.aggregate_fields.get(alias).and_then(u64::from_firestore_value)
                            })
                            .ok_or_else(|| {
                                FirestoreError::InvalidResponse(
                                    "Aggregation response missing count".to_string(),
                                )
                            })?;

                        Ok(count)
                    }
                    status => Err(Self::handle_error_response(status, &url, response).await),
                }
            },
        )
        .await
    }

    /// Run `op` under this client's retry policy.
    pub async fn with_retry<T, F, Fut>(&self, operation: &str, op: F) -> FirestoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = FirestoreResult<T>>,
    {
        crate::retry::with_retry(&self.config.retry, operation, op).await
    }

    /// Wrap a request future in a tracing span and emit request metrics.
    async fn execute_request<T, F>(
        &self,
        operation: &str,
        collection: &str,
        doc_id: Option<&str>,
        fut: F,
    ) -> FirestoreResult<T>
    where
        F: std::future::Future<Output = FirestoreResult<T>>,
    {
        let span = if let Some(id) = doc_id {
            info_span!("firestore_request", operation = %operation, collection = %collection, doc_id = %id)
        } else {
            info_span!("firestore_request", operation = %operation, collection = %collection)
        };

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, latency_ms);

        result
    }

    async fn handle_error_response(
        status: StatusCode,
        url: &str,
        response: Response,
    ) -> FirestoreError {
        let body = response.text().await.unwrap_or_default();
        FirestoreError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }
}

/// First 200 characters of an unparseable body, for error context.
/// Truncates per character so multibyte UTF-8 never splits.
fn body_prefix(body: &str) -> String {
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_from_env_validates_project_id() {
        std::env::remove_var("GCP_PROJECT_ID");
        std::env::remove_var("FIREBASE_PROJECT_ID");
        let result = FirestoreConfig::from_env();
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_config_default_values() {
        std::env::set_var("GCP_PROJECT_ID", "test-project");
        std::env::remove_var("FIRESTORE_CONNECT_TIMEOUT_SECS");
        std::env::remove_var("FIRESTORE_DATABASE_ID");
        let config = FirestoreConfig::from_env().unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.database_id, "(default)");
        std::env::remove_var("GCP_PROJECT_ID");
    }

    #[tokio::test]
    async fn test_emulator_base_url() {
        let config = FirestoreConfig {
            project_id: "test-project".to_string(),
            database_id: "(default)".to_string(),
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            retry: RetryConfig::default(),
            emulator_host: Some("localhost:8080".to_string()),
        };
        let client = FirestoreClient::new(config).await.unwrap();
        assert!(client.base_url.starts_with("http://localhost:8080/v1/"));
        assert_eq!(client.get_token().await.unwrap(), "owner");
    }

    #[test]
    fn test_body_prefix_keeps_multibyte_intact() {
        let body = format!("{}ééééé", "x".repeat(199));
        let prefix = body_prefix(&body);
        assert_eq!(prefix.chars().count(), 200);
        assert!(prefix.ends_with('é'));

        assert_eq!(body_prefix("short"), "short");
    }
}
