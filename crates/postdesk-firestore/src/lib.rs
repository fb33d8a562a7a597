//! Firestore-backed persistence for the video claim dashboard.
//!
//! Layers:
//! - [`client`]: REST transport with token caching, retries, and metrics
//! - [`video_repo`]: the domain repository (listing, counting, claim
//!   transaction, mutations)
//! - [`pagination`]: opaque cursor tokens for the listing endpoints

pub mod client;
pub mod error;
pub mod metrics;
pub mod pagination;
pub mod retry;
pub mod token_cache;
pub mod types;
pub mod video_repo;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use pagination::{PageCursor, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
pub use retry::RetryConfig;
pub use token_cache::TokenCache;
pub use video_repo::{VideoError, VideoPage, VideoRepository};
