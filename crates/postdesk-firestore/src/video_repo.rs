//! Video repository over the `videos` collection.
//!
//! Documents are keyed by `project_id`. All multi-step mutations (claim,
//! update, delete) run as optimistic read-modify-write loops on the document
//! `updateTime` precondition, so exactly one of any set of concurrent writers
//! commits and the losers re-read before deciding.
//!
//! Listing queries require these composite indexes:
//! - (category ASC, type ASC, status ASC, post_week_day DESC)
//! - (category ASC, type ASC, channel_owner_id ASC, post_week_day DESC)

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use postdesk_models::video::fields;
use postdesk_models::{
    NewVideo, RawDate, ValidationError, Video, VideoCategory, VideoRecord, VideoStatus, VideoType,
    VideoUpdate,
};

use crate::client::FirestoreClient;
use crate::error::FirestoreError;
use crate::metrics::record_claim_outcome;
use crate::pagination::{apply_page_ordering, normalize_page_size, PageCursor};
use crate::types::{
    Document, Filter, FromFirestoreValue, StructuredQuery, ToFirestoreValue, Value,
};

const COLLECTION: &str = "videos";

/// Attempts before an optimistic write loop gives up.
const TXN_MAX_ATTEMPTS: u32 = 5;
const TXN_RETRY_BASE: Duration = Duration::from_millis(25);

/// Domain errors for video operations.
#[derive(Debug, Error)]
pub enum VideoError {
    #[error("Invalid argument: {field}")]
    InvalidArgument { field: &'static str },

    #[error("Missing or empty required field: {field}")]
    InvalidInput { field: &'static str },

    #[error("Update payload contains no fields")]
    InvalidUpdate,

    #[error("Video not found: {project_id}")]
    NotFound { project_id: String },

    #[error("Video already exists: {project_id}")]
    AlreadyExists { project_id: String },

    #[error("Video {project_id} is already claimed by another channel owner")]
    AlreadyClaimed { project_id: String },

    #[error("Video {project_id} is claimed and cannot be modified")]
    ClaimedImmutable { project_id: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] FirestoreError),
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct VideoPage {
    pub videos: Vec<Video>,
    /// Token resuming after the last item, present only on full pages.
    pub next_cursor: Option<String>,
    /// Page-full heuristic: a collection sized at an exact multiple of the
    /// page size yields one trailing `has_more == true` with an empty next
    /// page. Callers treat an empty page as the end.
    pub has_more: bool,
}

/// Repository for video documents.
#[derive(Clone)]
pub struct VideoRepository {
    client: FirestoreClient,
}

impl VideoRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch one video by project ID.
    ///
    /// With `reject_if_claimed`, a record that already has a channel owner is
    /// reported as [`VideoError::ClaimedImmutable`] instead of being returned.
    pub async fn get(&self, project_id: &str, reject_if_claimed: bool) -> Result<Video, VideoError> {
        if project_id.is_empty() {
            return Err(VideoError::InvalidInput {
                field: fields::PROJECT_ID,
            });
        }

        let doc = self
            .client
            .with_retry("get_video", || async {
                self.client.get_document(COLLECTION, project_id).await
            })
            .await?
            .ok_or_else(|| VideoError::NotFound {
                project_id: project_id.to_string(),
            })?;

        let video = doc_to_video(&doc)?;
        if reject_if_claimed && video.is_claimed() {
            return Err(VideoError::ClaimedImmutable {
                project_id: project_id.to_string(),
            });
        }
        Ok(video)
    }

    /// List videos in a (category, type, status) partition, newest week first.
    pub async fn list_by_category_type(
        &self,
        category: VideoCategory,
        kind: VideoType,
        status: VideoStatus,
        page_size: Option<u32>,
        cursor: Option<&str>,
    ) -> Result<VideoPage, VideoError> {
        let filter = Filter::and(vec![
            base_filters(category, kind),
            vec![Filter::eq(
                fields::STATUS,
                status.as_str().to_firestore_value(),
            )],
        ]
        .concat());

        self.run_page(filter, page_size, cursor).await
    }

    /// List videos in a (category, type) partition claimed by one owner.
    pub async fn list_by_owner(
        &self,
        category: VideoCategory,
        kind: VideoType,
        owner_id: &str,
        page_size: Option<u32>,
        cursor: Option<&str>,
    ) -> Result<VideoPage, VideoError> {
        if owner_id.is_empty() {
            return Err(VideoError::InvalidArgument {
                field: fields::CHANNEL_OWNER_ID,
            });
        }

        let filter = Filter::and(vec![
            base_filters(category, kind),
            vec![Filter::eq(
                fields::CHANNEL_OWNER_ID,
                owner_id.to_firestore_value(),
            )],
        ]
        .concat());

        self.run_page(filter, page_size, cursor).await
    }

    /// Server-side count over the (category, type, status) partition.
    pub async fn count_by_category_type(
        &self,
        category: VideoCategory,
        kind: VideoType,
        status: VideoStatus,
    ) -> Result<u64, VideoError> {
        let filter = Filter::and(vec![
            base_filters(category, kind),
            vec![Filter::eq(
                fields::STATUS,
                status.as_str().to_firestore_value(),
            )],
        ]
        .concat());

        self.run_count(filter).await
    }

    /// Server-side count of one owner's claims in a (category, type) partition.
    pub async fn count_by_owner(
        &self,
        category: VideoCategory,
        kind: VideoType,
        owner_id: &str,
    ) -> Result<u64, VideoError> {
        if owner_id.is_empty() {
            return Err(VideoError::InvalidArgument {
                field: fields::CHANNEL_OWNER_ID,
            });
        }

        let filter = Filter::and(vec![
            base_filters(category, kind),
            vec![Filter::eq(
                fields::CHANNEL_OWNER_ID,
                owner_id.to_firestore_value(),
            )],
        ]
        .concat());

        self.run_count(filter).await
    }

    async fn run_page(
        &self,
        filter: Filter,
        page_size: Option<u32>,
        cursor: Option<&str>,
    ) -> Result<VideoPage, VideoError> {
        let page_size = normalize_page_size(page_size);
        let cursor = cursor
            .map(PageCursor::decode)
            .transpose()
            .map_err(|_| VideoError::InvalidArgument { field: "cursor" })?;

        let mut query = StructuredQuery::collection(COLLECTION);
        query.r#where = Some(filter);
        query.limit = Some(page_size as i32);
        let query = apply_page_ordering(query, fields::POST_WEEK_DAY, cursor.as_ref());

        let docs = self
            .client
            .with_retry("list_videos", || async {
                self.client.run_query(None, query.clone()).await
            })
            .await?;

        let has_more = docs.len() as u32 == page_size;
        let next_cursor = if has_more {
            docs.last().map(page_cursor_for).transpose()?
        } else {
            None
        };

        let videos = docs
            .iter()
            .map(doc_to_video)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(count = videos.len(), has_more, "listed videos");
        Ok(VideoPage {
            videos,
            next_cursor,
            has_more,
        })
    }

    async fn run_count(&self, filter: Filter) -> Result<u64, VideoError> {
        let mut query = StructuredQuery::collection(COLLECTION);
        query.r#where = Some(filter);

        let count = self
            .client
            .with_retry("count_videos", || async {
                self.client.run_count_query(None, query.clone(), "total").await
            })
            .await?;
        Ok(count)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Create a new video record keyed by its project ID.
    pub async fn create(&self, new_video: NewVideo) -> Result<Video, VideoError> {
        validate_new_video(&new_video)?;

        let video = new_video.into_video(Utc::now());
        let project_id = video.project_id.clone();

        let result = self
            .client
            .create_document(COLLECTION, &project_id, video_to_fields(&video))
            .await;

        match result {
            Ok(doc) => doc_to_video(&doc),
            Err(FirestoreError::AlreadyExists(_)) => {
                Err(VideoError::AlreadyExists { project_id })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply a partial update to an unclaimed video.
    ///
    /// Runs under the updateTime precondition so a claim that lands between
    /// the read and the write invalidates this update rather than being
    /// silently overwritten.
    pub async fn update(
        &self,
        project_id: &str,
        update: VideoUpdate,
    ) -> Result<Video, VideoError> {
        if project_id.is_empty() {
            return Err(VideoError::InvalidInput {
                field: fields::PROJECT_ID,
            });
        }
        if update.is_empty() {
            return Err(VideoError::InvalidUpdate);
        }

        for attempt in 1..=TXN_MAX_ATTEMPTS {
            let (video, update_time) = self.read_for_write(project_id).await?;
            if video.is_claimed() {
                return Err(VideoError::ClaimedImmutable {
                    project_id: project_id.to_string(),
                });
            }

            let (write_fields, mask) = update_fields(&update, Utc::now());
            let result = self
                .client
                .update_document_with_precondition(
                    COLLECTION,
                    project_id,
                    write_fields,
                    Some(mask),
                    Some(&update_time),
                )
                .await;

            match result {
                Ok(doc) => return doc_to_video(&doc),
                Err(e) if e.is_precondition_failed() && attempt < TXN_MAX_ATTEMPTS => {
                    warn!(project_id, attempt, "update lost the write race, retrying");
                    tokio::time::sleep(TXN_RETRY_BASE * attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        unreachable!("loop returns on the final attempt")
    }

    /// Delete an unclaimed video.
    ///
    /// The existence/ownership check and the delete are tied together by the
    /// updateTime precondition; a claim that wins the race surfaces as
    /// [`VideoError::ClaimedImmutable`] on the retry re-read.
    pub async fn delete(&self, project_id: &str) -> Result<(), VideoError> {
        if project_id.is_empty() {
            return Err(VideoError::InvalidInput {
                field: fields::PROJECT_ID,
            });
        }

        for attempt in 1..=TXN_MAX_ATTEMPTS {
            let (video, update_time) = self.read_for_write(project_id).await?;
            if video.is_claimed() {
                return Err(VideoError::ClaimedImmutable {
                    project_id: project_id.to_string(),
                });
            }

            let result = self
                .client
                .delete_document_with_precondition(COLLECTION, project_id, Some(&update_time))
                .await;

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_precondition_failed() && attempt < TXN_MAX_ATTEMPTS => {
                    warn!(project_id, attempt, "delete lost the write race, retrying");
                    tokio::time::sleep(TXN_RETRY_BASE * attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        unreachable!("loop returns on the final attempt")
    }

    // =========================================================================
    // Claim transaction
    // =========================================================================

    /// Claim a video for a channel owner.
    ///
    /// Exactly one of any set of concurrent claimants commits; the rest
    /// observe the winner on re-read. Re-claiming a video you already own is
    /// an idempotent success that performs no write, so `modified_at` stays
    /// untouched on that path.
    pub async fn claim(
        &self,
        project_id: &str,
        claimant_id: &str,
        claimant_name: &str,
    ) -> Result<Video, VideoError> {
        if project_id.is_empty() {
            return Err(VideoError::InvalidInput {
                field: fields::PROJECT_ID,
            });
        }
        if claimant_id.is_empty() {
            return Err(VideoError::InvalidInput {
                field: fields::CHANNEL_OWNER_ID,
            });
        }
        if claimant_name.is_empty() {
            return Err(VideoError::InvalidInput {
                field: fields::CHANNEL_OWNER_NAME,
            });
        }

        for attempt in 1..=TXN_MAX_ATTEMPTS {
            let (video, update_time) = self.read_for_write(project_id).await?;

            match video.channel_owner_id.as_deref() {
                Some(owner) if owner == claimant_id => {
                    record_claim_outcome("idempotent");
                    return Ok(video);
                }
                Some(_) => {
                    record_claim_outcome("conflict");
                    return Err(VideoError::AlreadyClaimed {
                        project_id: project_id.to_string(),
                    });
                }
                None => {}
            }

            let now = Utc::now();
            let (write_fields, mask) = claim_fields(claimant_id, claimant_name, now);
            let result = self
                .client
                .update_document_with_precondition(
                    COLLECTION,
                    project_id,
                    write_fields,
                    Some(mask),
                    Some(&update_time),
                )
                .await;

            match result {
                Ok(doc) => {
                    record_claim_outcome("won");
                    debug!(project_id, claimant_id, "claim committed");
                    return doc_to_video(&doc);
                }
                Err(e) if e.is_precondition_failed() && attempt < TXN_MAX_ATTEMPTS => {
                    // Someone else wrote first; the re-read decides.
                    record_claim_outcome("lost_race");
                    warn!(project_id, attempt, "claim lost the write race, re-reading");
                    tokio::time::sleep(TXN_RETRY_BASE * attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        unreachable!("loop returns on the final attempt")
    }

    /// Read a document plus the updateTime its write precondition needs.
    async fn read_for_write(&self, project_id: &str) -> Result<(Video, String), VideoError> {
        let doc = self
            .client
            .with_retry("get_video", || async {
                self.client.get_document(COLLECTION, project_id).await
            })
            .await?
            .ok_or_else(|| VideoError::NotFound {
                project_id: project_id.to_string(),
            })?;

        let update_time = doc.update_time.clone().ok_or_else(|| {
            FirestoreError::InvalidResponse(format!(
                "videos/{}: document missing updateTime",
                project_id
            ))
        })?;

        Ok((doc_to_video(&doc)?, update_time))
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate_new_video(new_video: &NewVideo) -> Result<(), VideoError> {
    let required: [(&'static str, &str); 6] = [
        (fields::PROJECT_ID, &new_video.project_id),
        (fields::TITLE, &new_video.title),
        (fields::VIDEO_URL, &new_video.video_url),
        (fields::VIDEO_MANIFEST_URL, &new_video.video_manifest_url),
        (fields::THUMBNAIL_URL, &new_video.thumbnail_url),
        (fields::AUTHOR_ID, &new_video.author_id),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(VideoError::InvalidInput { field });
        }
    }
    Ok(())
}

// =============================================================================
// Wire Conversions
// =============================================================================

fn ts(dt: DateTime<Utc>) -> Value {
    Value::TimestampValue(dt.to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn base_filters(category: VideoCategory, kind: VideoType) -> Vec<Filter> {
    vec![
        Filter::eq(
            fields::CATEGORY,
            category.as_str().to_firestore_value(),
        ),
        Filter::eq(fields::TYPE, kind.as_str().to_firestore_value()),
    ]
}

/// Serialize a full video for document creation.
fn video_to_fields(video: &Video) -> HashMap<String, Value> {
    let mut f = HashMap::new();
    f.insert(
        fields::PROJECT_ID.to_string(),
        video.project_id.to_firestore_value(),
    );
    f.insert(fields::TITLE.to_string(), video.title.to_firestore_value());
    f.insert(
        fields::VIDEO_URL.to_string(),
        video.video_url.to_firestore_value(),
    );
    f.insert(
        fields::VIDEO_MANIFEST_URL.to_string(),
        video.video_manifest_url.to_firestore_value(),
    );
    f.insert(
        fields::THUMBNAIL_URL.to_string(),
        video.thumbnail_url.to_firestore_value(),
    );
    f.insert(
        fields::CATEGORY.to_string(),
        video.category.as_str().to_firestore_value(),
    );
    f.insert(fields::TYPE.to_string(), video.kind.as_str().to_firestore_value());
    f.insert(fields::POST_WEEK_DAY.to_string(), ts(video.post_week_day));
    f.insert(
        fields::AUTHOR_ID.to_string(),
        video.author_id.to_firestore_value(),
    );
    f.insert(
        fields::AUTHOR_NAME.to_string(),
        video.author_name.to_firestore_value(),
    );
    f.insert(
        fields::CHANNEL_OWNER_ID.to_string(),
        video.channel_owner_id.to_firestore_value(),
    );
    f.insert(
        fields::CHANNEL_OWNER_NAME.to_string(),
        video.channel_owner_name.to_firestore_value(),
    );
    f.insert(
        fields::STATUS.to_string(),
        video.status.as_str().to_firestore_value(),
    );
    f.insert(
        fields::CLAIMED_AT.to_string(),
        match video.claimed_at {
            Some(at) => ts(at),
            None => Value::NullValue(()),
        },
    );
    f.insert(fields::CREATED_AT.to_string(), ts(video.created_at));
    f.insert(fields::MODIFIED_AT.to_string(), ts(video.modified_at));
    f
}

/// Fields and mask for a partial update, bumping `modified_at`.
fn update_fields(update: &VideoUpdate, now: DateTime<Utc>) -> (HashMap<String, Value>, Vec<String>) {
    let mut f = HashMap::new();
    if let Some(url) = &update.video_url {
        f.insert(fields::VIDEO_URL.to_string(), url.to_firestore_value());
    }
    if let Some(url) = &update.video_manifest_url {
        f.insert(
            fields::VIDEO_MANIFEST_URL.to_string(),
            url.to_firestore_value(),
        );
    }
    if let Some(url) = &update.thumbnail_url {
        f.insert(
            fields::THUMBNAIL_URL.to_string(),
            url.to_firestore_value(),
        );
    }
    if let Some(status) = update.status {
        f.insert(
            fields::STATUS.to_string(),
            status.as_str().to_firestore_value(),
        );
    }
    f.insert(fields::MODIFIED_AT.to_string(), ts(now));

    let mask = f.keys().cloned().collect();
    (f, mask)
}

/// Fields and mask the claim transaction writes.
fn claim_fields(
    claimant_id: &str,
    claimant_name: &str,
    now: DateTime<Utc>,
) -> (HashMap<String, Value>, Vec<String>) {
    let mut f = HashMap::new();
    f.insert(
        fields::CHANNEL_OWNER_ID.to_string(),
        claimant_id.to_firestore_value(),
    );
    f.insert(
        fields::CHANNEL_OWNER_NAME.to_string(),
        claimant_name.to_firestore_value(),
    );
    f.insert(
        fields::STATUS.to_string(),
        VideoStatus::Claimed.as_str().to_firestore_value(),
    );
    f.insert(fields::CLAIMED_AT.to_string(), ts(now));
    f.insert(fields::MODIFIED_AT.to_string(), ts(now));

    let mask = f.keys().cloned().collect();
    (f, mask)
}

fn value_to_raw_date(value: &Value) -> Option<RawDate> {
    match value {
        Value::TimestampValue(s) | Value::StringValue(s) => Some(RawDate::Text(s.clone())),
        Value::IntegerValue(s) => s.parse::<i64>().ok().map(RawDate::EpochMillis),
        Value::DoubleValue(f) => Some(RawDate::EpochMillis(*f as i64)),
        _ => None,
    }
}

fn missing(doc: &Document, field: &str) -> FirestoreError {
    FirestoreError::InvalidResponse(format!(
        "{}: missing or malformed field {}",
        doc.name.as_deref().unwrap_or("(unnamed document)"),
        field
    ))
}

fn req_string(doc: &Document, fields_map: &HashMap<String, Value>, field: &str) -> Result<String, FirestoreError> {
    fields_map
        .get(field)
        .and_then(String::from_firestore_value)
        .ok_or_else(|| missing(doc, field))
}

fn opt_string(fields_map: &HashMap<String, Value>, field: &str) -> Option<String> {
    fields_map.get(field).and_then(String::from_firestore_value)
}

fn req_date(doc: &Document, fields_map: &HashMap<String, Value>, field: &str) -> Result<RawDate, FirestoreError> {
    fields_map
        .get(field)
        .and_then(value_to_raw_date)
        .ok_or_else(|| missing(doc, field))
}

fn opt_date(fields_map: &HashMap<String, Value>, field: &str) -> Option<RawDate> {
    fields_map.get(field).and_then(value_to_raw_date)
}

/// Decode a stored document into the normalized model.
fn doc_to_video(doc: &Document) -> Result<Video, VideoError> {
    let f = doc
        .fields
        .as_ref()
        .ok_or_else(|| missing(doc, "(fields)"))?;

    let record = VideoRecord {
        project_id: req_string(doc, f, fields::PROJECT_ID)?,
        title: req_string(doc, f, fields::TITLE)?,
        video_url: req_string(doc, f, fields::VIDEO_URL)?,
        video_manifest_url: req_string(doc, f, fields::VIDEO_MANIFEST_URL)?,
        thumbnail_url: req_string(doc, f, fields::THUMBNAIL_URL)?,
        category: req_string(doc, f, fields::CATEGORY)?,
        kind: req_string(doc, f, fields::TYPE)?,
        post_week_day: req_date(doc, f, fields::POST_WEEK_DAY)?,
        author_id: req_string(doc, f, fields::AUTHOR_ID)?,
        author_name: req_string(doc, f, fields::AUTHOR_NAME)?,
        channel_owner_id: opt_string(f, fields::CHANNEL_OWNER_ID),
        channel_owner_name: opt_string(f, fields::CHANNEL_OWNER_NAME),
        status: req_string(doc, f, fields::STATUS)?,
        claimed_at: opt_date(f, fields::CLAIMED_AT),
        created_at: req_date(doc, f, fields::CREATED_AT)?,
        modified_at: req_date(doc, f, fields::MODIFIED_AT)?,
    };

    Ok(Video::parse(&record)?)
}

/// Cursor token for resuming after `doc`.
fn page_cursor_for(doc: &Document) -> Result<String, VideoError> {
    let name = doc
        .name
        .as_deref()
        .ok_or_else(|| missing(doc, "(name)"))?;
    let sort_value = match doc.fields.as_ref().and_then(|f| f.get(fields::POST_WEEK_DAY)) {
        Some(Value::TimestampValue(s)) => s.clone(),
        _ => return Err(missing(doc, fields::POST_WEEK_DAY).into()),
    };
    Ok(PageCursor::new(sort_value, name).encode())
}

// =============================================================================
// Tests
// =============================================================================
