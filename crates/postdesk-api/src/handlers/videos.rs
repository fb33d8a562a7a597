//! Video API handlers.
//!
//! All endpoints require a verified Firebase ID token. Record selection
//! travels in the `pid` query parameter or the JSON body, matching the
//! dashboard client.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use postdesk_models::{NewVideo, Video, VideoCategory, VideoStatus, VideoType, VideoUpdate};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct CreateVideoRequest {
    pub project_id: Option<String>,
    pub title: Option<String>,
    pub video_url: Option<String>,
    pub video_manifest_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub category: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub author_id: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateVideoRequest {
    pub project_id: Option<String>,
    pub video_url: Option<String>,
    pub video_manifest_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct DeleteVideoRequest {
    pub project_id: Option<String>,
}

#[derive(Deserialize)]
pub struct PidParams {
    pub pid: Option<String>,
}

#[derive(Deserialize)]
pub struct ListParams {
    pub category: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub page_size: Option<u32>,
    pub cursor: Option<String>,
}

/// Reduced projection served to the browsing dashboard; delivery URLs are
/// withheld until a record is claimed.
#[derive(Serialize)]
pub struct PublicVideoResponse {
    pub project_id: String,
    pub category: VideoCategory,
    #[serde(rename = "type")]
    pub kind: VideoType,
    pub status: VideoStatus,
    pub channel_owner_id: Option<String>,
    pub channel_owner_name: Option<String>,
}

impl From<Video> for PublicVideoResponse {
    fn from(video: Video) -> Self {
        Self {
            project_id: video.project_id,
            category: video.category,
            kind: video.kind,
            status: video.status,
            channel_owner_id: video.channel_owner_id,
            channel_owner_name: video.channel_owner_name,
        }
    }
}

#[derive(Serialize)]
pub struct VideoListResponse {
    pub videos: Vec<Video>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Serialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub success: bool,
}

// ============================================================================
// Parameter Helpers
// ============================================================================

fn require<'a>(value: &'a Option<String>, field: &'static str) -> ApiResult<&'a str> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::bad_request(format!(
            "Missing required field: {}",
            field
        ))),
    }
}

fn parse_category(s: &str) -> ApiResult<VideoCategory> {
    VideoCategory::from_str(s)
        .ok_or_else(|| ApiError::bad_request(format!("Invalid category \"{}\"", s)))
}

fn parse_kind(s: &str) -> ApiResult<VideoType> {
    VideoType::from_str(s).ok_or_else(|| ApiError::bad_request(format!("Invalid type \"{}\"", s)))
}

fn parse_status(s: &str) -> ApiResult<VideoStatus> {
    VideoStatus::from_str(s)
        .ok_or_else(|| ApiError::bad_request(format!("Invalid status \"{}\"", s)))
}

fn partition(params: &ListParams) -> ApiResult<(VideoCategory, VideoType)> {
    let category = parse_category(require(&params.category, "category")?)?;
    let kind = parse_kind(require(&params.kind, "type")?)?;
    Ok((category, kind))
}

// ============================================================================
// CRUD Handlers
// ============================================================================

/// Create a new video record.
pub async fn create_video(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(req): Json<CreateVideoRequest>,
) -> ApiResult<(StatusCode, Json<Video>)> {
    let project_id = require(&req.project_id, "project_id")?;
    let title = require(&req.title, "title")?;
    let video_url = require(&req.video_url, "video_url")?;
    let video_manifest_url = require(&req.video_manifest_url, "video_manifest_url")?;
    let thumbnail_url = require(&req.thumbnail_url, "thumbnail_url")?;
    let category = parse_category(require(&req.category, "category")?)?;
    let kind = parse_kind(require(&req.kind, "type")?)?;
    let author_id = require(&req.author_id, "author_id")?;

    let author_name = state.directory.display_name(author_id).await;

    let video = state
        .videos
        .create(NewVideo {
            project_id: project_id.to_string(),
            title: title.to_string(),
            video_url: video_url.to_string(),
            video_manifest_url: video_manifest_url.to_string(),
            thumbnail_url: thumbnail_url.to_string(),
            category,
            kind,
            author_id: author_id.to_string(),
            author_name,
        })
        .await?;

    info!(project_id = %video.project_id, "video created");
    Ok((StatusCode::CREATED, Json(video)))
}

/// Apply a partial update to an unclaimed video.
pub async fn update_video(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(req): Json<UpdateVideoRequest>,
) -> ApiResult<Json<Video>> {
    let project_id = require(&req.project_id, "project_id")?;

    let status = req.status.as_deref().map(parse_status).transpose()?;
    let update = VideoUpdate {
        video_url: req.video_url,
        video_manifest_url: req.video_manifest_url,
        thumbnail_url: req.thumbnail_url,
        status,
    };

    let video = state.videos.update(project_id, update).await?;
    Ok(Json(video))
}

/// Delete an unclaimed video. The project ID may come from the JSON body or
/// the `pid` query parameter.
pub async fn delete_video(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(params): Query<PidParams>,
    body: Option<Json<DeleteVideoRequest>>,
) -> ApiResult<Json<DeleteResponse>> {
    let project_id = body
        .as_ref()
        .and_then(|b| b.project_id.clone())
        .or(params.pid)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing required field: project_id"))?;

    state.videos.delete(&project_id).await?;

    info!(project_id = %project_id, "video deleted");
    Ok(Json(DeleteResponse { success: true }))
}

/// Fetch a single record for the browsing view.
///
/// Claimed records are reported as a conflict so the dashboard refreshes its
/// listing instead of rendering a stale candidate.
pub async fn get_video(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(params): Query<PidParams>,
) -> ApiResult<Json<PublicVideoResponse>> {
    let project_id = require(&params.pid, "pid")?;
    let video = state.videos.get(project_id, true).await?;
    Ok(Json(PublicVideoResponse::from(video)))
}

// ============================================================================
// Claim
// ============================================================================

/// Claim a video for the verified caller's channel.
pub async fn claim_video(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PidParams>,
) -> ApiResult<Json<Video>> {
    let project_id = require(&params.pid, "pid")?;

    let claimant_name = state.directory.display_name(&user.uid).await;
    let video = state
        .videos
        .claim(project_id, &user.uid, &claimant_name)
        .await?;

    info!(project_id = %project_id, uid = %user.uid, "video claimed");
    Ok(Json(video))
}

// ============================================================================
// Listing
// ============================================================================

/// List claimable candidates in a (category, type) partition.
pub async fn list_candidates(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<VideoListResponse>> {
    let (category, kind) = partition(&params)?;

    let page = state
        .videos
        .list_by_category_type(
            category,
            kind,
            VideoStatus::Ready,
            params.page_size,
            params.cursor.as_deref(),
        )
        .await?;

    Ok(Json(VideoListResponse {
        videos: page.videos,
        next_cursor: page.next_cursor,
        has_more: page.has_more,
    }))
}

/// Count claimable candidates in a (category, type) partition.
pub async fn count_candidates(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<CountResponse>> {
    let (category, kind) = partition(&params)?;

    let count = state
        .videos
        .count_by_category_type(category, kind, VideoStatus::Ready)
        .await?;

    Ok(Json(CountResponse { count }))
}

/// List the caller's claimed videos in a (category, type) partition.
pub async fn list_claimed(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<VideoListResponse>> {
    let (category, kind) = partition(&params)?;

    let page = state
        .videos
        .list_by_owner(
            category,
            kind,
            &user.uid,
            params.page_size,
            params.cursor.as_deref(),
        )
        .await?;

    Ok(Json(VideoListResponse {
        videos: page.videos,
        next_cursor: page.next_cursor,
        has_more: page.has_more,
    }))
}

/// Count the caller's claimed videos in a (category, type) partition.
pub async fn count_claimed(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<CountResponse>> {
    let (category, kind) = partition(&params)?;

    let count = state
        .videos
        .count_by_owner(category, kind, &user.uid)
        .await?;

    Ok(Json(CountResponse { count }))
}
