//! Video record model.
//!
//! Translates between the Firestore storage schema (snake_case flat fields,
//! provider-flexible date representations) and the normalized in-memory
//! [`Video`] model used everywhere else.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Firestore field names for the `videos` collection.
pub mod fields {
    pub const PROJECT_ID: &str = "project_id";
    pub const TITLE: &str = "title";
    pub const VIDEO_URL: &str = "video_url";
    pub const VIDEO_MANIFEST_URL: &str = "video_manifest_url";
    pub const THUMBNAIL_URL: &str = "thumbnail_url";
    pub const CATEGORY: &str = "category";
    pub const TYPE: &str = "type";
    pub const POST_WEEK_DAY: &str = "post_week_day";
    pub const AUTHOR_ID: &str = "author_id";
    pub const AUTHOR_NAME: &str = "author_name";
    pub const CHANNEL_OWNER_ID: &str = "channel_owner_id";
    pub const CHANNEL_OWNER_NAME: &str = "channel_owner_name";
    pub const STATUS: &str = "status";
    pub const CLAIMED_AT: &str = "claimed_at";
    pub const CREATED_AT: &str = "created_at";
    pub const MODIFIED_AT: &str = "modified_at";
}

/// Model validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid {field} date value")]
    InvalidDate { field: &'static str },

    #[error("Invalid {field} value \"{value}\"")]
    InvalidEnum { field: &'static str, value: String },
}

impl ValidationError {
    pub fn invalid_date(field: &'static str) -> Self {
        Self::InvalidDate { field }
    }

    pub fn invalid_enum(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidEnum {
            field,
            value: value.into(),
        }
    }
}

/// Content category a video belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCategory {
    Ib,
    Cat,
    Mermaid,
}

impl VideoCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCategory::Ib => "ib",
            VideoCategory::Cat => "cat",
            VideoCategory::Mermaid => "mermaid",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ib" => Some(VideoCategory::Ib),
            "cat" => Some(VideoCategory::Cat),
            "mermaid" => Some(VideoCategory::Mermaid),
            _ => None,
        }
    }
}

impl fmt::Display for VideoCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Video format axis, independent of category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoType {
    #[serde(rename = "1min")]
    OneMin,
    #[serde(rename = "shorts")]
    Shorts,
}

impl VideoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoType::OneMin => "1min",
            VideoType::Shorts => "shorts",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1min" => Some(VideoType::OneMin),
            "shorts" => Some(VideoType::Shorts),
            _ => None,
        }
    }
}

impl fmt::Display for VideoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Video lifecycle status.
///
/// Transitions only move forward: ready -> claimed -> (revisioning <-> posted).
/// The claim transaction is the only writer that sets `Claimed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Eligible to be claimed
    #[default]
    Ready,
    /// Sent back for revision after claiming
    Revisioning,
    /// Exclusively owned by a channel owner
    Claimed,
    /// Published to the owner's channel
    Posted,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Ready => "ready",
            VideoStatus::Revisioning => "revisioning",
            VideoStatus::Claimed => "claimed",
            VideoStatus::Posted => "posted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(VideoStatus::Ready),
            "revisioning" => Some(VideoStatus::Revisioning),
            "claimed" => Some(VideoStatus::Claimed),
            "posted" => Some(VideoStatus::Posted),
            _ => None,
        }
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A date value as stored by the provider.
///
/// Firestore documents written through different SDK generations carry dates
/// as native timestamps, RFC 3339 strings, or epoch milliseconds. All three
/// normalize to `DateTime<Utc>`; anything else is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawDate {
    Timestamp(DateTime<Utc>),
    EpochMillis(i64),
    Text(String),
}

impl RawDate {
    /// Normalize to an absolute UTC time, naming the field on failure.
    pub fn normalize(&self, field: &'static str) -> Result<DateTime<Utc>, ValidationError> {
        match self {
            RawDate::Timestamp(dt) => Ok(*dt),
            RawDate::EpochMillis(ms) => Utc
                .timestamp_millis_opt(*ms)
                .single()
                .ok_or(ValidationError::InvalidDate { field }),
            RawDate::Text(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| ValidationError::InvalidDate { field }),
        }
    }
}

impl From<DateTime<Utc>> for RawDate {
    fn from(dt: DateTime<Utc>) -> Self {
        RawDate::Timestamp(dt)
    }
}

/// Raw persisted form of a video document (flat snake_case fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub project_id: String,
    pub title: String,
    pub video_url: String,
    pub video_manifest_url: String,
    pub thumbnail_url: String,
    pub category: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub post_week_day: RawDate,
    pub author_id: String,
    pub author_name: String,
    pub channel_owner_id: Option<String>,
    pub channel_owner_name: Option<String>,
    pub status: String,
    pub claimed_at: Option<RawDate>,
    pub created_at: RawDate,
    pub modified_at: RawDate,
}

/// Normalized in-memory video model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    /// Primary key, immutable, globally unique
    pub project_id: String,

    pub title: String,
    pub video_url: String,
    pub video_manifest_url: String,
    pub thumbnail_url: String,

    /// Partition axes, immutable after creation
    pub category: VideoCategory,
    #[serde(rename = "type")]
    pub kind: VideoType,

    /// Monday of the ISO week the record was created in; sort key for listing
    pub post_week_day: DateTime<Utc>,

    /// Creator identity, immutable
    pub author_id: String,
    pub author_name: String,

    /// Ownership marker, set exactly once by the claim transaction
    pub channel_owner_id: Option<String>,
    pub channel_owner_name: Option<String>,

    pub status: VideoStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Video {
    /// Parse a raw record, validating enums and normalizing dates.
    pub fn parse(raw: &VideoRecord) -> Result<Self, ValidationError> {
        let category = VideoCategory::from_str(&raw.category)
            .ok_or_else(|| ValidationError::invalid_enum(fields::CATEGORY, &raw.category))?;
        let kind = VideoType::from_str(&raw.kind)
            .ok_or_else(|| ValidationError::invalid_enum(fields::TYPE, &raw.kind))?;
        let status = VideoStatus::from_str(&raw.status)
            .ok_or_else(|| ValidationError::invalid_enum(fields::STATUS, &raw.status))?;

        Ok(Self {
            project_id: raw.project_id.clone(),
            title: raw.title.clone(),
            video_url: raw.video_url.clone(),
            video_manifest_url: raw.video_manifest_url.clone(),
            thumbnail_url: raw.thumbnail_url.clone(),
            category,
            kind,
            post_week_day: raw.post_week_day.normalize(fields::POST_WEEK_DAY)?,
            author_id: raw.author_id.clone(),
            author_name: raw.author_name.clone(),
            channel_owner_id: raw.channel_owner_id.clone(),
            channel_owner_name: raw.channel_owner_name.clone(),
            status,
            claimed_at: raw
                .claimed_at
                .as_ref()
                .map(|d| d.normalize(fields::CLAIMED_AT))
                .transpose()?,
            created_at: raw.created_at.normalize(fields::CREATED_AT)?,
            modified_at: raw.modified_at.normalize(fields::MODIFIED_AT)?,
        })
    }

    /// Serialize back to the raw persisted form.
    pub fn to_record(&self) -> VideoRecord {
        VideoRecord {
            project_id: self.project_id.clone(),
            title: self.title.clone(),
            video_url: self.video_url.clone(),
            video_manifest_url: self.video_manifest_url.clone(),
            thumbnail_url: self.thumbnail_url.clone(),
            category: self.category.as_str().to_string(),
            kind: self.kind.as_str().to_string(),
            post_week_day: self.post_week_day.into(),
            author_id: self.author_id.clone(),
            author_name: self.author_name.clone(),
            channel_owner_id: self.channel_owner_id.clone(),
            channel_owner_name: self.channel_owner_name.clone(),
            status: self.status.as_str().to_string(),
            claimed_at: self.claimed_at.map(Into::into),
            created_at: self.created_at.into(),
            modified_at: self.modified_at.into(),
        }
    }

    /// True once a channel owner has been recorded.
    pub fn is_claimed(&self) -> bool {
        self.channel_owner_id.is_some()
    }
}

/// Payload for creating a new video record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVideo {
    pub project_id: String,
    pub title: String,
    pub video_url: String,
    pub video_manifest_url: String,
    pub thumbnail_url: String,
    pub category: VideoCategory,
    #[serde(rename = "type")]
    pub kind: VideoType,
    pub author_id: String,
    pub author_name: String,
}

impl NewVideo {
    /// Build the ready-to-claim video this payload describes.
    pub fn into_video(self, now: DateTime<Utc>) -> Video {
        Video {
            project_id: self.project_id,
            title: self.title,
            video_url: self.video_url,
            video_manifest_url: self.video_manifest_url,
            thumbnail_url: self.thumbnail_url,
            category: self.category,
            kind: self.kind,
            post_week_day: week_monday(now),
            author_id: self.author_id,
            author_name: self.author_name,
            channel_owner_id: None,
            channel_owner_name: None,
            status: VideoStatus::Ready,
            claimed_at: None,
            created_at: now,
            modified_at: now,
        }
    }
}

/// Partial update applied to an unclaimed video.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_manifest_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<VideoStatus>,
}

impl VideoUpdate {
    /// True when no field was supplied.
    pub fn is_empty(&self) -> bool {
        self.video_url.is_none()
            && self.video_manifest_url.is_none()
            && self.thumbnail_url.is_none()
            && self.status.is_none()
    }
}

/// Truncate to 00:00:00 UTC of the Monday of the ISO week containing `at`.
pub fn week_monday(at: DateTime<Utc>) -> DateTime<Utc> {
    let days_from_monday = at.weekday().num_days_from_monday() as i64;
    let monday = (at - chrono::Duration::days(days_from_monday)).date_naive();
    DateTime::from_naive_utc_and_offset(
        monday.and_hms_opt(0, 0, 0).expect("midnight is valid"),
        Utc,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_video() -> Video {
        let now = Utc.with_ymd_and_hms(2024, 6, 12, 10, 30, 0).unwrap();
        Video {
            project_id: "p1".to_string(),
            title: "Deep Sea".to_string(),
            video_url: "https://drive.example/v1".to_string(),
            video_manifest_url: "https://drive.example/v1.mpd".to_string(),
            thumbnail_url: "https://drive.example/v1.jpg".to_string(),
            category: VideoCategory::Ib,
            kind: VideoType::OneMin,
            post_week_day: week_monday(now),
            author_id: "author-1".to_string(),
            author_name: "Ada".to_string(),
            channel_owner_id: None,
            channel_owner_name: None,
            status: VideoStatus::Ready,
            claimed_at: None,
            created_at: now,
            modified_at: now,
        }
    }

    #[test]
    fn test_enum_round_trip() {
        for s in ["ib", "cat", "mermaid"] {
            assert_eq!(VideoCategory::from_str(s).unwrap().as_str(), s);
        }
        for s in ["1min", "shorts"] {
            assert_eq!(VideoType::from_str(s).unwrap().as_str(), s);
        }
        for s in ["ready", "revisioning", "claimed", "posted"] {
            assert_eq!(VideoStatus::from_str(s).unwrap().as_str(), s);
        }
    }

    #[test]
    fn test_enum_rejects_unknown() {
        assert!(VideoCategory::from_str("dog").is_none());
        assert!(VideoType::from_str("2min").is_none());
        assert!(VideoStatus::from_str("archived").is_none());
    }

    #[test]
    fn test_parse_rejects_bad_enum_naming_field() {
        let mut record = sample_video().to_record();
        record.category = "dog".to_string();
        let err = Video::parse(&record).unwrap_err();
        assert_eq!(err, ValidationError::invalid_enum("category", "dog"));
    }

    #[test]
    fn test_raw_date_representations() {
        let expected = Utc.with_ymd_and_hms(2024, 6, 12, 10, 30, 0).unwrap();

        let native = RawDate::Timestamp(expected);
        assert_eq!(native.normalize("created_at").unwrap(), expected);

        let text = RawDate::Text("2024-06-12T10:30:00Z".to_string());
        assert_eq!(text.normalize("created_at").unwrap(), expected);

        let epoch = RawDate::EpochMillis(expected.timestamp_millis());
        assert_eq!(epoch.normalize("created_at").unwrap(), expected);
    }

    #[test]
    fn test_raw_date_rejects_garbage() {
        let bad = RawDate::Text("next tuesday".to_string());
        assert_eq!(
            bad.normalize("post_week_day").unwrap_err(),
            ValidationError::invalid_date("post_week_day")
        );
    }

    #[test]
    fn test_record_round_trip() {
        let video = sample_video();
        let parsed = Video::parse(&video.to_record()).unwrap();
        assert_eq!(parsed, video);

        let mut claimed = sample_video();
        claimed.channel_owner_id = Some("u1".to_string());
        claimed.channel_owner_name = Some("Grace".to_string());
        claimed.claimed_at = Some(claimed.created_at);
        claimed.status = VideoStatus::Claimed;
        let parsed = Video::parse(&claimed.to_record()).unwrap();
        assert_eq!(parsed, claimed);
    }

    #[test]
    fn test_record_json_round_trip() {
        let record = sample_video().to_record();
        let json = serde_json::to_string(&record).unwrap();
        let back: VideoRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_week_monday_truncation() {
        // Wednesday 2024-06-12 -> Monday 2024-06-10
        let wed = Utc.with_ymd_and_hms(2024, 6, 12, 15, 45, 9).unwrap();
        assert_eq!(
            week_monday(wed),
            Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap()
        );

        // A Monday maps to itself at midnight
        let mon = Utc.with_ymd_and_hms(2024, 6, 10, 23, 59, 59).unwrap();
        assert_eq!(
            week_monday(mon),
            Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap()
        );

        // ISO week spanning a year boundary: Wed 2025-01-01 -> Mon 2024-12-30
        let new_year = Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap();
        assert_eq!(
            week_monday(new_year),
            Utc.with_ymd_and_hms(2024, 12, 30, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_new_video_defaults() {
        let now = Utc.with_ymd_and_hms(2024, 6, 12, 10, 30, 0).unwrap();
        let video = NewVideo {
            project_id: "p2".to_string(),
            title: "Mermaid Cove".to_string(),
            video_url: "https://drive.example/v2".to_string(),
            video_manifest_url: "https://drive.example/v2.mpd".to_string(),
            thumbnail_url: "https://drive.example/v2.jpg".to_string(),
            category: VideoCategory::Mermaid,
            kind: VideoType::Shorts,
            author_id: "author-2".to_string(),
            author_name: "Lin".to_string(),
        }
        .into_video(now);

        assert_eq!(video.status, VideoStatus::Ready);
        assert!(video.channel_owner_id.is_none());
        assert!(video.claimed_at.is_none());
        assert_eq!(video.post_week_day, week_monday(now));
        assert_eq!(video.created_at, now);
        assert_eq!(video.modified_at, now);
    }

    #[test]
    fn test_video_update_is_empty() {
        assert!(VideoUpdate::default().is_empty());
        let update = VideoUpdate {
            status: Some(VideoStatus::Revisioning),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
