//! Shared data models for the postdesk backend.
//!
//! This crate provides Serde-serializable types for:
//! - Video records (normalized and raw storage forms)
//! - Category/type/status enumerations
//! - Date normalization between storage representations

pub mod video;

// Re-export common types
pub use video::{
    week_monday, NewVideo, RawDate, ValidationError, Video, VideoCategory, VideoRecord,
    VideoStatus, VideoType, VideoUpdate,
};
