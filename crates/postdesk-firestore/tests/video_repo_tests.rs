//! Repository tests against a stubbed Firestore REST endpoint.
//!
//! The client is pointed at a wiremock server through the emulator host
//! setting, so these tests exercise the real request/response paths
//! (preconditions, query bodies, aggregation decoding) without GCP.

use std::time::Duration;

use serde_json::{json, Value as Json};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use postdesk_firestore::video_repo::{VideoError, VideoRepository};
use postdesk_firestore::{FirestoreClient, FirestoreConfig, RetryConfig};
use postdesk_models::{NewVideo, VideoCategory, VideoStatus, VideoType, VideoUpdate};

const PROJECT: &str = "test-project";
const DOC_PATH: &str = "/v1/projects/test-project/databases/(default)/documents/videos/p1";
const QUERY_PATH: &str = "/v1/projects/test-project/databases/(default)/documents:runQuery";
const AGG_PATH: &str =
    "/v1/projects/test-project/databases/(default)/documents:runAggregationQuery";

const T1: &str = "2025-06-02T10:00:00.000000Z";
const T2: &str = "2025-06-02T10:00:01.000000Z";

async fn test_repo(server: &MockServer) -> VideoRepository {
    let config = FirestoreConfig {
        project_id: PROJECT.to_string(),
        database_id: "(default)".to_string(),
        timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
        retry: RetryConfig {
            max_retries: 2,
            base_delay_ms: 5,
            max_delay_ms: 20,
        },
        emulator_host: Some(server.uri()),
    };
    VideoRepository::new(FirestoreClient::new(config).await.unwrap())
}

fn owner_field(owner: Option<&str>) -> Json {
    match owner {
        Some(id) => json!({ "stringValue": id }),
        None => json!({ "nullValue": null }),
    }
}

/// Stored document JSON as the REST API returns it.
fn video_doc(project_id: &str, owner: Option<(&str, &str)>, update_time: &str) -> Json {
    let status = if owner.is_some() { "claimed" } else { "ready" };
    json!({
        "name": format!(
            "projects/test-project/databases/(default)/documents/videos/{}",
            project_id
        ),
        "fields": {
            "project_id": { "stringValue": project_id },
            "title": { "stringValue": "Deep Sea" },
            "video_url": { "stringValue": "https://drive.example/v1" },
            "video_manifest_url": { "stringValue": "https://drive.example/v1.mpd" },
            "thumbnail_url": { "stringValue": "https://drive.example/v1.jpg" },
            "category": { "stringValue": "ib" },
            "type": { "stringValue": "1min" },
            "post_week_day": { "timestampValue": "2025-06-02T00:00:00.000000Z" },
            "author_id": { "stringValue": "author-1" },
            "author_name": { "stringValue": "Ada" },
            "channel_owner_id": owner_field(owner.map(|(id, _)| id)),
            "channel_owner_name": owner_field(owner.map(|(_, name)| name)),
            "status": { "stringValue": status },
            "claimed_at": if owner.is_some() {
                json!({ "timestampValue": update_time })
            } else {
                json!({ "nullValue": null })
            },
            "created_at": { "timestampValue": "2025-06-02T09:00:00.000000Z" },
            "modified_at": { "timestampValue": "2025-06-02T09:00:00.000000Z" }
        },
        "createTime": "2025-06-02T09:00:00.000000Z",
        "updateTime": update_time
    })
}

// =============================================================================
// Claim
// =============================================================================

#[tokio::test]
async fn claim_succeeds_on_unowned_video() {
    let server = MockServer::start().await;
    let repo = test_repo(&server).await;

    Mock::given(method("GET"))
        .and(path(DOC_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(video_doc("p1", None, T1)))
        .expect(1)
        .mount(&server)
        .await;

    // The write must carry the updateTime observed by the read.
    Mock::given(method("PATCH"))
        .and(path(DOC_PATH))
        .and(query_param("currentDocument.updateTime", T1))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(video_doc("p1", Some(("u1", "Grace")), T2)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let video = repo.claim("p1", "u1", "Grace").await.unwrap();
    assert_eq!(video.channel_owner_id.as_deref(), Some("u1"));
    assert_eq!(video.channel_owner_name.as_deref(), Some("Grace"));
    assert_eq!(video.status, VideoStatus::Claimed);
    assert!(video.claimed_at.is_some());
}

#[tokio::test]
async fn claim_loser_observes_winner_after_lost_race() {
    let server = MockServer::start().await;
    let repo = test_repo(&server).await;

    // First read sees the video unowned.
    Mock::given(method("GET"))
        .and(path(DOC_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(video_doc("p1", None, T1)))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    // A competing claim commits between our read and write, so the
    // precondition fails.
    Mock::given(method("PATCH"))
        .and(path(DOC_PATH))
        .and(query_param("currentDocument.updateTime", T1))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": {
                "code": 409,
                "message": "the stored version of the document does not match the required base version",
                "status": "FAILED_PRECONDITION"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    // The re-read observes the winner.
    Mock::given(method("GET"))
        .and(path(DOC_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(video_doc("p1", Some(("u2", "Lin")), T2)),
        )
        .mount(&server)
        .await;

    let err = repo.claim("p1", "u1", "Grace").await.unwrap_err();
    assert!(matches!(err, VideoError::AlreadyClaimed { .. }));
}

#[tokio::test]
async fn claim_is_idempotent_for_current_owner_without_writing() {
    let server = MockServer::start().await;
    let repo = test_repo(&server).await;

    Mock::given(method("GET"))
        .and(path(DOC_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(video_doc("p1", Some(("u1", "Grace")), T2)),
        )
        .expect(1)
        .mount(&server)
        .await;

    // No write may happen on the idempotent path.
    Mock::given(method("PATCH"))
        .and(path(DOC_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let video = repo.claim("p1", "u1", "Grace").await.unwrap();
    assert_eq!(video.channel_owner_id.as_deref(), Some("u1"));
    // modified_at is whatever was stored, not a fresh timestamp
    assert_eq!(
        video.modified_at.to_rfc3339(),
        "2025-06-02T09:00:00+00:00"
    );
}

#[tokio::test]
async fn claim_of_missing_video_is_not_found() {
    let server = MockServer::start().await;
    let repo = test_repo(&server).await;

    Mock::given(method("GET"))
        .and(path(DOC_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": 404, "message": "not found", "status": "NOT_FOUND" }
        })))
        .mount(&server)
        .await;

    let err = repo.claim("p1", "u1", "Grace").await.unwrap_err();
    assert!(matches!(err, VideoError::NotFound { .. }));
}

#[tokio::test]
async fn claim_rejects_empty_identities_before_any_request() {
    let server = MockServer::start().await;
    let repo = test_repo(&server).await;

    assert!(matches!(
        repo.claim("", "u1", "Grace").await.unwrap_err(),
        VideoError::InvalidInput { field: "project_id" }
    ));
    assert!(matches!(
        repo.claim("p1", "", "Grace").await.unwrap_err(),
        VideoError::InvalidInput { field: "channel_owner_id" }
    ));
    assert!(matches!(
        repo.claim("p1", "u1", "").await.unwrap_err(),
        VideoError::InvalidInput { field: "channel_owner_name" }
    ));
}

// =============================================================================
// Mutations
// =============================================================================

#[tokio::test]
async fn update_of_claimed_video_is_rejected() {
    let server = MockServer::start().await;
    let repo = test_repo(&server).await;

    Mock::given(method("GET"))
        .and(path(DOC_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(video_doc("p1", Some(("u2", "Lin")), T2)),
        )
        .mount(&server)
        .await;

    let update = VideoUpdate {
        status: Some(VideoStatus::Revisioning),
        ..Default::default()
    };
    let err = repo.update("p1", update).await.unwrap_err();
    assert!(matches!(err, VideoError::ClaimedImmutable { .. }));
}

#[tokio::test]
async fn update_with_no_fields_is_rejected() {
    let server = MockServer::start().await;
    let repo = test_repo(&server).await;

    let err = repo.update("p1", VideoUpdate::default()).await.unwrap_err();
    assert!(matches!(err, VideoError::InvalidUpdate));
}

#[tokio::test]
async fn delete_of_claimed_video_is_rejected() {
    let server = MockServer::start().await;
    let repo = test_repo(&server).await;

    Mock::given(method("GET"))
        .and(path(DOC_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(video_doc("p1", Some(("u2", "Lin")), T2)),
        )
        .mount(&server)
        .await;

    let err = repo.delete("p1").await.unwrap_err();
    assert!(matches!(err, VideoError::ClaimedImmutable { .. }));
}

#[tokio::test]
async fn delete_carries_the_read_precondition() {
    let server = MockServer::start().await;
    let repo = test_repo(&server).await;

    Mock::given(method("GET"))
        .and(path(DOC_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(video_doc("p1", None, T1)))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(DOC_PATH))
        .and(query_param("currentDocument.updateTime", T1))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    repo.delete("p1").await.unwrap();
}

#[tokio::test]
async fn create_conflict_maps_to_already_exists() {
    let server = MockServer::start().await;
    let repo = test_repo(&server).await;

    Mock::given(method("POST"))
        .and(path(
            "/v1/projects/test-project/databases/(default)/documents/videos",
        ))
        .and(query_param("documentId", "p1"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": { "code": 409, "message": "already exists", "status": "ALREADY_EXISTS" }
        })))
        .mount(&server)
        .await;

    let err = repo
        .create(NewVideo {
            project_id: "p1".to_string(),
            title: "Deep Sea".to_string(),
            video_url: "https://drive.example/v1".to_string(),
            video_manifest_url: "https://drive.example/v1.mpd".to_string(),
            thumbnail_url: "https://drive.example/v1.jpg".to_string(),
            category: VideoCategory::Ib,
            kind: VideoType::OneMin,
            author_id: "author-1".to_string(),
            author_name: "Ada".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, VideoError::AlreadyExists { .. }));
}

// =============================================================================
// Reads
// =============================================================================

#[tokio::test]
async fn get_rejects_claimed_video_when_asked() {
    let server = MockServer::start().await;
    let repo = test_repo(&server).await;

    Mock::given(method("GET"))
        .and(path(DOC_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(video_doc("p1", Some(("u2", "Lin")), T2)),
        )
        .mount(&server)
        .await;

    let err = repo.get("p1", true).await.unwrap_err();
    assert!(matches!(err, VideoError::ClaimedImmutable { .. }));

    let video = repo.get("p1", false).await.unwrap();
    assert_eq!(video.channel_owner_id.as_deref(), Some("u2"));
}

// =============================================================================
// Pagination
// =============================================================================

fn query_result(doc: Json) -> Json {
    json!({ "document": doc, "readTime": "2025-06-02T12:00:00.000000Z" })
}

#[tokio::test]
async fn listing_pages_until_the_short_page() {
    let server = MockServer::start().await;
    let repo = test_repo(&server).await;

    // Full first page of 2.
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            query_result(video_doc("p1", None, T1)),
            query_result(video_doc("p2", None, T1)),
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let page = repo
        .list_by_category_type(
            VideoCategory::Ib,
            VideoType::OneMin,
            VideoStatus::Ready,
            Some(2),
            None,
        )
        .await
        .unwrap();
    assert_eq!(page.videos.len(), 2);
    assert!(page.has_more);
    let cursor = page.next_cursor.expect("full page yields a cursor");

    // The second request resumes strictly after the cursor document.
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(body_partial_json(json!({
            "structuredQuery": {
                "startAt": {
                    "values": [
                        { "timestampValue": "2025-06-02T00:00:00.000000Z" },
                        { "referenceValue":
                            "projects/test-project/databases/(default)/documents/videos/p2" }
                    ],
                    "before": false
                }
            }
        })))
        .respond_with(ResponseTemplate::new(200)
            .set_body_json(json!([query_result(video_doc("p3", None, T1))])))
        .expect(1)
        .mount(&server)
        .await;

    let page = repo
        .list_by_category_type(
            VideoCategory::Ib,
            VideoType::OneMin,
            VideoStatus::Ready,
            Some(2),
            Some(&cursor),
        )
        .await
        .unwrap();
    assert_eq!(page.videos.len(), 1);
    assert!(!page.has_more);
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn exact_multiple_page_reports_has_more_once_too_often() {
    // Known non-exactness of the page-full heuristic: when the collection
    // size is an exact multiple of the page size, the last full page claims
    // has_more and the follow-up fetch comes back empty.
    let server = MockServer::start().await;
    let repo = test_repo(&server).await;

    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            query_result(video_doc("p1", None, T1)),
            query_result(video_doc("p2", None, T1)),
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    // runQuery on an exhausted range returns a single readTime-only entry.
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200)
            .set_body_json(json!([{ "readTime": "2025-06-02T12:00:00.000000Z" }])))
        .mount(&server)
        .await;

    let first = repo
        .list_by_category_type(
            VideoCategory::Ib,
            VideoType::OneMin,
            VideoStatus::Ready,
            Some(2),
            None,
        )
        .await
        .unwrap();
    assert!(first.has_more);

    let second = repo
        .list_by_category_type(
            VideoCategory::Ib,
            VideoType::OneMin,
            VideoStatus::Ready,
            Some(2),
            first.next_cursor.as_deref(),
        )
        .await
        .unwrap();
    assert!(second.videos.is_empty());
    assert!(!second.has_more);
}

#[tokio::test]
async fn listing_rejects_garbage_cursor() {
    let server = MockServer::start().await;
    let repo = test_repo(&server).await;

    let err = repo
        .list_by_category_type(
            VideoCategory::Ib,
            VideoType::OneMin,
            VideoStatus::Ready,
            None,
            Some("not-a-cursor"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, VideoError::InvalidArgument { field: "cursor" }));
}

#[tokio::test]
async fn unparseable_query_body_with_multibyte_text_is_an_error() {
    let server = MockServer::start().await;
    let repo = test_repo(&server).await;

    // Non-JSON body where the 200-byte mark lands inside a multibyte
    // character; truncating the error context must not split it.
    let body = format!("{}ééééé", "x".repeat(199));
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&server)
        .await;

    let err = repo
        .list_by_category_type(
            VideoCategory::Ib,
            VideoType::OneMin,
            VideoStatus::Ready,
            None,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, VideoError::Store(_)));
    assert!(err.to_string().contains("runQuery"));
}

#[tokio::test]
async fn list_by_owner_requires_owner_id() {
    let server = MockServer::start().await;
    let repo = test_repo(&server).await;

    let err = repo
        .list_by_owner(VideoCategory::Cat, VideoType::Shorts, "", None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VideoError::InvalidArgument { field: "channel_owner_id" }
    ));
}

// =============================================================================
// Counts
// =============================================================================

fn count_response(total: u64) -> Json {
    json!([{
        "result": {
            "aggregateFields": { "total": { "integerValue": total.to_string() } }
        },
        "readTime": "2025-06-02T12:00:00.000000Z"
    }])
}

#[tokio::test]
async fn count_decodes_aggregation_response() {
    let server = MockServer::start().await;
    let repo = test_repo(&server).await;

    Mock::given(method("POST"))
        .and(path(AGG_PATH))
        .and(body_partial_json(json!({
            "structuredAggregationQuery": {
                "aggregations": [{ "alias": "total", "count": {} }]
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(count_response(7)))
        .mount(&server)
        .await;

    let count = repo
        .count_by_category_type(VideoCategory::Ib, VideoType::OneMin, VideoStatus::Ready)
        .await
        .unwrap();
    assert_eq!(count, 7);
}

#[tokio::test]
async fn candidate_count_drops_after_a_claim() {
    let server = MockServer::start().await;
    let repo = test_repo(&server).await;

    Mock::given(method("POST"))
        .and(path(AGG_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(count_response(5)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(AGG_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(count_response(4)))
        .mount(&server)
        .await;

    let before = repo
        .count_by_category_type(VideoCategory::Ib, VideoType::OneMin, VideoStatus::Ready)
        .await
        .unwrap();
    let after = repo
        .count_by_category_type(VideoCategory::Ib, VideoType::OneMin, VideoStatus::Ready)
        .await
        .unwrap();
    assert_eq!(before, 5);
    assert_eq!(after, 4);
}
