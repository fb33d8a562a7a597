//! Cursor-based pagination over structured queries.
//!
//! Pages are ordered by `post_week_day` descending with the document name as
//! a tiebreaker, so the ordering is total and cursors are unambiguous. A
//! cursor token carries the sort value and the document resource name of the
//! last item on the page, URL-encoded so it survives transport in query
//! strings.

use crate::error::{FirestoreError, FirestoreResult};
use crate::types::{Cursor, FieldReference, Order, StructuredQuery, Value};

/// Page size used when the caller does not specify one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;
/// Smallest accepted page size.
pub const MIN_PAGE_SIZE: u32 = 1;
/// Largest accepted page size.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Clamp a requested page size into the accepted range.
pub fn normalize_page_size(requested: Option<u32>) -> u32 {
    requested
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
}

/// Opaque pagination cursor.
///
/// Encodes the sort-field value and full document resource name of the last
/// document on a page. Clients must treat tokens as opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    /// Serialized `post_week_day` value of the last document.
    pub sort_value: String,
    /// Full resource name, e.g. "projects/p/databases/(default)/documents/videos/abc".
    pub doc_path: String,
}

impl PageCursor {
    pub fn new(sort_value: impl Into<String>, doc_path: impl Into<String>) -> Self {
        Self {
            sort_value: sort_value.into(),
            doc_path: doc_path.into(),
        }
    }

    /// Encode into a URL-safe token.
    pub fn encode(&self) -> String {
        let raw = format!("{}|{}", self.sort_value, self.doc_path);
        urlencoding::encode(&raw).into_owned()
    }

    /// Decode a token produced by [`PageCursor::encode`].
    ///
    /// Malformed tokens are rejected rather than silently restarting the
    /// listing from the beginning.
    pub fn decode(token: &str) -> FirestoreResult<Self> {
        let raw = urlencoding::decode(token)
            .map_err(|e| FirestoreError::request_failed(format!("Invalid cursor encoding: {}", e)))?;

        let (sort_value, doc_path) = raw.split_once('|').ok_or_else(|| {
            FirestoreError::request_failed("Invalid cursor: missing separator")
        })?;

        if sort_value.is_empty() || !doc_path.contains("/documents/") {
            return Err(FirestoreError::request_failed(
                "Invalid cursor: malformed document path",
            ));
        }

        Ok(Self {
            sort_value: sort_value.to_string(),
            doc_path: doc_path.to_string(),
        })
    }

    /// Cursor values in query order (sort field, then document name).
    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::TimestampValue(self.sort_value.clone()),
            Value::ReferenceValue(self.doc_path.clone()),
        ]
    }
}

/// Apply the listing order and an optional start cursor to a query.
///
/// Order is `post_week_day` descending, then `__name__` descending so that
/// documents sharing a week sort deterministically. `start_at` with
/// `before: false` resumes strictly after the cursor document.
pub fn apply_page_ordering(
    mut query: StructuredQuery,
    sort_field: &str,
    cursor: Option<&PageCursor>,
) -> StructuredQuery {
    query.order_by = Some(vec![
        Order {
            field: FieldReference {
                field_path: sort_field.to_string(),
            },
            direction: "DESCENDING".to_string(),
        },
        Order {
            field: FieldReference {
                field_path: "__name__".to_string(),
            },
            direction: "DESCENDING".to_string(),
        },
    ]);

    if let Some(cursor) = cursor {
        query.start_at = Some(Cursor {
            values: cursor.to_values(),
            before: Some(false),
        });
    }

    query
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "projects/p/databases/(default)/documents/videos/abc123";

    #[test]
    fn test_cursor_round_trip() {
        let cursor = PageCursor::new("2025-06-02T00:00:00Z", DOC);
        let token = cursor.encode();
        // Token must be URL-safe
        assert!(!token.contains('|'));
        assert!(!token.contains('/'));
        let decoded = PageCursor::decode(&token).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_decode_rejects_missing_separator() {
        let err = PageCursor::decode("notacursor").unwrap_err();
        assert!(err.to_string().contains("separator"));
    }

    #[test]
    fn test_decode_rejects_bad_doc_path() {
        let raw = urlencoding::encode("2025-06-02T00:00:00Z|garbage").into_owned();
        assert!(PageCursor::decode(&raw).is_err());
    }

    #[test]
    fn test_decode_rejects_empty_sort_value() {
        let raw = urlencoding::encode(&format!("|{}", DOC)).into_owned();
        assert!(PageCursor::decode(&raw).is_err());
    }

    #[test]
    fn test_normalize_page_size() {
        assert_eq!(normalize_page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(normalize_page_size(Some(0)), MIN_PAGE_SIZE);
        assert_eq!(normalize_page_size(Some(50)), 50);
        assert_eq!(normalize_page_size(Some(10_000)), MAX_PAGE_SIZE);
    }

    #[test]
    fn test_apply_page_ordering_sets_tiebreaker() {
        let query = StructuredQuery::collection("videos");
        let ordered = apply_page_ordering(query, "post_week_day", None);
        let orders = ordered.order_by.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].field.field_path, "post_week_day");
        assert_eq!(orders[1].field.field_path, "__name__");
        assert!(ordered.start_at.is_none());
    }

    #[test]
    fn test_apply_page_ordering_with_cursor() {
        let cursor = PageCursor::new("2025-06-02T00:00:00Z", DOC);
        let query = StructuredQuery::collection("videos");
        let ordered = apply_page_ordering(query, "post_week_day", Some(&cursor));
        let start = ordered.start_at.unwrap();
        assert_eq!(start.before, Some(false));
        assert_eq!(start.values.len(), 2);
        assert!(matches!(&start.values[1], Value::ReferenceValue(p) if p == DOC));
    }
}
