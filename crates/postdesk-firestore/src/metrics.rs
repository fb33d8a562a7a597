//! Counters and histograms emitted by the Firestore layer.

use metrics::{counter, histogram};

const REQUESTS_TOTAL: &str = "firestore_requests_total";
const RETRIES_TOTAL: &str = "firestore_retries_total";
const LATENCY_SECONDS: &str = "firestore_latency_seconds";
const CLAIM_OUTCOMES_TOTAL: &str = "postdesk_claim_outcomes_total";

/// Count a finished request and record its latency, labeled by operation
/// and HTTP status.
pub fn record_request(operation: &str, status: u16, latency_ms: f64) {
    counter!(
        REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(LATENCY_SECONDS, "operation" => operation.to_string()).record(latency_ms / 1000.0);
}

pub fn record_retry(operation: &str) {
    counter!(RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

/// Claim transaction outcomes: won, idempotent, conflict, lost_race.
pub fn record_claim_outcome(outcome: &'static str) {
    counter!(CLAIM_OUTCOMES_TOTAL, "outcome" => outcome).increment(1);
}
