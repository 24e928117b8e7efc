//! Zone classification and quota gating.
//!
//! The reader API splits its daily budget into two zones: Zone-1 for
//! read-only endpoints, Zone-2 for everything else. A request is gated
//! against the most recently observed authoritative usage (response headers
//! take precedence over the client's own counters) before it is made.

use ingest_repo::HeaderSnapshot;

/// Default per-zone daily request limit.
pub const DEFAULT_ZONE_LIMIT: u32 = 100;
/// Default safety margin subtracted from the limit before gating.
pub const DEFAULT_SAFETY_BUFFER: u32 = 10;

/// Zone-1 endpoint prefixes. Matched with `starts_with` against the full
/// path, so a concrete per-stream path like `/stream/contents/feed%2F...`
/// still classifies correctly rather than only the bare prefix.
const ZONE1_PREFIXES: &[&str] = &[
    "/subscription/list",
    "/stream/contents/",
    "/stream/items/contents",
    "/user-info",
];

/// Classify a request path into its reader-API quota zone.
pub fn classify_endpoint(path: &str) -> ingest_repo::Zone {
    if ZONE1_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
        ingest_repo::Zone::Zone1
    } else {
        ingest_repo::Zone::Zone2
    }
}

/// Whether a request may be issued, given the current usage, limit, and
/// safety buffer: `usage < limit - safety_buffer`.
pub fn can_issue(usage: u32, limit: u32, safety_buffer: u32) -> bool {
    usage < limit.saturating_sub(safety_buffer)
}

/// Parse the reader API's `X-Reader-Zone{1,2}-{Usage,Limit,Remaining}`
/// response headers into a [`HeaderSnapshot`]. Missing headers fall back to
/// the previous snapshot's values (or zero) so a partial header set doesn't
/// wipe out known state.
pub fn parse_header_snapshot(
    headers: &reqwest::header::HeaderMap,
    previous: Option<HeaderSnapshot>,
) -> Option<HeaderSnapshot> {
    let get = |name: &str| -> Option<u32> {
        headers.get(name)?.to_str().ok()?.parse::<u32>().ok()
    };

    let previous = previous.unwrap_or_default();
    let snapshot = HeaderSnapshot {
        zone1_usage: get("X-Reader-Zone1-Usage").unwrap_or(previous.zone1_usage),
        zone1_limit: get("X-Reader-Zone1-Limit").unwrap_or(previous.zone1_limit),
        zone1_remaining: get("X-Reader-Zone1-Remaining").unwrap_or(previous.zone1_remaining),
        zone2_usage: get("X-Reader-Zone2-Usage").unwrap_or(previous.zone2_usage),
        zone2_limit: get("X-Reader-Zone2-Limit").unwrap_or(previous.zone2_limit),
        zone2_remaining: get("X-Reader-Zone2-Remaining").unwrap_or(previous.zone2_remaining),
    };

    let any_header_present = ["X-Reader-Zone1-Usage", "X-Reader-Zone1-Limit", "X-Reader-Zone1-Remaining",
        "X-Reader-Zone2-Usage", "X-Reader-Zone2-Limit", "X-Reader-Zone2-Remaining"]
        .iter()
        .any(|name| headers.contains_key(*name));

    if any_header_present { Some(snapshot) } else { None }
}
