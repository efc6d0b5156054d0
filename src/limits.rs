//! Hard limits. Every externally reachable allocation or loop is bounded by
//! one of these.

use crate::model::Ms;

/// Earliest accepted instant: 2000-01-01T00:00:00Z.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;

/// Latest accepted instant: 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single occurrence may not span more than 7 days.
pub const MAX_SPAN_DURATION_MS: Ms = 7 * 24 * 3_600_000;

/// Upper bound on occurrences emitted by one series expansion. A weekly
/// pattern hits this after roughly four years.
pub const MAX_SERIES_OCCURRENCES: usize = 208;

/// Availability queries are capped at a 92-day window.
pub const MAX_QUERY_WINDOW_MS: Ms = 92 * 24 * 3_600_000;

pub const MAX_RESOURCES_PER_TENANT: usize = 100_000;
pub const MAX_OCCURRENCES_PER_RESOURCE: usize = 100_000;
pub const MAX_ATTENDEES_PER_OCCURRENCE: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LABEL_LEN: usize = 1024;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;
