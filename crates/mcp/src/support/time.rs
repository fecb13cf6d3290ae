#![forbid(unsafe_code)]

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const EPOCH_RFC3339: &str = "1970-01-01T00:00:00Z";

pub(crate) fn now_rfc3339() -> String {
    format_rfc3339(OffsetDateTime::now_utc())
}

pub(crate) fn format_rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339)
        .unwrap_or_else(|_| EPOCH_RFC3339.to_string())
}

/// Whole milliseconds since `since`; zero when the wall clock stepped backwards.
pub(crate) fn elapsed_ms(since: OffsetDateTime) -> u64 {
    let elapsed = (OffsetDateTime::now_utc() - since).whole_milliseconds();
    elapsed.clamp(0, u64::MAX as i128) as u64
}
