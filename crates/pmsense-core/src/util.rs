//! Utility functions for pmsense-core.

use time::UtcOffset;

/// The machine's current UTC offset, or UTC if it cannot be determined.
///
/// On Unix the offset can only be read safely while the process is
/// single-threaded, so call this before starting a multi-threaded runtime
/// and pass the result to [`SamplerConfig::utc_offset`](crate::SamplerConfig::utc_offset).
pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}
