//! Small time helpers shared across the block-server core.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_msec() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("system clock is before the Unix epoch")
		.as_millis() as u64
}

/// Render a millisecond Unix timestamp as an RFC 3339 string, for logs and
/// persisted metadata.
pub fn msec_to_rfc3339(msec: u64) -> String {
	let secs = (msec / 1000) as i64;
	let nsecs = ((msec % 1000) * 1_000_000) as u32;
	match chrono::NaiveDateTime::from_timestamp_opt(secs, nsecs) {
		Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
		None => "invalid-timestamp".into(),
	}
}
