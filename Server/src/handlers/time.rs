// handlers/time.rs
//
// Wall-clock endpoints players can use as UTCTiming sources.

use chrono::Utc;

use crate::types::unix_now_ms;

/// `/utc/unix`: decimal unix seconds.
pub async fn utc_unix() -> String {
    format!("{}", unix_now_ms() / 1000)
}

/// `/utc/iso`: ISO-8601 Zulu time with second precision.
pub async fn utc_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
