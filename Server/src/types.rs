use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::asset::AssetStore;

#[derive(Clone, Debug)]
pub struct AppState {
    pub store: Arc<AssetStore>,
}

/// Wall-clock unix time in milliseconds. Read once at request entry so all
/// computations for one request share the same "now".
pub fn unix_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
