// handlers/assets.rs

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::instrument;

use crate::types::AppState;

#[derive(Serialize, Debug)]
pub struct AssetInfo {
    pub path: String,
    pub loop_dur_ms: i64,
    pub segment_dur_ms: i64,
    pub mpds: Vec<String>,
    pub representations: Vec<String>,
}

/// `/assets`: the loaded VoD assets and their representations.
#[instrument(skip_all)]
pub async fn list_assets(State(state): State<AppState>) -> Json<Vec<AssetInfo>> {
    let infos = state
        .store
        .assets()
        .map(|asset| AssetInfo {
            path: asset.asset_path.clone(),
            loop_dur_ms: asset.loop_dur_ms,
            segment_dur_ms: asset.segment_dur_ms,
            mpds: asset.mpd_names().map(|n| n.to_string()).collect(),
            representations: asset.reps.keys().cloned().collect(),
        })
        .collect();
    Json(infos)
}

pub async fn healthz() -> &'static str {
    "ok"
}
