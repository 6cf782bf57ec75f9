// handlers/livesim.rs

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, instrument};

use crate::asset::Asset;
use crate::configurl::{process_url_cfg, ResponseConfig};
use crate::errors::LiveSimError;
use crate::livempd::live_mpd;
use crate::livesegment::{chunk_segment, find_media_segment, live_segment, send_chunks, ChunkTiming};
use crate::types::{unix_now_ms, AppState};

/// The simulator entry point: the wildcard path carries the URL config
/// followed by the content part (manifest name or segment path).
#[instrument(skip_all)]
pub async fn handle_livesim(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, LiveSimError> {
    let now_ms = unix_now_ms();
    let full_path = format!("/livesim/{}", path);
    let parts: Vec<&str> = full_path.split('/').collect();
    let (cfg, content_idx) = process_url_cfg(&parts, now_ms)?;
    let content = parts[content_idx..].join("/");

    let (asset, content_part) = state
        .store
        .find_asset_and_content(&content)
        .ok_or(LiveSimError::NotFound)?;

    if content_part.ends_with(".mpd") {
        let mpd = live_mpd(asset, content_part, &cfg, now_ms)?;
        let xml = dash_manifest::writer::write_mpd(&mpd)
            .map_err(|e| LiveSimError::Manifest(e.to_string()))?;
        debug!(mpd = content_part, "serving live manifest");
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/dash+xml")
            .body(Body::from(xml))
            .unwrap());
    }

    if let Some(rep) = asset.find_init(content_part) {
        debug!(init = content_part, "serving init segment");
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "video/mp4")
            .header(header::CONTENT_LENGTH, rep.init_bytes.len())
            .body(Body::from(rep.init_bytes.clone()))
            .unwrap());
    }

    let ato = cfg.availability_time_offset_s();
    if ato > 0.0 && ato.is_finite() {
        return chunked_response(asset, &cfg, content_part, now_ms);
    }

    let data = live_segment(asset, &cfg, content_part, now_ms)?;
    debug!(segment = content_part, bytes = data.len(), "serving media segment");
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CONTENT_LENGTH, data.len())
        .body(Body::from(data))
        .unwrap())
}

/// Low-latency delivery: the segment is cut into chunks that are streamed
/// out as their availability times pass on the simulated clock. Locating,
/// rewriting and chunking happen before the response starts, so TooEarly
/// and Gone still map to proper statuses.
fn chunked_response(
    asset: &Asset,
    cfg: &ResponseConfig,
    segment_part: &str,
    now_ms: i64,
) -> Result<Response, LiveSimError> {
    let (seg, seg_ref) = find_media_segment(asset, cfg, segment_part, now_ms)?;
    let ato = cfg.availability_time_offset_s();
    let chunk_dur =
        (asset.segment_dur_ms - (ato * 1000.0) as i64) * seg_ref.timescale as i64 / 1000;
    if chunk_dur <= 0 {
        return Err(LiveSimError::UrlConfig(
            "key=ato, err=not smaller than segment duration".to_string(),
        ));
    }
    let chunks = chunk_segment(&seg_ref.rep.init_seg, &seg, &seg_ref, chunk_dur)?;
    debug!(
        segment = segment_part,
        chunks = chunks.len(),
        "serving chunked media segment"
    );

    let timing = ChunkTiming {
        timescale: seg_ref.timescale as i64,
        new_time: seg_ref.new_time,
        start_time_s: cfg.start_time_s,
        now_ms,
    };
    let (tx, rx) = mpsc::channel::<Bytes>(4);
    tokio::spawn(async move {
        if let Err(e) = send_chunks(tx, chunks, timing).await {
            debug!(error = %e, "chunked transfer ended early");
        }
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, std::convert::Infallible>);
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .body(Body::from_stream(stream))
        .unwrap())
}
