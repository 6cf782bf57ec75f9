//! Error kinds of the live projection engine and their HTTP mapping.
//!
//! `TooEarly` and `Gone` are ordinary live-edge outcomes: the player asked
//! for a segment outside the availability window. They map to client
//! statuses and are not logged as server errors.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum LiveSimError {
    /// The requested segment is not yet available; the payload is the
    /// number of milliseconds until it will be.
    #[error("segment not available yet, retry in {0} ms")]
    TooEarly(i64),

    /// The requested segment has left the time-shift buffer.
    #[error("gone")]
    Gone,

    #[error("not found")]
    NotFound,

    /// A media URL matched a representation but no segment, e.g.
    /// `segment time mismatch 1000 <-> 0`.
    #[error("{0}")]
    SegmentNotFound(String),

    /// URL-config parsing failure, e.g. `key=tsbd, err=...`.
    #[error("{0}")]
    UrlConfig(String),

    #[error("latencyTargetMS (ltgt) not set")]
    LatencyTargetNotSet,

    #[error("infinite availabilityTimeOffset cannot be combined with SegmentTimeline")]
    AtoInfTimeline,

    #[error("period duration {period_dur_s}s not a multiple of segment duration {segment_dur_ms}ms")]
    PeriodDurationMismatch { period_dur_s: i64, segment_dur_ms: i64 },

    /// Malformed ISO-BMFF content in the VoD source.
    #[error("mp4: {0}")]
    Mp4(String),

    #[error("manifest: {0}")]
    Manifest(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The client closed the connection mid-transfer. Never sent as a
    /// response; surfaced only so the transmitter can stop promptly.
    #[error("connection closed by client")]
    ClientGone,
}

impl LiveSimError {
    fn status(&self) -> StatusCode {
        match self {
            LiveSimError::TooEarly(_)
            | LiveSimError::NotFound
            | LiveSimError::SegmentNotFound(_) => StatusCode::NOT_FOUND,
            LiveSimError::Gone => StatusCode::GONE,
            LiveSimError::UrlConfig(_)
            | LiveSimError::LatencyTargetNotSet
            | LiveSimError::AtoInfTimeline => StatusCode::BAD_REQUEST,
            LiveSimError::PeriodDurationMismatch { .. }
            | LiveSimError::Mp4(_)
            | LiveSimError::Manifest(_)
            | LiveSimError::Io(_)
            | LiveSimError::ClientGone => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LiveSimError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "request failed");
        } else {
            tracing::debug!(status = %status, error = %self, "client outcome");
        }

        match self {
            LiveSimError::TooEarly(retry_ms) => {
                let retry_s = (retry_ms + 999) / 1000;
                (
                    status,
                    [(header::RETRY_AFTER, retry_s.max(1).to_string())],
                    self.to_string(),
                )
                    .into_response()
            }
            _ => (status, self.to_string()).into_response(),
        }
    }
}
