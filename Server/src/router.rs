use std::sync::Arc;

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::instrument;

use crate::asset::AssetStore;
use crate::handlers::{assets, livesim, time};
use crate::types::AppState;

#[instrument(skip_all)]
pub fn create_router(store: Arc<AssetStore>) -> Router {
    let app_state = AppState { store };

    Router::new()
        // The simulator: URL config segments followed by the content part
        .route("/livesim/*path", get(livesim::handle_livesim))
        // Wall-clock endpoints for UTCTiming
        .route("/utc/unix", get(time::utc_unix))
        .route("/utc/iso", get(time::utc_iso))
        // Introspection
        .route("/assets", get(assets::list_assets))
        .route("/healthz", get(assets::healthz))
        // Apply middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(app_state)
}
