use crate::orchestrator::Served;
use crate::state::App;
use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use flate2::{write::GzEncoder, Compression};
use std::io::Write;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/", get(hello))
        .route("/favicon.ico", get(favicon))
        .fallback(get(serve_module))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(app)
}

async fn hello() -> &'static str {
    "Hello"
}

async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Module bodies always ship gzipped, whatever `Accept-Encoding` the client
/// sent; the canonical URL is the cache key for intermediaries, not the
/// coding.
fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("writing to an in-memory encoder can't fail");
    encoder.finish().expect("finishing an in-memory gzip stream can't fail")
}

/// Every path that isn't a liveness endpoint goes through the orchestrator.
async fn serve_module(State(app): State<Arc<App>>, uri: Uri) -> Response {
    match app.handle(uri.path(), uri.query()).await {
        Ok(Served::Redirect(location)) => {
            (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, location)]).into_response()
        }
        Ok(Served::Module(bytes)) => (
            [
                (header::CONTENT_TYPE, "application/javascript"),
                (header::CONTENT_ENCODING, "gzip"),
            ],
            gzip(&bytes),
        )
            .into_response(),
        Ok(Served::NoContent) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => {
            tracing::debug!(target: "modcdn::serve", path = uri.path(), %error, "Request failed");
            error.into_response()
        }
    }
}
