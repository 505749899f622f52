//! Route table.
//!
//! Every endpoint accepts GET and POST; parameters come from the query
//! string, the JSON body, or headers.

use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/interrogate",
            get(handlers::interrogate).post(handlers::interrogate),
        )
        .route(
            "/chat-with-reader",
            get(handlers::chat_with_reader).post(handlers::chat_with_reader),
        )
        .route("/crawl", get(handlers::crawl).post(handlers::crawl))
        .route("/crunch", post(handlers::crunch))
        .route("/healthz", get(handlers::healthz))
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
