//! Administrative API.
//!
//! Routes live under `/api/gateway/`, so the API key gate covers them like
//! any other `/api/` path.

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};

use self::handlers::*;
use crate::http::server::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/gateway/upstreams", get(get_upstreams))
        .route("/api/gateway/api-key/rotate", post(rotate_api_key))
}
