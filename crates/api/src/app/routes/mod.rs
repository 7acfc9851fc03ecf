use axum::{routing::get, Router};

pub mod commands;
pub mod system;

/// Router for all endpoints that require a principal.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/commands", commands::router())
}
