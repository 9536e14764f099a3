//! HTTP and websocket surface

pub mod error;
pub mod handlers;
pub mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::runtime::Runtime;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
}

/// Builds the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/distil/datasets", get(handlers::datasets))
        .route("/distil/datasets/:dataset", get(handlers::dataset))
        .route(
            "/distil/variables/:dataset",
            get(handlers::variables).post(handlers::set_variable_type_handler),
        )
        .route(
            "/distil/variable-summary/:dataset/:variable",
            post(handlers::variable_summary),
        )
        .route("/distil/data/:dataset/:invert", post(handlers::data))
        .route(
            "/distil/results/:dataset/:solution_id",
            post(handlers::results),
        )
        .route(
            "/distil/predicted-summary/:dataset/:target/:solution_id",
            post(handlers::predicted_summary),
        )
        .route(
            "/distil/residuals-summary/:dataset/:target/:solution_id",
            post(handlers::residuals_summary),
        )
        .route(
            "/distil/correctness-summary/:dataset/:solution_id",
            post(handlers::correctness_summary),
        )
        .route(
            "/distil/variable-extrema/:dataset/:variable",
            get(handlers::variable_extrema),
        )
        .route(
            "/distil/training-summary/:dataset/:variable/:solution_id",
            post(handlers::training_summary),
        )
        .route("/distil/abort", get(handlers::abort))
        .route("/distil/export/:solution_id", get(handlers::export))
        .route("/ws", get(ws::handler))
        .with_state(state)
}
