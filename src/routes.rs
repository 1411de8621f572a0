use crate::handlers;
use crate::state::AppState;
use axum::http::{HeaderName, Method};
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            HeaderName::from_static("x-user-id"),
            HeaderName::from_static("x-request-id"),
        ]);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/question-sets/:id", get(handlers::get_question_set))
        .route("/api/v1/attempts", post(handlers::create_attempt))
        .route("/api/v1/attempts/:id", get(handlers::get_attempt))
        .route("/api/v1/attempts/:id/current", get(handlers::current))
        .route("/api/v1/attempts/:id/answer", post(handlers::submit_answer))
        .route("/api/v1/attempts/:id/next", post(handlers::next_question))
        .route("/api/v1/attempts/:id/complete", post(handlers::complete_attempt))
        .route("/api/v1/attempts/:id/review", get(handlers::review_attempt))
        .route("/api/v1/users/:user_id/attempts", get(handlers::list_user_attempts))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
}
