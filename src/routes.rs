// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method},
    middleware,
    routing::get,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{exam_topics, questions},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware, instructor_middleware},
};

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ])
}

/// Assembles the main application router.
///
/// * Instructor question routes and admin exam-topic routes.
/// * Authentication runs before the role check on both groups.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    let question_routes = Router::new()
        .route(
            "/api/exams/{exam_id}/exam-topics/{topic_id}/questions",
            get(questions::list_questions).post(questions::create_question),
        )
        .route(
            "/api/exams/{exam_id}/exam-topics/{topic_id}/questions/{question_id}",
            get(questions::get_question)
                .put(questions::update_question)
                .delete(questions::delete_question),
        )
        // Auth first, then Instructor check
        .route_layer(middleware::from_fn(instructor_middleware))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route(
            "/api/admin/exams/{exam_id}/exam-topics",
            get(exam_topics::list_exam_topics).post(exam_topics::create_exam_topic),
        )
        .route(
            "/api/admin/exams/{exam_id}/exam-topics/{id}",
            get(exam_topics::get_exam_topic)
                .put(exam_topics::update_exam_topic)
                .delete(exam_topics::delete_exam_topic),
        )
        .route_layer(middleware::from_fn(admin_middleware))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(question_routes)
        .merge(admin_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
