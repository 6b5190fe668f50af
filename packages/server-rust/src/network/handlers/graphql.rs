//! One-shot operation endpoint.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use topicast_core::{ErrorCode, GraphQlError, HttpResponse, Transport};

use super::AppState;

/// Handles `POST /graphql`.
///
/// The body is the operation object; the reply carries the operation's
/// status code and body. Subscriptions are rejected with 400 because this
/// channel cannot receive pushes.
pub async fn graphql_handler(State(state): State<AppState>, body: String) -> Response {
    if !state.shutdown.is_accepting() {
        let refused = HttpResponse::errors(
            503,
            &[GraphQlError::new(ErrorCode::ServiceUnavailable, "server is not accepting requests")],
        );
        return into_response(&refused);
    }

    let _guard = state.shutdown.in_flight_guard();
    let outcome = state.ingress.handle(&body, Transport::OneShot).await;
    into_response(&outcome)
}

fn into_response(outcome: &HttpResponse) -> Response {
    let status =
        StatusCode::from_u16(outcome.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let content_type = if outcome.body.starts_with('{') || outcome.body.starts_with('[') {
        "application/json"
    } else {
        "text/plain; charset=utf-8"
    };
    (status, [(header::CONTENT_TYPE, content_type)], outcome.body.clone()).into_response()
}
