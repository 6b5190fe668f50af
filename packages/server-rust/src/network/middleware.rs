//! HTTP layers wrapped around every route: `/graphql`, `/ws` and the probes.
//!
//! Outermost first: request id, request span, body limit, CORS, timeout,
//! request id echo. Load shedding and per-operation metrics belong to the
//! operation pipeline, which also serves the persistent channel.

use axum::body::Body;
use axum::http::header::HeaderName;
use axum::http::{HeaderValue, Method, Request, StatusCode};
use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info_span, warn, Span};

use super::config::NetworkConfig;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

type RequestSpan = fn(&Request<Body>) -> Span;

type HttpLayers = Stack<
    PropagateRequestIdLayer,
    Stack<
        TimeoutLayer,
        Stack<
            CorsLayer,
            Stack<
                RequestBodyLimitLayer,
                Stack<
                    TraceLayer<SharedClassifier<ServerErrorsAsFailures>, RequestSpan>,
                    Stack<SetRequestIdLayer<MakeRequestUuid>, Identity>,
                >,
            >,
        >,
    >,
>;

/// Builds the layer stack from the network configuration.
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, MakeRequestUuid))
        .layer(TraceLayer::new_for_http().make_span_with(request_span as RequestSpan))
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(cors_layer(&config.cors_origins))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER))
        .into_inner()
}

/// One span per HTTP request, tagged with the id assigned by the outer layer.
fn request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");
    info_span!(
        "http",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
    )
}

/// `"*"` anywhere in the list allows every origin; unparsable entries are
/// skipped with a warning.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(%origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_LENGTH, ORIGIN};
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    use super::*;

    fn echo_router(config: &NetworkConfig) -> Router {
        Router::new()
            .route("/echo", post(|body: String| async move { body }))
            .layer(build_http_layers(config))
    }

    fn post_echo(body: &str) -> axum::http::request::Builder {
        Request::post("/echo").header(CONTENT_LENGTH, body.len())
    }

    #[tokio::test]
    async fn every_response_carries_a_request_id() {
        let resp = echo_router(&NetworkConfig::default())
            .oneshot(post_echo("hi").body(Body::from("hi")).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let id = resp.headers().get(&REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert_eq!(id.len(), 36);
    }

    #[tokio::test]
    async fn caller_request_id_is_kept() {
        let resp = echo_router(&NetworkConfig::default())
            .oneshot(
                post_echo("hi")
                    .header(REQUEST_ID_HEADER, "req-42")
                    .body(Body::from("hi"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.headers().get(&REQUEST_ID_HEADER).unwrap(), "req-42");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let config = NetworkConfig {
            max_body_bytes: 8,
            ..NetworkConfig::default()
        };
        let body = "x".repeat(64);
        let resp = echo_router(&config)
            .oneshot(post_echo(&body).body(Body::from(body.clone())).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn only_listed_origins_are_allowed() {
        let config = NetworkConfig {
            cors_origins: vec!["https://chat.example.com".to_string(), "bad\norigin".to_string()],
            ..NetworkConfig::default()
        };

        let allowed = echo_router(&config)
            .oneshot(
                post_echo("hi")
                    .header(ORIGIN, "https://chat.example.com")
                    .body(Body::from("hi"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            allowed.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://chat.example.com"
        );

        let denied = echo_router(&config)
            .oneshot(
                post_echo("hi")
                    .header(ORIGIN, "https://elsewhere.example.com")
                    .body(Body::from("hi"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(denied.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }
}
