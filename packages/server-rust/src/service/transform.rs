//! Transform workers: request envelope in, response envelope out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use topicast_core::Envelope;
use tracing::debug;

use super::relay::{EnvelopeHandler, Publisher};
use crate::error::TransformError;
use crate::traits::Transformer;

// ---------------------------------------------------------------------------
// TransformWorker
// ---------------------------------------------------------------------------

/// Relay handler applying one transform variant to every request envelope.
///
/// Publishes a response on the same topic with source `transform.<variant>`
/// and message `'<original>' in <variant>: '<transformed>'`.
pub struct TransformWorker {
    name: String,
    variant: String,
    transformer: Arc<dyn Transformer>,
}

impl TransformWorker {
    #[must_use]
    pub fn new(variant: impl Into<String>, transformer: Arc<dyn Transformer>) -> Self {
        let variant = variant.into();
        Self {
            name: format!("transform.{variant}"),
            variant,
            transformer,
        }
    }

    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }
}

#[async_trait]
impl EnvelopeHandler for TransformWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, envelope: &Envelope, publisher: &Publisher) -> anyhow::Result<()> {
        let transformed = self
            .transformer
            .transform(&envelope.message, &self.variant)
            .await?;
        let message = format!("'{}' in {}: '{}'", envelope.message, self.variant, transformed);
        publisher
            .publish(Envelope::response(&self.name, &envelope.topic, message))
            .await?;
        debug!(variant = %self.variant, topic = %envelope.topic, "transform published");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transformers
// ---------------------------------------------------------------------------

/// Returns the text unchanged. Used when no transform endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTransformer;

#[async_trait]
impl Transformer for PassthroughTransformer {
    async fn transform(&self, text: &str, _variant: &str) -> Result<String, TransformError> {
        Ok(text.to_string())
    }
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateResponse {
    translated_text: String,
}

/// Translation over the LibreTranslate HTTP API; the variant is the target
/// language code and the source language is auto-detected.
#[derive(Debug, Clone)]
pub struct HttpTransformer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTransformer {
    /// `base_url` is the service root, e.g. `http://localhost:5000`.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransformError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/translate", base_url.trim_end_matches('/')),
            api_key,
        })
    }
}

#[async_trait]
impl Transformer for HttpTransformer {
    async fn transform(&self, text: &str, variant: &str) -> Result<String, TransformError> {
        let request = TranslateRequest {
            q: text,
            source: "auto",
            target: variant,
            format: "text",
            api_key: self.api_key.as_deref(),
        };
        let response = self.client.post(&self.endpoint).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransformError::Status {
                status: status.as_u16(),
            });
        }
        let body: TranslateResponse = response.json().await?;
        if body.translated_text.is_empty() && !text.is_empty() {
            return Err(TransformError::Rejected(format!(
                "empty translation into {variant}"
            )));
        }
        Ok(body.translated_text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::routing::post;
    use axum::{Json, Router};
    use tokio::sync::mpsc;
    use topicast_core::EventKind;

    use super::*;
    use crate::service::relay::EventRelay;

    /// Uppercases the text and tags it with the variant.
    struct Shouting;

    #[async_trait]
    impl Transformer for Shouting {
        async fn transform(&self, text: &str, variant: &str) -> Result<String, TransformError> {
            Ok(format!("{}!{variant}", text.to_uppercase()))
        }
    }

    struct Capture(mpsc::UnboundedSender<Envelope>);

    #[async_trait]
    impl EnvelopeHandler for Capture {
        fn name(&self) -> &str {
            "capture"
        }

        async fn handle(&self, envelope: &Envelope, _publisher: &Publisher) -> anyhow::Result<()> {
            let _ = self.0.send(envelope.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn worker_publishes_formatted_response_on_same_topic() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let relay = EventRelay::builder(4)
            .subscribe(EventKind::Request, Arc::new(TransformWorker::new("fr", Arc::new(Shouting))))
            .subscribe(EventKind::Response, Arc::new(Capture(tx)))
            .build();

        relay
            .publisher()
            .publish(Envelope::request("room1", "hello"))
            .await
            .unwrap();

        let response = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.kind, EventKind::Response);
        assert_eq!(response.source, "transform.fr");
        assert_eq!(response.topic, "room1");
        assert_eq!(response.message, "'hello' in fr: 'HELLO!fr'");
    }

    #[tokio::test]
    async fn passthrough_returns_input() {
        let out = PassthroughTransformer.transform("hola", "de").await.unwrap();
        assert_eq!(out, "hola");
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn http_transformer_speaks_libretranslate() {
        let base = serve(Router::new().route(
            "/translate",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["source"], "auto");
                assert_eq!(body["format"], "text");
                let text = format!("{}@{}", body["q"].as_str().unwrap(), body["target"].as_str().unwrap());
                Json(serde_json::json!({ "translatedText": text }))
            }),
        ))
        .await;

        let transformer = HttpTransformer::new(&base, None, Duration::from_secs(2)).unwrap();
        let out = transformer.transform("hello", "es").await.unwrap();
        assert_eq!(out, "hello@es");
    }

    #[tokio::test]
    async fn http_transformer_reports_error_status() {
        let base = serve(Router::new().route(
            "/translate",
            post(|| async { (axum::http::StatusCode::BAD_REQUEST, "unsupported language") }),
        ))
        .await;

        let transformer = HttpTransformer::new(&base, None, Duration::from_secs(2)).unwrap();
        let err = transformer.transform("hello", "xx").await.unwrap_err();
        assert!(matches!(err, TransformError::Status { status: 400 }));
    }
}
