//! Cross-component scenarios wired the way the server wires them, with an
//! in-memory directory and a recording push gateway in place of sockets.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use topicast_core::{ConnectionId, Envelope, EventKind, OperationSchema, Transport};
use topicast_server::directory::MemoryDirectory;
use topicast_server::service::middleware::build_operation_pipeline;
use topicast_server::service::{
    EventRelay, NotificationFanout, OperationClassifier, OperationExecutor, OperationIngress,
    OperationRouter, PassthroughTransformer, Publisher, ServerConfig, SubscriptionManager,
    TransformWorker, WorkDispatcher,
};
use topicast_server::{ConnectionDirectory, DeliveryError, PushGateway};

const HOUR: Duration = Duration::from_secs(3600);
const WAIT: Duration = Duration::from_secs(2);

/// Forwards every push to a channel the test can await.
struct ChannelPush(mpsc::UnboundedSender<(ConnectionId, String)>);

#[async_trait]
impl PushGateway for ChannelPush {
    async fn push(&self, connection_id: &ConnectionId, payload: String) -> Result<(), DeliveryError> {
        self.0
            .send((connection_id.clone(), payload))
            .map_err(|_| DeliveryError::Gone(connection_id.clone()))
    }
}

struct Harness {
    directory: Arc<MemoryDirectory>,
    relay: EventRelay,
    ingress: OperationIngress,
    subscriptions: SubscriptionManager,
    pushes: mpsc::UnboundedReceiver<(ConnectionId, String)>,
}

impl Harness {
    fn new(variants: &[&str]) -> Self {
        let directory = Arc::new(MemoryDirectory::new());
        let (tx, pushes) = mpsc::unbounded_channel();

        let mut builder = EventRelay::builder(16).subscribe(
            EventKind::Response,
            Arc::new(NotificationFanout::new(directory.clone(), Arc::new(ChannelPush(tx)))),
        );
        for variant in variants {
            builder = builder.subscribe(
                EventKind::Request,
                Arc::new(TransformWorker::new(*variant, Arc::new(PassthroughTransformer))),
            );
        }
        let relay = builder.build();

        let subscriptions = SubscriptionManager::new(directory.clone(), HOUR);
        let router = OperationRouter::new(
            OperationExecutor::new(WorkDispatcher::new(relay.publisher())),
            subscriptions.clone(),
        );
        let ingress = OperationIngress::new(
            Arc::new(OperationClassifier::new(Arc::new(OperationSchema::chat().unwrap()))),
            build_operation_pipeline(router, &ServerConfig::default()),
        );

        Self {
            directory,
            relay,
            ingress,
            subscriptions,
            pushes,
        }
    }

    fn publisher(&self) -> Publisher {
        self.relay.publisher()
    }

    async fn next_push(&mut self) -> (ConnectionId, String) {
        tokio::time::timeout(WAIT, self.pushes.recv())
            .await
            .expect("push within deadline")
            .expect("push channel open")
    }

    async fn assert_no_push(&mut self) {
        let quiet = tokio::time::timeout(Duration::from_millis(200), self.pushes.recv()).await;
        assert!(quiet.is_err(), "unexpected push: {quiet:?}");
    }
}

fn body(query: &str) -> String {
    json!({ "query": query }).to_string()
}

#[tokio::test]
async fn subscribe_then_notify() {
    let mut h = Harness::new(&[]);
    h.directory
        .put("room1", &ConnectionId::new("conn-A"), HOUR)
        .await
        .unwrap();

    h.publisher()
        .publish(Envelope::response("transform.fr", "room1", "hi"))
        .await
        .unwrap();

    assert_eq!(h.next_push().await, (ConnectionId::new("conn-A"), "hi".to_string()));
    h.assert_no_push().await;
}

#[tokio::test]
async fn subscribe_operation_over_persistent_channel_records_the_topic() {
    let h = Harness::new(&[]);

    let resp = h
        .ingress
        .handle(
            &body(r#"subscription { chat(chatId: "room1") }"#),
            Transport::persistent("conn-A"),
        )
        .await;

    assert_eq!(resp.status_code, 200);
    assert_eq!(resp.body, "Ok");
    assert!(h
        .directory
        .find_subscribers("room1")
        .await
        .unwrap()
        .contains(&ConnectionId::new("conn-A")));
}

#[tokio::test]
async fn write_round_trip_reaches_subscribers_through_every_variant() {
    let mut h = Harness::new(&["fr", "de"]);
    h.ingress
        .handle(
            &body(r#"subscription { chat(chatId: "room1") }"#),
            Transport::persistent("conn-A"),
        )
        .await;

    let resp = h
        .ingress
        .handle(
            &body(r#"mutation { putEvent(chatId: "room1", message: "hello") { FailedEntries } }"#),
            Transport::OneShot,
        )
        .await;
    assert_eq!(resp.status_code, 200);
    let result: Value = serde_json::from_str(&resp.body).unwrap();
    assert_eq!(result["data"]["putEvent"]["FailedEntries"], 0);

    let mut messages = vec![h.next_push().await.1, h.next_push().await.1];
    messages.sort();
    assert_eq!(
        messages,
        vec![
            "'hello' in de: 'hello'".to_string(),
            "'hello' in fr: 'hello'".to_string(),
        ]
    );
}

#[tokio::test]
async fn disconnect_drops_future_notifications() {
    let mut h = Harness::new(&[]);
    let conn = ConnectionId::new("conn-A");
    h.subscriptions.on_subscribe("room1", &conn).await.unwrap();
    h.subscriptions.on_subscribe("room2", &conn).await.unwrap();

    let report = h.subscriptions.on_disconnect(&conn).await.unwrap();
    assert_eq!(report.removed.len(), 2);
    assert!(h.directory.find_topics(&conn).await.unwrap().is_empty());

    h.publisher()
        .publish(Envelope::response("transform.fr", "room1", "late"))
        .await
        .unwrap();
    h.assert_no_push().await;
}

#[tokio::test]
async fn unsubscribe_removes_only_that_topic() {
    let mut h = Harness::new(&[]);
    let conn = ConnectionId::new("conn-A");
    h.subscriptions.on_subscribe("room1", &conn).await.unwrap();
    h.subscriptions.on_subscribe("room2", &conn).await.unwrap();

    h.subscriptions.on_unsubscribe("room1", &conn).await.unwrap();

    h.publisher()
        .publish(Envelope::response("transform.fr", "room1", "gone"))
        .await
        .unwrap();
    h.assert_no_push().await;

    h.publisher()
        .publish(Envelope::response("transform.fr", "room2", "still here"))
        .await
        .unwrap();
    assert_eq!(h.next_push().await, (conn, "still here".to_string()));
}
