use std::sync::Arc;
use std::time::Duration;

use crate::metrics::{domain, MetricsCollector};
use crate::progress::{ProgressStatus, ProgressTracker};
use crate::queue::{Queue, QueueConfig, QueueEngine};
use crate::shared_store::SharedStore;
use crate::testing::{
    InMemoryDeliveryStore, InMemoryProgressStore, InMemorySendStore, MockTransport,
};
use crate::workers::email_send::{
    EmailSendHandler, EmailTemplate, Recipient, SendService, Sender, EMAIL_JOB_NAME,
};

use super::common::wait_until;

struct SendWorld {
    queue: Queue,
    service: SendService,
    progress: ProgressTracker,
    sends: Arc<InMemorySendStore>,
    deliveries: Arc<InMemoryDeliveryStore>,
    transport: Arc<MockTransport>,
    metrics: MetricsCollector,
}

fn setup_with_transport(transport: MockTransport) -> SendWorld {
    let store = SharedStore::in_memory();
    let engine = QueueEngine::new(store.clone());
    let queue = engine.register("email-send", QueueConfig::default());

    let sends = Arc::new(InMemorySendStore::default());
    let deliveries = Arc::new(InMemoryDeliveryStore::default());
    let transport = Arc::new(transport);
    let progress = ProgressTracker::new(store.clone(), Arc::new(InMemoryProgressStore::default()));
    let metrics = MetricsCollector::new(store, 1);

    queue.register_handler(
        EMAIL_JOB_NAME,
        Arc::new(
            EmailSendHandler::new(
                sends.clone(),
                deliveries.clone(),
                progress.clone(),
                transport.clone(),
                metrics.clone(),
            )
            .with_pacing(Duration::ZERO),
        ),
    );
    queue.process(2);

    let service = SendService::new(
        queue.clone(),
        progress.clone(),
        sends.clone(),
        metrics.clone(),
    );
    SendWorld {
        queue,
        service,
        progress,
        sends,
        deliveries,
        transport,
        metrics,
    }
}

fn setup() -> SendWorld {
    setup_with_transport(MockTransport::default())
}

fn template() -> EmailTemplate {
    EmailTemplate {
        subject: "Hi {{name}}".to_string(),
        html: "<p>{{name}}/{{email}}</p>".to_string(),
        text: None,
    }
}

fn sender() -> Sender {
    Sender {
        email: "news@acme.io".to_string(),
        name: Some("Acme News".to_string()),
    }
}

fn recipient(name: &str, email: &str) -> Recipient {
    Recipient {
        id: email.to_string(),
        email: email.to_string(),
        name: Some(name.to_string()),
        metadata: None,
    }
}

async fn wait_for_terminal(world: &SendWorld, run_id: &str) {
    let progress = world.progress.clone();
    let run_id = run_id.to_string();
    wait_until("send run to finish", move || {
        let progress = progress.clone();
        let run_id = run_id.clone();
        async move {
            progress
                .get(&run_id)
                .await
                .ok()
                .flatten()
                .map(|record| record.status.is_terminal())
                .unwrap_or(false)
        }
    })
    .await;
}

#[tokio::test]
async fn recipients_get_personalized_content() {
    let world = setup();
    let started = world
        .service
        .start_send(
            "T",
            "camp-1",
            vec![recipient("Ada", "ada@x.com")],
            template(),
            sender(),
        )
        .await
        .unwrap();

    wait_for_terminal(&world, &started.send_id.to_string()).await;

    let sent = world.transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Hi Ada");
    assert_eq!(sent[0].html, "<p>Ada/ada@x.com</p>");
    assert_eq!(sent[0].from_email, "news@acme.io");
    drop(sent);

    let rows = world.deliveries.rows.lock().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "sent");
    assert!(rows[0].provider_id.is_some());
}

#[tokio::test]
async fn metadata_placeholders_substitute_and_unknown_survive() {
    let world = setup();
    let mut meta = serde_json::Map::new();
    meta.insert("plan".to_string(), serde_json::json!("pro"));

    let started = world
        .service
        .start_send(
            "T",
            "camp-meta",
            vec![Recipient {
                id: "r1".to_string(),
                email: "ada@x.com".to_string(),
                name: Some("Ada".to_string()),
                metadata: Some(meta),
            }],
            EmailTemplate {
                subject: "Your {{plan}} plan".to_string(),
                html: "<p>{{plan}} / {{mystery}}</p>".to_string(),
                text: Some("{{plan}}".to_string()),
            },
            sender(),
        )
        .await
        .unwrap();

    wait_for_terminal(&world, &started.send_id.to_string()).await;

    let sent = world.transport.sent.lock().unwrap();
    assert_eq!(sent[0].subject, "Your pro plan");
    assert_eq!(sent[0].html, "<p>pro / {{mystery}}</p>");
    assert_eq!(sent[0].text.as_deref(), Some("pro"));
}

#[tokio::test]
async fn transport_failure_is_recorded_and_batch_continues() {
    let world = setup_with_transport(MockTransport::failing_for(&["broken@x.com"]));
    let started = world
        .service
        .start_send(
            "T",
            "camp-2",
            vec![
                recipient("Ada", "ada@x.com"),
                recipient("Bob", "broken@x.com"),
                recipient("Eve", "eve@x.com"),
            ],
            template(),
            sender(),
        )
        .await
        .unwrap();

    wait_for_terminal(&world, &started.send_id.to_string()).await;

    let run = world
        .progress
        .get(&started.send_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, ProgressStatus::Completed);
    assert_eq!(run.processed, 2);
    assert_eq!(run.failed, 1);
    assert!(run.errors.iter().any(|error| error.contains("broken@x.com")));

    let rows = world.deliveries.rows.lock().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(
        rows.iter().filter(|row| row.status == "failed").count(),
        1
    );
    let failed_row = rows.iter().find(|row| row.status == "failed").unwrap();
    assert_eq!(failed_row.recipient_email, "broken@x.com");
    assert!(failed_row.error.is_some());
    drop(rows);

    let send = world
        .sends
        .sends
        .lock()
        .unwrap()
        .get(&started.send_id)
        .cloned()
        .unwrap();
    assert_eq!(send.status, "completed");

    assert_eq!(world.metrics.get(domain::EMAIL_SENT, 1).await.len(), 2);
    assert_eq!(world.metrics.get(domain::EMAIL_BOUNCED, 1).await.len(), 1);
}

#[tokio::test]
async fn invalid_sender_is_rejected_up_front() {
    let world = setup();
    let outcome = world
        .service
        .start_send(
            "T",
            "camp-3",
            vec![recipient("Ada", "ada@x.com")],
            template(),
            Sender {
                email: "not-an-address".to_string(),
                name: None,
            },
        )
        .await;
    assert!(outcome.is_err());
}

#[tokio::test]
async fn cancel_send_is_idempotent() {
    let world = setup();
    world.queue.pause();

    let recipients = (0..3)
        .map(|i| recipient("U", &format!("u{i}@x.com")))
        .collect();
    let started = world
        .service
        .start_send("T", "camp-4", recipients, template(), sender())
        .await
        .unwrap();

    world.service.cancel("T", started.send_id).await.unwrap();
    let stats = world.queue.stats();
    assert_eq!(stats.waiting + stats.delayed + stats.active, 0);

    let run = world
        .progress
        .get(&started.send_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, ProgressStatus::Cancelled);

    world.service.cancel("T", started.send_id).await.unwrap();
    assert!(world.transport.sent_to().is_empty());
}
