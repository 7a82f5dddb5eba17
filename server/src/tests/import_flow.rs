use std::sync::Arc;

use crate::model::lead::{LeadStore, NewLead};
use crate::progress::{ProgressStatus, ProgressTracker};
use crate::queue::{Queue, QueueConfig, QueueEngine};
use crate::shared_store::SharedStore;
use crate::testing::{InMemoryImportStore, InMemoryLeadStore, InMemoryProgressStore};
use crate::workers::import::{ImportHandler, ImportRecord, ImportService, IMPORT_JOB_NAME};

use super::common::wait_until;

struct ImportWorld {
    queue: Queue,
    service: ImportService,
    progress: ProgressTracker,
    leads: Arc<InMemoryLeadStore>,
    imports: Arc<InMemoryImportStore>,
}

fn setup() -> ImportWorld {
    let store = SharedStore::in_memory();
    let engine = QueueEngine::new(store.clone());
    let queue = engine.register("contact-import", QueueConfig::default());

    let leads = Arc::new(InMemoryLeadStore::default());
    let imports = Arc::new(InMemoryImportStore::default());
    let progress = ProgressTracker::new(store, Arc::new(InMemoryProgressStore::default()));

    queue.register_handler(
        IMPORT_JOB_NAME,
        Arc::new(ImportHandler::new(
            leads.clone(),
            imports.clone(),
            progress.clone(),
        )),
    );
    queue.process(2);

    let service = ImportService::new(queue.clone(), progress.clone(), imports.clone());
    ImportWorld {
        queue,
        service,
        progress,
        leads,
        imports,
    }
}

fn record(email: &str) -> ImportRecord {
    ImportRecord {
        email: email.to_string(),
        name: None,
        phone: None,
        tags: None,
        metadata: None,
    }
}

async fn wait_for_terminal(world: &ImportWorld, run_id: &str) {
    let progress = world.progress.clone();
    let run_id = run_id.to_string();
    wait_until("import run to finish", move || {
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
async fn two_valid_records_import_to_completion() {
    let world = setup();
    let started = world
        .service
        .start_import("T", vec![record("a@x.com"), record("b@x.com")])
        .await
        .unwrap();
    assert_eq!(started.total_records, 2);
    assert_eq!(started.total_batches, 1);

    wait_for_terminal(&world, &started.import_id.to_string()).await;

    let run = world
        .progress
        .get(&started.import_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, ProgressStatus::Completed);
    assert_eq!(run.total, 2);
    assert_eq!(run.processed, 2);
    assert_eq!(run.failed, 0);
    assert_eq!(run.progress, 100);

    assert_eq!(world.leads.leads.lock().unwrap().len(), 2);
    let import = world
        .imports
        .imports
        .lock()
        .unwrap()
        .get(&started.import_id)
        .cloned()
        .unwrap();
    assert_eq!(import.status, "completed");
}

#[tokio::test]
async fn invalid_email_is_collected_not_fatal() {
    let world = setup();
    let started = world
        .service
        .start_import("T", vec![record("nope"), record("ok@x.com")])
        .await
        .unwrap();

    wait_for_terminal(&world, &started.import_id.to_string()).await;

    let run = world
        .progress
        .get(&started.import_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, ProgressStatus::Completed);
    assert_eq!(run.processed, 1);
    assert_eq!(run.failed, 1);
    assert!(run
        .errors
        .iter()
        .any(|error| error == "Invalid email format: nope"));

    // conservation: every record is accounted for
    assert_eq!(run.processed + run.failed, run.total);
    assert_eq!(world.leads.leads.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn existing_lead_is_updated_not_duplicated() {
    let world = setup();
    world
        .leads
        .insert(NewLead {
            workspace_id: "T".to_string(),
            email: "ada@x.com".to_string(),
            name: Some("Old Name".to_string()),
            phone: None,
            tags: Vec::new(),
            metadata: serde_json::json!({}),
            source: "manual".to_string(),
            status: "active".to_string(),
        })
        .await
        .unwrap();

    let started = world
        .service
        .start_import(
            "T",
            vec![ImportRecord {
                email: "ada@x.com".to_string(),
                name: Some("Ada Lovelace".to_string()),
                phone: Some("+1 555 0100".to_string()),
                tags: None,
                metadata: None,
            }],
        )
        .await
        .unwrap();

    wait_for_terminal(&world, &started.import_id.to_string()).await;

    let leads = world.leads.leads.lock().unwrap();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].name.as_deref(), Some("Ada Lovelace"));
    assert_eq!(leads[0].phone.as_deref(), Some("+1 555 0100"));
    // provenance of the original row is preserved
    assert_eq!(leads[0].source, "manual");
}

#[tokio::test]
async fn empty_import_is_rejected() {
    let world = setup();
    let outcome = world.service.start_import("T", Vec::new()).await;
    assert!(outcome.is_err());
}

#[tokio::test]
async fn cancel_is_effective_and_idempotent() {
    let world = setup();
    world.queue.pause();

    let records = (0..5).map(|i| record(&format!("u{i}@x.com"))).collect();
    let started = world.service.start_import("T", records).await.unwrap();
    assert_eq!(world.queue.stats().waiting, 1);

    world.service.cancel("T", started.import_id).await.unwrap();
    let stats = world.queue.stats();
    assert_eq!(stats.waiting + stats.delayed + stats.active, 0);

    let import = world
        .imports
        .imports
        .lock()
        .unwrap()
        .get(&started.import_id)
        .cloned()
        .unwrap();
    assert_eq!(import.status, "cancelled");

    let run = world
        .progress
        .get(&started.import_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, ProgressStatus::Cancelled);
    assert!(run.ended_at.is_some());

    // a second cancel reports the same outcome
    world.service.cancel("T", started.import_id).await.unwrap();
}

#[tokio::test]
async fn cancel_refuses_foreign_workspace() {
    let world = setup();
    world.queue.pause();
    let started = world
        .service
        .start_import("T", vec![record("a@x.com")])
        .await
        .unwrap();

    let outcome = world.service.cancel("OTHER", started.import_id).await;
    assert!(outcome.is_err());
}
