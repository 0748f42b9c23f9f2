
use chrono::NaiveDate;
use serde_json::{json, Map};

use beamline_launch::broker::{Broker, InMemoryBroker};
use beamline_launch::config::QueueNames;
use beamline_launch::error::LaunchError;
use beamline_launch::job::JobDescriptor;
use beamline_launch::producer::{
    submit, CloudRequest, PriorResult, RequestHandler, RequestKind, STATUS_DISPATCHED,
    STATUS_WORKING,
};
use test_harness::{job, MemoryResultStore};

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
}

fn request(kind: RequestKind) -> CloudRequest {
    CloudRequest {
        request_id: "req-1".to_string(),
        kind,
        original_id: "result-1".to_string(),
        work_dir_override: None,
        site_tag: Some("LAB_A".to_string()),
        preferences: Map::new(),
    }
}

#[tokio::test]
async fn test_submit_appends_to_incoming() {
    let broker = InMemoryBroker::new();
    let queues = QueueNames::default();

    submit(&broker, &queues, &job("INDEX", "a", None)).await.unwrap();
    submit(&broker, &queues, &job("INDEX", "b", None)).await.unwrap();

    let ids: Vec<String> = broker
        .contents(&queues.incoming)
        .await
        .iter()
        .map(|p| JobDescriptor::from_payload(p).unwrap().process_id)
        .collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn test_handler_builds_and_submits_job() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryBroker::new();
    let queues = QueueNames::default();
    let store = MemoryResultStore::default();
    store
        .insert(
            "result-1",
            PriorResult {
                work_dir: dir.path().join("integrate/2024-05-01/B_1"),
                data_root_dir: Some("/data/group".into()),
                repr: "B_1".to_string(),
                data: [("wavelength".to_string(), json!(0.979))]
                    .into_iter()
                    .collect(),
            },
        )
        .await;

    let mut req = request(RequestKind::MolecularReplacement);
    req.preferences.insert("pdb_code".to_string(), json!("1ABC"));

    let handler = RequestHandler::new(&broker, &queues, &store);
    let submitted = handler.handle(&req, date()).await.unwrap();

    assert_eq!(submitted.command, "MR");
    assert_eq!(
        submitted.directories.work,
        dir.path().join("mr/2024-05-10/B_1")
    );
    assert_eq!(submitted.site_tag.as_deref(), Some("LAB_A"));
    assert_eq!(submitted.preferences["pdb_code"], json!("1ABC"));
    assert_eq!(submitted.extra["original"]["wavelength"], json!(0.979));

    let queued = broker.contents(&queues.incoming).await;
    assert_eq!(queued.len(), 1);
    assert_eq!(JobDescriptor::from_payload(&queued[0]).unwrap(), submitted);

    assert_eq!(
        store.status_history("req-1").await,
        vec![STATUS_WORKING, STATUS_DISPATCHED]
    );
}

#[tokio::test]
async fn test_handler_avoids_existing_work_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("top/reindex/2024-05-10/B_1")).unwrap();

    let broker = InMemoryBroker::new();
    let queues = QueueNames::default();
    let store = MemoryResultStore::default();
    store
        .insert(
            "result-1",
            PriorResult {
                work_dir: "/elsewhere/integrate/B_1".into(),
                data_root_dir: None,
                repr: "B_1".to_string(),
                data: Map::new(),
            },
        )
        .await;

    let mut req = request(RequestKind::Reindex);
    req.work_dir_override = Some(dir.path().join("top"));

    let submitted = RequestHandler::new(&broker, &queues, &store)
        .handle(&req, date())
        .await
        .unwrap();
    assert_eq!(submitted.command, "INDEX");
    assert_eq!(
        submitted.directories.work,
        dir.path().join("top/reindex/2024-05-10/B_1_1")
    );
}

#[tokio::test]
async fn test_missing_prior_result_submits_nothing() {
    let broker = InMemoryBroker::new();
    let queues = QueueNames::default();
    let store = MemoryResultStore::default();

    let err = RequestHandler::new(&broker, &queues, &store)
        .handle(&request(RequestKind::Merge), date())
        .await
        .unwrap_err();

    assert!(matches!(err, LaunchError::MissingRecord(id) if id == "result-1"));
    assert_eq!(broker.len(&queues.incoming).await.unwrap(), 0);
    assert!(store.status_history("req-1").await.is_empty());
}

#[tokio::test]
async fn test_failed_submission_leaves_request_working() {
    let broker = InMemoryBroker::new();
    let queues = QueueNames::default();
    let store = MemoryResultStore::default();
    store
        .insert(
            "result-1",
            PriorResult {
                work_dir: "/nonexistent/integrate/B_1".into(),
                data_root_dir: None,
                repr: "B_1".to_string(),
                data: Map::new(),
            },
        )
        .await;
    broker.set_available(false);

    let err = RequestHandler::new(&broker, &queues, &store)
        .handle(&request(RequestKind::Download), date())
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(store.status_history("req-1").await, vec![STATUS_WORKING]);
}
