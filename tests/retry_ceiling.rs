//! Failing records and the attempt ceiling
//!
//! Log entries go through the downstream write service, which lets these
//! tests make a record fail on every attempt.

mod common;

use common::{tenant, Harness, ScriptedWriter};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use syncgraph::graph::{label, relationship};
use syncgraph::{Connector, GraphStore, RawTableProvider, SyncedEntityType};

#[tokio::test]
async fn log_entries_are_written_downstream_and_linked() {
    let harness = Harness::new();
    harness.enable("salesforce");
    harness.insert("salesforce", "user", &[json!({"externalId": "005A", "name": "Sam Seller"})]);
    harness.insert("salesforce", "account", &[json!({"externalId": "001A", "name": "Initech"})]);
    harness.insert(
        "salesforce",
        "feeditem",
        &[json!({
            "externalId": "0D5A",
            "content": "renewal call",
            "contentType": "text/plain",
            "author": {"externalId": "005A"},
            "loggedOrganization": {"externalId": "001A"}
        })],
    );
    let writer = Arc::new(ScriptedWriter::new(harness.store.clone(), true));

    let runs = harness
        .orchestrator_with_writer(100, writer.clone())
        .run_pass()
        .await
        .unwrap();
    assert_eq!(runs[0].counts[&SyncedEntityType::LogEntry].completed, 1);
    assert_eq!(writer.upserts.load(Ordering::SeqCst), 1);

    let entry = harness.linked(label::LOG_ENTRY, "salesforce", "0D5A").unwrap();
    let org = harness.linked(label::ORGANIZATION, "salesforce", "001A").unwrap();
    let user = harness.linked(label::USER, "salesforce", "005A").unwrap();
    assert!(harness
        .store
        .load_edge(&tenant(), &org, relationship::LOGGED, &entry)
        .unwrap()
        .is_some());
    assert!(harness
        .store
        .load_edge(&tenant(), &entry, relationship::CREATED_BY, &user)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn rejected_writes_are_retried_within_the_pass() {
    let harness = Harness::new();
    harness.enable("salesforce");
    harness.insert("salesforce", "feeditem", &[json!({"externalId": "0D5F", "content": "flaky"})]);
    let writer = Arc::new(ScriptedWriter::new(harness.store.clone(), true).rejecting(2));

    let runs = harness
        .orchestrator_with_writer(100, writer.clone())
        .run_pass()
        .await
        .unwrap();
    let counts = runs[0].counts[&SyncedEntityType::LogEntry];
    assert_eq!((counts.completed, counts.failed), (1, 0));
    assert_eq!(writer.upserts.load(Ordering::SeqCst), 3);
    assert_eq!(harness.count(label::LOG_ENTRY), 1);
}

#[tokio::test]
async fn a_write_rejected_on_every_try_fails_the_record() {
    let harness = Harness::new();
    harness.enable("salesforce");
    harness.insert("salesforce", "feeditem", &[json!({"externalId": "0D5G", "content": "down"})]);
    let writer = Arc::new(ScriptedWriter::new(harness.store.clone(), true).rejecting(usize::MAX));

    let runs = harness
        .orchestrator_with_writer(100, writer.clone())
        .run_pass()
        .await
        .unwrap();
    assert_eq!(runs[0].counts[&SyncedEntityType::LogEntry].failed, 1);
    // quick_retry(3) in the harness
    assert_eq!(writer.upserts.load(Ordering::SeqCst), 3);
    assert_eq!(harness.count(label::LOG_ENTRY), 0);
}

#[tokio::test]
async fn a_record_that_always_fails_is_attempted_at_most_ten_times() {
    let harness = Harness::new();
    harness.enable("salesforce");
    harness.insert(
        "salesforce",
        "feeditem",
        &[json!({"externalId": "0D5B", "content": "never shows up"})],
    );
    let writer = Arc::new(ScriptedWriter::new(harness.store.clone(), false));
    let orchestrator = harness.orchestrator_with_writer(1, writer.clone());

    for pass in 1..=12 {
        let runs = orchestrator.run_pass().await.unwrap();
        let counts = runs[0].counts[&SyncedEntityType::LogEntry];
        if pass <= 10 {
            assert_eq!(counts.failed, 1, "pass {}", pass);
        } else {
            assert_eq!(counts.total(), 0, "pass {}", pass);
        }
    }
    assert_eq!(writer.upserts.load(Ordering::SeqCst), 10);

    // Every attempt updated the same downstream entry
    assert_eq!(harness.count(label::LOG_ENTRY), 1);

    let provider = RawTableProvider::new(Connector::Salesforce, tenant(), "", Arc::clone(&harness.pool));
    let exhausted = provider.exhausted_records().unwrap();
    assert_eq!(exhausted.len(), 1);
    assert_eq!(exhausted[0].attempt, 10);
    assert_eq!(exhausted[0].external_id, "0D5B");
    assert!(!exhausted[0].synced);
}

#[tokio::test]
async fn one_bad_record_does_not_stop_its_stage() {
    let harness = Harness::new();
    harness.enable("salesforce");
    harness.insert(
        "salesforce",
        "feeditem",
        &[
            json!({"externalId": "0D5C", "content": "first"}),
            json!({"externalId": "0D5D", "content": "second", "externalSystem": "hubspot"}),
            json!({"externalId": "0D5E", "content": "third"}),
        ],
    );
    let writer = Arc::new(ScriptedWriter::new(harness.store.clone(), true));

    let runs = harness
        .orchestrator_with_writer(100, writer)
        .run_pass()
        .await
        .unwrap();
    let counts = runs[0].counts[&SyncedEntityType::LogEntry];
    assert_eq!((counts.completed, counts.failed, counts.skipped), (2, 0, 1));
    assert_eq!(harness.count(label::LOG_ENTRY), 2);
}
