use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use std::time;

use contact_common::contact::{Contact, RemoteId};
use contact_sync::directory::HttpDirectory;
use contact_sync::error::{PipelineError, SourceError};
use contact_sync::pipeline::Pipeline;
use contact_sync::source::CsvSource;
use contact_sync::test_utils::{contacts, FakeDirectory};
use httpmock::prelude::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;

mod common;
use common::*;

#[tokio::test]
async fn test_new_contacts_are_created_in_full_batches() {
    let directory = Arc::new(FakeDirectory::default());
    let pipeline = Pipeline::new(test_config(2, 2), directory.clone());

    let summary = pipeline
        .run(contacts(1, 5).into_iter(), CancellationToken::new())
        .await
        .expect("pipeline failed");

    let sizes: Vec<usize> = directory.create_batches().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert!(directory.update_batches().is_empty());

    assert_eq!(summary.read, 5);
    assert_eq!(summary.classified.created, 5);
    assert_eq!(summary.create.size_flushes, 2);
    assert_eq!(summary.create.final_flushes, 1);
    assert_eq!(summary.create.items_flushed, 5);
    assert_eq!(summary.update.flushes(), 0);
    assert_eq!(summary.abandoned(), 0);
}

#[tokio::test]
async fn test_partial_batch_is_flushed_by_timer() {
    let directory = Arc::new(FakeDirectory::default());
    let mut config = test_config(1, 10);
    config.create_batching.flush_timeout = time::Duration::from_millis(50);
    let pipeline = Pipeline::new(config, directory.clone());

    let source = LingeringSource {
        contacts: contacts(10, 1).into_iter(),
        linger: time::Duration::from_millis(400),
    };
    let summary = pipeline
        .run(source, CancellationToken::new())
        .await
        .expect("pipeline failed");

    assert_eq!(directory.create_batches().len(), 1);
    assert_eq!(summary.create.timer_flushes, 1);
    assert_eq!(summary.create.final_flushes, 0);
}

#[tokio::test]
async fn test_contacts_are_routed_by_lookup_result() {
    let batch = contacts(20, 5);
    let directory = Arc::new(
        FakeDirectory::default()
            .with_existing(&batch[1].phone, 9001)
            .with_failing_lookup(&batch[3].phone),
    );
    let pipeline = Pipeline::new(test_config(1, 2), directory.clone());

    let summary = pipeline
        .run(batch.clone().into_iter(), CancellationToken::new())
        .await
        .expect("pipeline failed");

    assert_eq!(summary.classified.created, 3);
    assert_eq!(summary.classified.updated, 1);
    assert_eq!(summary.classified.dropped, 1);

    assert_eq!(
        directory.created_phones(),
        vec![
            batch[0].phone.clone(),
            batch[2].phone.clone(),
            batch[4].phone.clone()
        ]
    );

    let updates: Vec<_> = directory.update_batches().into_iter().flatten().collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].remote_id, RemoteId::from(9001));
    assert_eq!(updates[0].contact, batch[1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_flushes_apply_backpressure_without_loss() {
    let directory =
        Arc::new(FakeDirectory::default().with_flush_delay(time::Duration::from_millis(10)));
    let mut config = test_config(4, 1);
    config.create_batching.queue_capacity = nonzero(1);
    config.intake_capacity = nonzero(1);
    let pipeline = Pipeline::new(config, directory.clone());

    let summary = pipeline
        .run(contacts(30, 12).into_iter(), CancellationToken::new())
        .await
        .expect("pipeline failed");

    assert_eq!(summary.classified.created, 12);
    assert_eq!(directory.create_batches().len(), 12);
    assert_eq!(summary.create.items_flushed, 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_contact_reaches_exactly_one_batch() {
    let batch = contacts(100, 60);
    let mut directory = FakeDirectory::default();
    for (n, contact) in batch.iter().enumerate().filter(|(n, _)| n % 3 == 0) {
        directory = directory.with_existing(&contact.phone, n as i64);
    }
    let directory = Arc::new(directory);
    let pipeline = Pipeline::new(test_config(6, 4), directory.clone());

    let summary = pipeline
        .run(batch.clone().into_iter(), CancellationToken::new())
        .await
        .expect("pipeline failed");

    assert_eq!(summary.classified.created, 40);
    assert_eq!(summary.classified.updated, 20);
    assert_eq!(directory.max_concurrent_lookups(), 1);

    let mut seen: Vec<String> = directory.created_phones();
    seen.extend(
        directory
            .update_batches()
            .into_iter()
            .flatten()
            .map(|update| update.contact.phone),
    );
    assert_eq!(seen.len(), batch.len());

    let seen: BTreeSet<String> = seen.into_iter().collect();
    let expected: BTreeSet<String> = batch.into_iter().map(|contact| contact.phone).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_failed_flush_does_not_stop_the_run() {
    let directory = Arc::new(FakeDirectory::default().with_failing_bulk_calls());
    let pipeline = Pipeline::new(test_config(1, 2), directory.clone());

    let summary = pipeline
        .run(contacts(50, 3).into_iter(), CancellationToken::new())
        .await
        .expect("pipeline failed");

    assert_eq!(directory.create_batches().len(), 2);
    assert_eq!(summary.create.failed_flushes, 2);
    assert_eq!(summary.create.items_failed, 3);
    assert_eq!(summary.create.items_flushed, 0);
}

#[tokio::test]
async fn test_source_failure_aborts_the_run() {
    let directory = Arc::new(FakeDirectory::default());
    let pipeline = Pipeline::new(test_config(1, 2), directory);

    let source = FailingSource {
        contacts: contacts(70, 2).into_iter(),
    };
    let result = pipeline.run(source, CancellationToken::new()).await;

    assert!(matches!(
        result,
        Err(PipelineError::Source(SourceError::Read { row: 42, .. }))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancellation_flushes_what_was_routed() {
    let directory =
        Arc::new(FakeDirectory::default().with_lookup_delay(time::Duration::from_millis(5)));
    let pipeline = Pipeline::new(test_config(2, 100), directory.clone());
    let shutdown = CancellationToken::new();

    let canceller = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(time::Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let summary = tokio::time::timeout(
        time::Duration::from_secs(10),
        pipeline.run(EndlessSource { next: 0 }, shutdown),
    )
    .await
    .expect("pipeline did not stop after cancellation")
    .expect("pipeline failed");

    assert!(summary.classified.created > 0);
    // Lookups in flight at shutdown still reach the create queue.
    assert_eq!(summary.classified.dropped, 0);
    // Everything that made it onto the create queue was flushed on the way out.
    assert_eq!(summary.create.items_flushed, summary.classified.created);
    assert_eq!(
        directory.created_phones().len() as u64,
        summary.classified.created
    );
    assert_eq!(
        summary.read,
        summary.classified.total() + summary.abandoned()
    );
}

#[tokio::test]
async fn test_csv_export_syncs_against_http_directory() {
    let server = MockServer::start_async().await;

    let found = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/contact/search")
                .body_contains("+15550001");
            then.status(200)
                .json_body(json!({"data": [{"contact_id": 42, "mobile": "+15550001"}]}));
        })
        .await;
    let missing = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/contact/search")
                .body_contains("+15550002");
            then.status(200).json_body(json!({"data": []}));
        })
        .await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/contact/create")
                .header("api-key", "secret")
                .json_body(json!({
                    "data": {
                        "contact_type": "identified",
                        "contacts": [{
                            "mobile": "+15550002",
                            "identity": "+15550002",
                            "attributes": {"FIRST_NAME": "Grace", "LAST_NAME": "Hopper"}
                        }]
                    }
                }));
            then.status(201).json_body(json!({"message": "created"}));
        })
        .await;
    let update = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/contact/update")
                .body_contains("\"contact_id\":42");
            then.status(202).json_body(json!({"message": "queued"}));
        })
        .await;

    let directory = HttpDirectory::new(
        &server.base_url(),
        "secret",
        time::Duration::from_secs(5),
    )
    .expect("failed to build directory client");
    let pipeline = Pipeline::new(test_config(1, 2), Arc::new(directory));

    let data = "\
MOBILE,FIRST_NAME,LAST_NAME,RASHI,AGE,GENDER
+15550001,Ada,Lovelace,Kumbha,36,F
,No,Phone,,,
+15550002,Grace,Hopper,,,F
";
    let source = CsvSource::from_reader(io::Cursor::new(data.as_bytes().to_vec()))
        .expect("failed to read header");

    let summary = pipeline
        .run(source, CancellationToken::new())
        .await
        .expect("pipeline failed");

    found.assert_async().await;
    missing.assert_async().await;
    create.assert_async().await;
    update.assert_async().await;

    assert_eq!(summary.read, 2);
    assert_eq!(summary.classified.created, 1);
    assert_eq!(summary.classified.updated, 1);
    assert_eq!(summary.create.items_flushed, 1);
    assert_eq!(summary.update.items_flushed, 1);
}

#[tokio::test]
async fn test_contacts_helper_numbers_phones() {
    let batch: Vec<Contact> = contacts(7, 2);

    assert_eq!(batch[0].phone, "+1555000007");
    assert_eq!(batch[1].phone, "+1555000008");
}
