use std::time::Duration;

use connkit::bulk::{BulkOperation, JobOptions, JobState, LineEnding, PollBackoff, ResultKind};
use connkit::{Connector, ConnectorError};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

use common::http_mock::BulkSurface;

const CSV: &str = "Name,Industry\nAcme,Manufacturing\nGlobex,Energy\nInitech,\n";

fn fast_backoff() -> PollBackoff {
    PollBackoff {
        initial: Duration::from_millis(5),
        max: Duration::from_millis(20),
        deadline: Some(Duration::from_secs(10)),
    }
}

async fn setup(polls_until_complete: usize) -> (MockServer, BulkSurface, Connector) {
    let server = MockServer::start().await;
    let surface = BulkSurface::new(polls_until_complete);
    surface.mount(&server).await;
    let connector = Connector::new(common::api_key_config(&server)).unwrap();
    (server, surface, connector)
}

#[tokio::test]
async fn full_lifecycle_returns_results_after_completion() {
    let (_server, surface, connector) = setup(2).await;
    let bulk = connector.bulk();

    let job = bulk
        .create("Account", BulkOperation::Insert, &JobOptions::default())
        .await
        .unwrap();
    assert_eq!(job.state, JobState::Open);

    bulk.upload(&job.id, CSV).await.unwrap();
    bulk.upload(&job.id, "Name,Industry\nUmbrella,Pharma\n").await.unwrap();
    assert_eq!(surface.job(&job.id).unwrap().uploads, 2);

    let closed = bulk.close(&job.id).await.unwrap();
    assert_eq!(closed.state, JobState::UploadComplete);

    // Results are refused until the provider reports completion.
    let err = bulk
        .fetch_results(&job.id, ResultKind::SuccessfulResults)
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::InvalidState { .. }), "{err:?}");

    let done = bulk
        .poll_until_terminal(&job.id, &fast_backoff(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(done.state, JobState::JobComplete);
    assert_eq!(done.number_records_processed, 3);
    assert_eq!(done.number_records_failed, 1);

    let csv = bulk
        .fetch_results(&job.id, ResultKind::SuccessfulResults)
        .await
        .unwrap();
    assert!(csv.starts_with("sf__Id,sf__Created"));
    let failed = bulk
        .fetch_results(&job.id, ResultKind::FailedResults)
        .await
        .unwrap();
    assert!(failed.contains("REQUIRED_FIELD_MISSING"));
}

#[tokio::test]
async fn fetch_results_while_open_is_invalid_state() {
    let (_server, _surface, connector) = setup(0).await;
    let bulk = connector.bulk();
    let job = bulk
        .create("Contact", BulkOperation::Insert, &JobOptions::default())
        .await
        .unwrap();

    let err = bulk
        .fetch_results(&job.id, ResultKind::SuccessfulResults)
        .await
        .unwrap_err();
    match err {
        ConnectorError::InvalidState { job_id, state, .. } => {
            assert_eq!(job_id, job.id);
            assert_eq!(state, "Open");
        }
        other => panic!("expected InvalidState, got {other:?}"),
    }
}

#[tokio::test]
async fn unseen_job_is_polled_before_fetching_results() {
    let (server, _surface, connector) = setup(0).await;
    let job = connector
        .bulk()
        .create("Account", BulkOperation::Insert, &JobOptions::default())
        .await
        .unwrap();
    connector.bulk().close(&job.id).await.unwrap();

    // A second connector has never observed the job.
    let other = Connector::new(common::api_key_config(&server)).unwrap();
    assert_eq!(other.bulk().observed_state(&job.id), None);
    let csv = other
        .bulk()
        .fetch_results(&job.id, ResultKind::SuccessfulResults)
        .await
        .unwrap();
    assert!(csv.contains("Acme"));
}

#[tokio::test]
async fn abort_is_refused_once_terminal() {
    let (_server, surface, connector) = setup(0).await;
    let bulk = connector.bulk();
    let job = bulk
        .create("Account", BulkOperation::Insert, &JobOptions::default())
        .await
        .unwrap();

    let aborted = bulk.abort(&job.id).await.unwrap();
    assert_eq!(aborted.state, JobState::Aborted);
    assert_eq!(surface.job(&job.id).unwrap().state, "Aborted");

    let err = bulk.abort(&job.id).await.unwrap_err();
    assert!(matches!(err, ConnectorError::InvalidState { operation: "abort", .. }));

    let err = bulk.upload(&job.id, CSV).await.unwrap_err();
    assert!(matches!(err, ConnectorError::InvalidState { .. }));
    assert_eq!(surface.job(&job.id).unwrap().uploads, 0);
}

#[tokio::test]
async fn polling_can_be_cancelled() {
    let (_server, _surface, connector) = setup(usize::MAX).await;
    let bulk = connector.bulk();
    let job = bulk
        .create("Account", BulkOperation::Insert, &JobOptions::default())
        .await
        .unwrap();
    bulk.close(&job.id).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let backoff = PollBackoff {
        deadline: None,
        ..fast_backoff()
    };
    let err = bulk
        .poll_until_terminal(&job.id, &backoff, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Cancelled));
}

#[tokio::test]
async fn upsert_requires_external_id_before_network() {
    let (_server, surface, connector) = setup(0).await;
    let err = connector
        .bulk()
        .create("Account", BulkOperation::Upsert, &JobOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Validation(_)));
    assert!(surface.jobs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn small_batches_post_records_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/composite/records"))
        .and(body_partial_json(serde_json::json!({
            "records": [{ "Name": "Acme" }, { "Name": "Globex" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "id": "001A", "success": true },
            { "id": "001B", "success": true }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let connector = Connector::new(common::api_key_config(&server)).unwrap();
    let records = vec![
        serde_json::json!({ "Name": "Acme" }),
        serde_json::json!({ "Name": "Globex" }),
    ];
    let created = connector
        .create_records("/composite/records", &records)
        .await
        .unwrap();
    assert_eq!(created.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn cached_reads_hit_the_network_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/describe/Account"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "Account",
            "fields": ["Id", "Name"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let connector = Connector::new(common::api_key_config(&server)).unwrap();
    let ttl = Some(Duration::from_secs(60));
    let first = connector
        .cached_get_json("/describe/Account", ttl)
        .await
        .unwrap();
    let second = connector
        .cached_get_json("/describe/Account", ttl)
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(second["fields"][1], "Name");
}

#[tokio::test]
async fn create_sends_requested_content_type_and_line_ending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jobs"))
        .and(body_partial_json(serde_json::json!({
            "object": "Account",
            "operation": "insert",
            "contentType": "CSV",
            "lineEnding": "CRLF"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "750W0001",
            "object": "Account",
            "operation": "insert",
            "state": "Open"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let connector = Connector::new(common::api_key_config(&server)).unwrap();
    let options = JobOptions {
        line_ending: LineEnding::Crlf,
        ..JobOptions::default()
    };
    let job = connector
        .bulk()
        .create("Account", BulkOperation::Insert, &options)
        .await
        .unwrap();
    assert_eq!(job.state, JobState::Open);
}

#[tokio::test]
async fn forgotten_jobs_stop_being_tracked() {
    let (_server, _surface, connector) = setup(0).await;
    let bulk = connector.bulk();
    let first = bulk
        .create("Account", BulkOperation::Insert, &JobOptions::default())
        .await
        .unwrap();
    let second = bulk
        .create("Contact", BulkOperation::Insert, &JobOptions::default())
        .await
        .unwrap();
    assert_eq!(bulk.tracked_jobs(), 2);

    bulk.close(&first.id).await.unwrap();
    bulk.poll_until_terminal(&first.id, &fast_backoff(), &CancellationToken::new())
        .await
        .unwrap();
    bulk.fetch_results(&first.id, ResultKind::SuccessfulResults)
        .await
        .unwrap();

    assert_eq!(bulk.forget(&first.id), Some(JobState::JobComplete));
    assert_eq!(bulk.observed_state(&first.id), None);
    assert_eq!(bulk.tracked_jobs(), 1);
    assert_eq!(bulk.forget(&first.id), None);

    // Results stay reachable; the provider is asked for the state again.
    let csv = bulk
        .fetch_results(&first.id, ResultKind::SuccessfulResults)
        .await
        .unwrap();
    assert!(csv.contains("Acme"));
    assert_eq!(bulk.observed_state(&second.id), Some(JobState::Open));
}
