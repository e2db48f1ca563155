use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use super::*;
use async_trait::async_trait;
use shared::{
    domain::{FillMethod, OperationKind, SessionId},
    error::ApiError,
    protocol::{DatasetSummary, OperationRequest, OperationResult, ResetResponse, UploadResponse},
};
use tokio::sync::{broadcast::error::TryRecvError, Notify};

fn summary(rows: u64, columns: u64, missing: u64, duplicates: u64) -> DatasetSummary {
    DatasetSummary {
        row_count: rows,
        column_count: columns,
        missing_value_count: missing,
        duplicate_row_count: duplicates,
        column_names: (0..columns).map(|i| format!("col{i}")).collect(),
        column_types: Vec::new(),
        missing_per_column: Vec::new(),
    }
}

fn scenario_summary() -> DatasetSummary {
    summary(100, 5, 10, 3)
}

/// In-memory stand-in for the dataset service that tracks summaries the way
/// the real service would for the operations the tests use.
struct ModelService {
    original: DatasetSummary,
    current: Mutex<DatasetSummary>,
    calls: Mutex<Vec<&'static str>>,
    fail_next: Mutex<Option<ServiceError>>,
    forced_result: Mutex<Option<OperationResult>>,
    gate: Option<Gate>,
}

struct Gate {
    entered: Notify,
    release: Notify,
}

impl ModelService {
    fn new(original: DatasetSummary) -> Self {
        Self {
            current: Mutex::new(original.clone()),
            original,
            calls: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
            forced_result: Mutex::new(None),
            gate: None,
        }
    }

    fn gated(original: DatasetSummary) -> Self {
        Self {
            gate: Some(Gate {
                entered: Notify::new(),
                release: Notify::new(),
            }),
            ..Self::new(original)
        }
    }

    fn fail_next(&self, err: ServiceError) {
        *self.fail_next.lock().expect("lock") = Some(err);
    }

    fn force_result(&self, result: OperationResult) {
        *self.forced_result.lock().expect("lock") = Some(result);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("lock").clone()
    }

    fn record(&self, call: &'static str) -> Result<(), ServiceError> {
        self.calls.lock().expect("lock").push(call);
        match self.fail_next.lock().expect("lock").take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DatasetService for ModelService {
    async fn upload(&self, _filename: &str, _bytes: &[u8]) -> Result<UploadResponse, ServiceError> {
        self.record("upload")?;
        *self.current.lock().expect("lock") = self.original.clone();
        Ok(UploadResponse {
            session_id: SessionId("session-1".into()),
            summary: self.original.clone(),
        })
    }

    async fn apply_operation(
        &self,
        _session_id: &SessionId,
        request: &OperationRequest,
    ) -> Result<OperationResult, ServiceError> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.record("apply")?;
        if let Some(result) = self.forced_result.lock().expect("lock").take() {
            return Ok(result);
        }

        let mut current = self.current.lock().expect("lock");
        let before = current.clone();
        let (label, description) = match request.operation {
            OperationKind::RemoveDuplicates => {
                current.row_count -= current.duplicate_row_count;
                current.duplicate_row_count = 0;
                ("Remove Duplicates", "Removed duplicate rows".to_string())
            }
            OperationKind::FillMissing => {
                current.missing_value_count = 0;
                (
                    "Fill Missing Values",
                    format!("Filled missing values using {}", request.fill_method().expect("method")),
                )
            }
            _ => (
                "No-op",
                "No columns met the threshold for removal".to_string(),
            ),
        };
        Ok(OperationResult {
            operation_kind: request.operation,
            operation: label.to_string(),
            description,
            before_summary: before,
            after_summary: current.clone(),
        })
    }

    async fn reset(&self, _session_id: &SessionId) -> Result<ResetResponse, ServiceError> {
        self.record("reset")?;
        *self.current.lock().expect("lock") = self.original.clone();
        Ok(ResetResponse {
            summary: self.original.clone(),
            message: "Dataset reset to original state".into(),
        })
    }

    async fn export(&self, _session_id: &SessionId) -> Result<Vec<u8>, ServiceError> {
        self.record("export")?;
        let current = self.current.lock().expect("lock");
        Ok(format!("rows={}\n", current.row_count).into_bytes())
    }
}

async fn started_client(service: Arc<ModelService>) -> Arc<SessionClient> {
    let client = SessionClient::new(service);
    client.upload("data.csv", b"ignored").await.expect("upload");
    client
}

fn assert_chain(client: &SessionClient) {
    let history = client.history();
    let initial = client.initial_summary().expect("initial summary");
    let mut expected_before = initial;
    for result in &history {
        assert_eq!(result.before_summary, expected_before);
        expected_before = result.after_summary.clone();
    }
    assert_eq!(client.current_summary(), Some(expected_before));
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return events,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
}

#[tokio::test]
async fn cleaning_scenario_tracks_summaries_through_history_and_reset() {
    let service = Arc::new(ModelService::new(scenario_summary()));
    let client = started_client(service.clone()).await;
    assert_eq!(client.phase(), SessionPhase::SessionActive);
    assert_eq!(client.current_summary(), Some(scenario_summary()));

    let dedup = client
        .apply_operation(OperationRequest::new(OperationKind::RemoveDuplicates))
        .await
        .expect("remove duplicates");
    assert_eq!(dedup.before_summary.duplicate_row_count, 3);
    assert_eq!(dedup.after_summary.duplicate_row_count, 0);
    assert_eq!(dedup.after_summary.row_count, 97);
    assert_eq!(client.history().len(), 1);

    let filled = client
        .apply_operation(OperationRequest::fill_missing(FillMethod::Mean))
        .await
        .expect("fill missing");
    assert_eq!(filled.before_summary.missing_value_count, 10);
    assert_eq!(filled.after_summary.missing_value_count, 0);
    assert_eq!(client.history().len(), 2);
    assert_chain(&client);

    let reset = client.reset_session().await.expect("reset");
    assert_eq!(reset, scenario_summary());
    assert!(client.history().is_empty());
    assert_eq!(client.current_summary(), Some(scenario_summary()));
    assert_eq!(client.phase(), SessionPhase::SessionActive);
}

#[tokio::test]
async fn drop_that_removes_nothing_is_a_successful_no_op() {
    let service = Arc::new(ModelService::new(scenario_summary()));
    let client = started_client(service).await;

    let result = client
        .apply_operation(OperationRequest::drop_high_missing_columns(0.9))
        .await
        .expect("drop");
    assert_eq!(result.before_summary, result.after_summary);
    assert_eq!(result.description, "No columns met the threshold for removal");
    assert_eq!(client.history().len(), 1);
}

#[tokio::test]
async fn operations_without_a_session_never_reach_the_service() {
    let service = Arc::new(ModelService::new(scenario_summary()));
    let client = SessionClient::new(service.clone());

    let err = client
        .apply_operation(OperationRequest::new(OperationKind::RemoveDuplicates))
        .await
        .expect_err("no session");
    assert_eq!(err, SessionError::NoActiveSession(SessionPhase::NoSession));
    assert!(err.is_precondition_failure());

    assert_eq!(
        client.reset_session().await.expect_err("no session"),
        SessionError::NoActiveSession(SessionPhase::NoSession)
    );
    assert_eq!(
        client.export_session().await.expect_err("no session"),
        SessionError::NoActiveSession(SessionPhase::NoSession)
    );
    assert!(service.calls().is_empty());
}

#[tokio::test]
async fn second_request_while_one_is_in_flight_is_rejected_locally() {
    let service = Arc::new(ModelService::gated(scenario_summary()));
    let client = started_client(service.clone()).await;
    let gate = service.gate.as_ref().expect("gate");

    let pending = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .apply_operation(OperationRequest::new(OperationKind::RemoveDuplicates))
                .await
        })
    };
    gate.entered.notified().await;
    assert_eq!(client.phase(), SessionPhase::OperationInFlight);

    let err = client
        .apply_operation(OperationRequest::fill_missing(FillMethod::Median))
        .await
        .expect_err("in flight");
    assert_eq!(
        err,
        SessionError::NoActiveSession(SessionPhase::OperationInFlight)
    );
    assert_eq!(
        client.reset_session().await.expect_err("in flight"),
        SessionError::NoActiveSession(SessionPhase::OperationInFlight)
    );

    gate.release.notify_one();
    pending.await.expect("join").expect("first operation");
    assert_eq!(service.calls(), vec!["upload", "apply"]);
    assert_eq!(client.phase(), SessionPhase::SessionActive);
    assert_eq!(client.history().len(), 1);
}

#[tokio::test]
async fn invalid_request_is_refused_before_sending() {
    let service = Arc::new(ModelService::new(scenario_summary()));
    let client = started_client(service.clone()).await;

    let err = client
        .apply_operation(OperationRequest::new(OperationKind::RemoveDuplicates).with_threshold(0.2))
        .await
        .expect_err("threshold not accepted");
    assert!(matches!(err, SessionError::InvalidRequest(_)));
    assert!(err.is_precondition_failure());
    assert_eq!(service.calls(), vec!["upload"]);
    assert_eq!(client.phase(), SessionPhase::SessionActive);
}

#[tokio::test]
async fn service_rejection_leaves_history_untouched() {
    let service = Arc::new(ModelService::new(scenario_summary()));
    let client = started_client(service.clone()).await;
    client
        .apply_operation(OperationRequest::new(OperationKind::RemoveDuplicates))
        .await
        .expect("remove duplicates");
    let before = client.current_summary();

    service.fail_next(ServiceError::Rejected(ApiError::validation(
        "Column 'x' could not be converted",
    )));
    let err = client
        .apply_operation(OperationRequest::new(OperationKind::ConvertTypes))
        .await
        .expect_err("rejected");
    assert_eq!(
        err,
        SessionError::Operation(ApiError::validation("Column 'x' could not be converted"))
    );
    assert_eq!(client.history().len(), 1);
    assert_eq!(client.current_summary(), before);
    assert_eq!(client.phase(), SessionPhase::SessionActive);
}

#[tokio::test]
async fn transport_failure_is_reported_without_retry() {
    let service = Arc::new(ModelService::new(scenario_summary()));
    let client = started_client(service.clone()).await;

    service.fail_next(ServiceError::Transport("request timed out".into()));
    let err = client
        .apply_operation(OperationRequest::new(OperationKind::RemoveDuplicates))
        .await
        .expect_err("transport");
    assert_eq!(err, SessionError::Transport("request timed out".into()));
    assert_eq!(err.user_message(), "Network error: request timed out");
    assert!(client.history().is_empty());
    assert_eq!(service.calls(), vec!["upload", "apply"]);
    assert_eq!(client.phase(), SessionPhase::SessionActive);
}

#[tokio::test]
async fn result_that_breaks_the_chain_is_not_appended() {
    let service = Arc::new(ModelService::new(scenario_summary()));
    let client = started_client(service.clone()).await;

    service.force_result(OperationResult {
        operation_kind: OperationKind::RemoveDuplicates,
        operation: "Remove Duplicates".into(),
        description: "Removed 1 duplicate rows".into(),
        before_summary: summary(50, 5, 0, 1),
        after_summary: summary(49, 5, 0, 0),
    });
    let err = client
        .apply_operation(OperationRequest::new(OperationKind::RemoveDuplicates))
        .await
        .expect_err("mismatch");
    assert_eq!(err, SessionError::HistoryMismatch);
    assert!(client.history().is_empty());
    assert_eq!(client.current_summary(), Some(scenario_summary()));
}

#[tokio::test]
async fn result_with_impossible_summary_is_treated_as_transport_failure() {
    let service = Arc::new(ModelService::new(scenario_summary()));
    let client = started_client(service.clone()).await;

    let mut broken = scenario_summary();
    broken.column_names.pop();
    service.force_result(OperationResult {
        operation_kind: OperationKind::RemoveDuplicates,
        operation: "Remove Duplicates".into(),
        description: String::new(),
        before_summary: scenario_summary(),
        after_summary: broken,
    });
    let err = client
        .apply_operation(OperationRequest::new(OperationKind::RemoveDuplicates))
        .await
        .expect_err("malformed");
    assert!(matches!(err, SessionError::Transport(message) if message.starts_with("malformed")));
    assert!(client.history().is_empty());
}

#[tokio::test]
async fn reset_clears_any_amount_of_history() {
    let service = Arc::new(ModelService::new(scenario_summary()));
    let client = started_client(service).await;
    for _ in 0..3 {
        client
            .apply_operation(OperationRequest::drop_high_missing_columns(0.5))
            .await
            .expect("drop");
    }
    client
        .apply_operation(OperationRequest::new(OperationKind::RemoveDuplicates))
        .await
        .expect("remove duplicates");
    assert_eq!(client.history().len(), 4);
    assert_chain(&client);

    client.reset_session().await.expect("reset");
    assert!(client.history().is_empty());
    assert_eq!(client.current_summary(), client.initial_summary());
}

#[tokio::test]
async fn failed_reset_keeps_history() {
    let service = Arc::new(ModelService::new(scenario_summary()));
    let client = started_client(service.clone()).await;
    client
        .apply_operation(OperationRequest::new(OperationKind::RemoveDuplicates))
        .await
        .expect("remove duplicates");

    service.fail_next(ServiceError::Rejected(ApiError::not_found("Session not found")));
    let err = client.reset_session().await.expect_err("reset rejected");
    assert_eq!(
        err,
        SessionError::Reset(ApiError::not_found("Session not found"))
    );
    assert_eq!(client.history().len(), 1);
}

#[tokio::test]
async fn export_returns_current_bytes_and_maps_rejection() {
    let service = Arc::new(ModelService::new(scenario_summary()));
    let client = started_client(service.clone()).await;
    client
        .apply_operation(OperationRequest::new(OperationKind::RemoveDuplicates))
        .await
        .expect("remove duplicates");

    assert_eq!(client.export_session().await.expect("export"), b"rows=97\n");

    service.fail_next(ServiceError::Rejected(ApiError::internal("disk full")));
    assert_eq!(
        client.export_session().await.expect_err("export rejected"),
        SessionError::ExportFailed(ApiError::internal("disk full"))
    );
    assert_eq!(client.phase(), SessionPhase::SessionActive);
}

#[tokio::test]
async fn invalid_upload_result_clears_previous_session() {
    let service = Arc::new(ModelService::new(scenario_summary()));
    let client = started_client(service).await;

    let err = client
        .start_session(UploadResponse {
            session_id: SessionId("   ".into()),
            summary: scenario_summary(),
        })
        .expect_err("blank id");
    assert!(matches!(err, SessionError::InvalidUploadResult(_)));
    assert_eq!(client.phase(), SessionPhase::NoSession);

    let err = client
        .start_session(UploadResponse {
            session_id: SessionId("s-2".into()),
            summary: summary(2, 1, 5, 0),
        })
        .expect_err("missing exceeds cells");
    assert!(matches!(err, SessionError::InvalidUploadResult(_)));
    assert_eq!(client.session_id(), None);
}

#[tokio::test]
async fn new_upload_discards_previous_history() {
    let service = Arc::new(ModelService::new(scenario_summary()));
    let client = started_client(service).await;
    client
        .apply_operation(OperationRequest::new(OperationKind::RemoveDuplicates))
        .await
        .expect("remove duplicates");

    client
        .start_session(UploadResponse {
            session_id: SessionId(" s-2 ".into()),
            summary: summary(4, 2, 0, 0),
        })
        .expect("second session");
    assert_eq!(client.session_id(), Some(SessionId("s-2".into())));
    assert!(client.history().is_empty());
    assert_eq!(client.initial_summary(), Some(summary(4, 2, 0, 0)));
}

#[tokio::test]
async fn failed_upload_call_keeps_existing_session() {
    let service = Arc::new(ModelService::new(scenario_summary()));
    let client = started_client(service.clone()).await;

    service.fail_next(ServiceError::Rejected(ApiError::validation(
        "Invalid file format. Please upload a CSV file.",
    )));
    let err = client
        .upload("notes.txt", b"hello")
        .await
        .expect_err("rejected");
    assert!(matches!(err, SessionError::Upload(_)));
    assert_eq!(client.session_id(), Some(SessionId("session-1".into())));

    service.fail_next(ServiceError::Malformed("expected value".into()));
    let err = client
        .upload("data.csv", b"a\n1\n")
        .await
        .expect_err("malformed");
    assert!(matches!(err, SessionError::InvalidUploadResult(_)));
    assert_eq!(client.phase(), SessionPhase::NoSession);
}

#[tokio::test]
async fn response_for_a_replaced_session_is_discarded() {
    let service = Arc::new(ModelService::gated(scenario_summary()));
    let client = started_client(service.clone()).await;
    let gate = service.gate.as_ref().expect("gate");

    let pending = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .apply_operation(OperationRequest::new(OperationKind::RemoveDuplicates))
                .await
        })
    };
    gate.entered.notified().await;

    client
        .start_session(UploadResponse {
            session_id: SessionId("s-2".into()),
            summary: summary(4, 2, 0, 0),
        })
        .expect("replacement session");
    gate.release.notify_one();

    let err = pending.await.expect("join").expect_err("superseded");
    assert_eq!(err, SessionError::Superseded);
    assert!(client.history().is_empty());
    assert_eq!(client.current_summary(), Some(summary(4, 2, 0, 0)));
    assert_eq!(client.phase(), SessionPhase::SessionActive);
}

#[tokio::test]
async fn cancelled_request_releases_the_session() {
    let service = Arc::new(ModelService::gated(scenario_summary()));
    let client = started_client(service.clone()).await;

    let timed_out = tokio::time::timeout(
        Duration::from_millis(20),
        client.apply_operation(OperationRequest::new(OperationKind::RemoveDuplicates)),
    )
    .await;
    assert!(timed_out.is_err());
    assert_eq!(client.phase(), SessionPhase::SessionActive);
    assert!(client.history().is_empty());
}

#[tokio::test]
async fn events_follow_the_session_lifecycle() {
    let service = Arc::new(ModelService::new(scenario_summary()));
    let client = SessionClient::new(service.clone());
    let mut rx = client.subscribe_events();

    client.upload("data.csv", b"ignored").await.expect("upload");
    client
        .apply_operation(OperationRequest::new(OperationKind::RemoveDuplicates))
        .await
        .expect("remove duplicates");
    service.fail_next(ServiceError::Rejected(ApiError::validation("nope")));
    let _ = client
        .apply_operation(OperationRequest::new(OperationKind::ConvertTypes))
        .await;
    client.reset_session().await.expect("reset");
    client.end_session();

    let events = drain(&mut rx);
    assert!(matches!(
        &events[0],
        SessionEvent::SessionStarted { session_id, summary }
            if session_id.as_str() == "session-1" && *summary == scenario_summary()
    ));
    assert!(matches!(
        &events[1],
        SessionEvent::Notice { kind: NoticeKind::Success, .. }
    ));
    assert!(matches!(
        &events[2],
        SessionEvent::OperationApplied { summary, .. } if summary.row_count == 97
    ));
    assert!(matches!(
        &events[3],
        SessionEvent::Notice { kind: NoticeKind::Success, .. }
    ));
    assert_eq!(
        events[4],
        SessionEvent::Notice {
            kind: NoticeKind::Error,
            text: "nope".into()
        }
    );
    assert_eq!(
        events[5],
        SessionEvent::SessionReset {
            summary: scenario_summary()
        }
    );
    assert_eq!(
        events[6],
        SessionEvent::Notice {
            kind: NoticeKind::Success,
            text: "Dataset reset to original state".into()
        }
    );
    assert_eq!(events[7], SessionEvent::SessionEnded);
    assert_eq!(events.len(), 8);
    assert_eq!(client.phase(), SessionPhase::NoSession);
}

#[derive(Default)]
struct RecordingObserver {
    seen: Vec<String>,
}

impl SessionObserver for RecordingObserver {
    fn on_session_started(&mut self, session_id: &SessionId, summary: &DatasetSummary) {
        self.seen
            .push(format!("started {session_id} rows={}", summary.row_count));
    }

    fn on_operation_applied(&mut self, result: &OperationResult, summary: &DatasetSummary) {
        self.seen
            .push(format!("applied {} rows={}", result.operation_kind, summary.row_count));
    }

    fn on_reset(&mut self, summary: &DatasetSummary) {
        self.seen.push(format!("reset rows={}", summary.row_count));
    }

    fn on_session_ended(&mut self) {
        self.seen.push("ended".into());
    }
}

#[tokio::test]
async fn drive_observer_dispatches_until_client_is_dropped() {
    let service = Arc::new(ModelService::new(scenario_summary()));
    let client = SessionClient::new(service);
    let observer = tokio::spawn(drive_observer(
        client.subscribe_events(),
        RecordingObserver::default(),
    ));

    client.upload("data.csv", b"ignored").await.expect("upload");
    client
        .apply_operation(OperationRequest::new(OperationKind::RemoveDuplicates))
        .await
        .expect("remove duplicates");
    client.reset_session().await.expect("reset");
    client.end_session();
    drop(client);

    let observer = observer.await.expect("join");
    assert_eq!(
        observer.seen,
        vec![
            "started session-1 rows=100".to_string(),
            "applied remove-duplicates rows=97".to_string(),
            "reset rows=100".to_string(),
            "ended".to_string(),
        ]
    );
}
