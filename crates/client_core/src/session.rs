use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shared::{
    domain::SessionId,
    protocol::{DatasetSummary, OperationRequest, OperationResult, UploadResponse},
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    error::{ServiceError, SessionError, SessionPhase},
    events::{NoticeKind, SessionEvent},
    service::DatasetService,
};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_RESET_MESSAGE: &str = "Dataset reset to original state";

struct ActiveSession {
    session_id: SessionId,
    initial_summary: DatasetSummary,
    current_summary: DatasetSummary,
    history: Vec<OperationResult>,
    in_flight: bool,
}

impl ActiveSession {
    fn phase(&self) -> SessionPhase {
        if self.in_flight {
            SessionPhase::OperationInFlight
        } else {
            SessionPhase::SessionActive
        }
    }
}

#[derive(Default)]
struct ClientState {
    /// Bumped whenever the active session is replaced or torn down, so that
    /// responses issued against an older session can be recognised.
    generation: u64,
    session: Option<ActiveSession>,
}

impl ClientState {
    fn replace_session(&mut self, session: Option<ActiveSession>) {
        self.generation = self.generation.wrapping_add(1);
        self.session = session;
    }

    /// The active session, provided it is still the one a request was issued for.
    fn session_for(&mut self, generation: u64) -> Option<&mut ActiveSession> {
        if self.generation == generation {
            self.session.as_mut()
        } else {
            None
        }
    }
}

/// Marks the active session busy for the lifetime of one service call.
///
/// Dropping the guard without [`InFlight::release`] (for example when the
/// driving future is cancelled) still returns the session to idle.
struct InFlight<'a> {
    client: &'a SessionClient,
    session_id: SessionId,
    generation: u64,
    armed: bool,
}

impl InFlight<'_> {
    fn release(&mut self, state: &mut ClientState) {
        if !self.armed {
            return;
        }
        self.armed = false;
        if let Some(session) = state.session_for(self.generation) {
            session.in_flight = false;
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            let client = self.client;
            let mut state = client.state();
            self.release(&mut state);
            debug!(session_id = %self.session_id, "request abandoned; session released");
        }
    }
}

/// Client-side owner of one dataset session: its id, its summaries and the
/// history of applied operations.
pub struct SessionClient {
    service: Arc<dyn DatasetService>,
    inner: Mutex<ClientState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionClient {
    pub fn new(service: Arc<dyn DatasetService>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            service,
            inner: Mutex::new(ClientState::default()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state()
            .session
            .as_ref()
            .map_or(SessionPhase::NoSession, ActiveSession::phase)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.state()
            .session
            .as_ref()
            .map(|session| session.session_id.clone())
    }

    pub fn current_summary(&self) -> Option<DatasetSummary> {
        self.state()
            .session
            .as_ref()
            .map(|session| session.current_summary.clone())
    }

    pub fn initial_summary(&self) -> Option<DatasetSummary> {
        self.state()
            .session
            .as_ref()
            .map(|session| session.initial_summary.clone())
    }

    pub fn history(&self) -> Vec<OperationResult> {
        self.state()
            .session
            .as_ref()
            .map(|session| session.history.clone())
            .unwrap_or_default()
    }

    /// Adopts the result of an upload as the new active session.
    ///
    /// Whatever session existed before is discarded, including when the
    /// result turns out to be unusable.
    pub fn start_session(&self, upload: UploadResponse) -> Result<DatasetSummary, SessionError> {
        let UploadResponse {
            session_id,
            summary,
        } = upload;

        let problem = if session_id.is_blank() {
            Some("session id is empty".to_string())
        } else {
            summary.validate().err().map(|e| e.to_string())
        };

        if let Some(problem) = problem {
            warn!(%problem, "rejecting upload result");
            self.clear_session();
            return Err(self.fail(SessionError::InvalidUploadResult(problem)));
        }

        let session_id = SessionId(session_id.as_str().trim().to_string());
        self.state().replace_session(Some(ActiveSession {
            session_id: session_id.clone(),
            initial_summary: summary.clone(),
            current_summary: summary.clone(),
            history: Vec::new(),
            in_flight: false,
        }));

        info!(
            session_id = %session_id,
            rows = summary.row_count,
            columns = summary.column_count,
            "dataset session started"
        );
        self.emit(SessionEvent::SessionStarted {
            session_id,
            summary: summary.clone(),
        });
        self.notice(
            NoticeKind::Success,
            format!(
                "Dataset loaded: {} rows, {} columns",
                summary.row_count, summary.column_count
            ),
        );
        Ok(summary)
    }

    /// Sends `bytes` to the service and starts a session from its answer.
    ///
    /// A call that fails outright leaves the current session as it was.
    pub async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<DatasetSummary, SessionError> {
        debug!(filename, size = bytes.len(), "uploading dataset");
        match self.service.upload(filename, bytes).await {
            Ok(response) => self.start_session(response),
            Err(ServiceError::Rejected(api_error)) => {
                Err(self.fail(SessionError::Upload(api_error)))
            }
            Err(ServiceError::Transport(message)) => {
                Err(self.fail(SessionError::Transport(message)))
            }
            Err(ServiceError::Malformed(message)) => {
                warn!(%message, "rejecting upload result");
                self.clear_session();
                Err(self.fail(SessionError::InvalidUploadResult(message)))
            }
        }
    }

    pub async fn apply_operation(
        &self,
        request: OperationRequest,
    ) -> Result<OperationResult, SessionError> {
        let mut guard = self.begin(Some(&request))?;
        debug!(
            session_id = %guard.session_id,
            operation = %request.operation,
            "applying operation"
        );

        let outcome = self
            .service
            .apply_operation(&guard.session_id, &request)
            .await;

        let applied = {
            let mut state = self.state();
            guard.release(&mut state);
            let Some(session) = state.session_for(guard.generation) else {
                drop(state);
                return Err(self.superseded(&guard.session_id));
            };

            match outcome {
                Ok(result) => {
                    if let Err(problem) = check_result(&request, &result) {
                        Err(SessionError::Transport(format!("malformed response: {problem}")))
                    } else if result.before_summary != session.current_summary {
                        Err(SessionError::HistoryMismatch)
                    } else {
                        session.current_summary = result.after_summary.clone();
                        session.history.push(result.clone());
                        Ok((result, session.history.len()))
                    }
                }
                Err(ServiceError::Rejected(api_error)) => Err(SessionError::Operation(api_error)),
                Err(ServiceError::Transport(message)) => Err(SessionError::Transport(message)),
                Err(ServiceError::Malformed(message)) => Err(SessionError::Transport(format!(
                    "malformed response: {message}"
                ))),
            }
        };

        match applied {
            Ok((result, history_len)) => {
                info!(
                    session_id = %guard.session_id,
                    operation = %result.operation,
                    history_len,
                    "operation applied"
                );
                self.emit(SessionEvent::OperationApplied {
                    result: result.clone(),
                    summary: result.after_summary.clone(),
                });
                self.notice(
                    NoticeKind::Success,
                    format!("{}: {}", result.operation, result.description),
                );
                Ok(result)
            }
            Err(err) => {
                warn!(session_id = %guard.session_id, error = %err, "operation failed");
                Err(self.fail(err))
            }
        }
    }

    /// Restores the original dataset and clears the history.
    pub async fn reset_session(&self) -> Result<DatasetSummary, SessionError> {
        let mut guard = self.begin(None)?;
        let outcome = self.service.reset(&guard.session_id).await;

        let reset = {
            let mut state = self.state();
            guard.release(&mut state);
            let Some(session) = state.session_for(guard.generation) else {
                drop(state);
                return Err(self.superseded(&guard.session_id));
            };

            match outcome {
                Ok(response) => match response.summary.validate() {
                    Ok(()) => {
                        if response.summary != session.initial_summary {
                            warn!(
                                session_id = %guard.session_id,
                                "service reset summary differs from the upload summary"
                            );
                        }
                        session.history.clear();
                        session.current_summary = session.initial_summary.clone();
                        Ok((session.current_summary.clone(), response.message))
                    }
                    Err(problem) => Err(SessionError::Transport(format!(
                        "malformed response: {problem}"
                    ))),
                },
                Err(ServiceError::Rejected(api_error)) => Err(SessionError::Reset(api_error)),
                Err(ServiceError::Transport(message)) => Err(SessionError::Transport(message)),
                Err(ServiceError::Malformed(message)) => Err(SessionError::Transport(format!(
                    "malformed response: {message}"
                ))),
            }
        };

        match reset {
            Ok((summary, message)) => {
                info!(session_id = %guard.session_id, "dataset reset");
                self.emit(SessionEvent::SessionReset {
                    summary: summary.clone(),
                });
                let message = if message.trim().is_empty() {
                    DEFAULT_RESET_MESSAGE.to_string()
                } else {
                    message
                };
                self.notice(NoticeKind::Success, message);
                Ok(summary)
            }
            Err(err) => {
                warn!(session_id = %guard.session_id, error = %err, "reset failed");
                Err(self.fail(err))
            }
        }
    }

    /// Serialized bytes of the current dataset.
    pub async fn export_session(&self) -> Result<Vec<u8>, SessionError> {
        let mut guard = self.begin(None)?;
        let outcome = self.service.export(&guard.session_id).await;

        {
            let mut state = self.state();
            guard.release(&mut state);
            if state.session_for(guard.generation).is_none() {
                drop(state);
                return Err(self.superseded(&guard.session_id));
            }
        }

        match outcome {
            Ok(bytes) => {
                info!(session_id = %guard.session_id, size = bytes.len(), "dataset exported");
                self.notice(NoticeKind::Success, "Dataset exported".to_string());
                Ok(bytes)
            }
            Err(err) => {
                let err = match err {
                    ServiceError::Rejected(api_error) => SessionError::ExportFailed(api_error),
                    ServiceError::Transport(message) | ServiceError::Malformed(message) => {
                        SessionError::Transport(message)
                    }
                };
                warn!(session_id = %guard.session_id, error = %err, "export failed");
                Err(self.fail(err))
            }
        }
    }

    /// Forgets the active session. Responses still in flight for it are
    /// discarded when they arrive.
    pub fn end_session(&self) {
        self.clear_session();
    }

    fn clear_session(&self) {
        let ended = {
            let mut state = self.state();
            let ended = state.session.as_ref().map(|s| s.session_id.clone());
            state.replace_session(None);
            ended
        };
        if let Some(session_id) = ended {
            info!(%session_id, "dataset session ended");
            self.emit(SessionEvent::SessionEnded);
        }
    }

    /// Checks the caller contract and marks the session busy.
    fn begin(&self, request: Option<&OperationRequest>) -> Result<InFlight<'_>, SessionError> {
        let started = {
            let mut state = self.state();
            let generation = state.generation;
            match state.session.as_mut() {
                None => Err(SessionError::NoActiveSession(SessionPhase::NoSession)),
                Some(session) if session.in_flight => Err(SessionError::NoActiveSession(
                    SessionPhase::OperationInFlight,
                )),
                Some(session) => match request.map(OperationRequest::validate).transpose() {
                    Err(err) => Err(SessionError::InvalidRequest(err)),
                    Ok(_) => {
                        session.in_flight = true;
                        Ok((session.session_id.clone(), generation))
                    }
                },
            }
        };

        match started {
            Ok((session_id, generation)) => Ok(InFlight {
                client: self,
                session_id,
                generation,
                armed: true,
            }),
            Err(err) => {
                debug!(error = %err, "request refused before reaching the service");
                Err(self.fail(err))
            }
        }
    }

    fn superseded(&self, session_id: &SessionId) -> SessionError {
        info!(%session_id, "discarding response for a replaced session");
        self.fail(SessionError::Superseded)
    }

    fn fail(&self, err: SessionError) -> SessionError {
        self.notice(NoticeKind::Error, err.user_message());
        err
    }

    fn notice(&self, kind: NoticeKind, text: String) {
        self.emit(SessionEvent::Notice { kind, text });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_result(request: &OperationRequest, result: &OperationResult) -> Result<(), String> {
    if result.operation_kind != request.operation {
        return Err(format!(
            "expected a {} result, got {}",
            request.operation, result.operation_kind
        ));
    }
    result
        .before_summary
        .validate()
        .map_err(|e| format!("before summary: {e}"))?;
    result
        .after_summary
        .validate()
        .map_err(|e| format!("after summary: {e}"))
}
