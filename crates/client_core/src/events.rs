//! Notifications the session client publishes for whatever renders its state.

use shared::{
    domain::SessionId,
    protocol::{DatasetSummary, OperationResult},
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SessionStarted {
        session_id: SessionId,
        summary: DatasetSummary,
    },
    OperationApplied {
        result: OperationResult,
        summary: DatasetSummary,
    },
    SessionReset {
        summary: DatasetSummary,
    },
    SessionEnded,
    Notice {
        kind: NoticeKind,
        text: String,
    },
}

/// Callback-style view of [`SessionEvent`]. Every method defaults to a no-op.
pub trait SessionObserver: Send {
    fn on_session_started(&mut self, _session_id: &SessionId, _summary: &DatasetSummary) {}
    fn on_operation_applied(&mut self, _result: &OperationResult, _summary: &DatasetSummary) {}
    fn on_reset(&mut self, _summary: &DatasetSummary) {}
    fn on_session_ended(&mut self) {}
    fn on_notice(&mut self, _kind: NoticeKind, _text: &str) {}
}

pub fn dispatch(observer: &mut dyn SessionObserver, event: &SessionEvent) {
    match event {
        SessionEvent::SessionStarted {
            session_id,
            summary,
        } => observer.on_session_started(session_id, summary),
        SessionEvent::OperationApplied { result, summary } => {
            observer.on_operation_applied(result, summary)
        }
        SessionEvent::SessionReset { summary } => observer.on_reset(summary),
        SessionEvent::SessionEnded => observer.on_session_ended(),
        SessionEvent::Notice { kind, text } => observer.on_notice(*kind, text),
    }
}

/// Feeds every event from `events` into `observer` until the client that owns
/// the channel is dropped, then hands the observer back.
pub async fn drive_observer<O: SessionObserver>(
    mut events: broadcast::Receiver<SessionEvent>,
    mut observer: O,
) -> O {
    loop {
        match events.recv().await {
            Ok(event) => dispatch(&mut observer, &event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "session observer fell behind; events dropped");
            }
            Err(RecvError::Closed) => return observer,
        }
    }
}
