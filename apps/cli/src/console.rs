use std::io::Write;

use client_core::{NoticeKind, SessionObserver};
use shared::{
    domain::SessionId,
    protocol::{DatasetSummary, OperationResult},
};

/// Prints session events as plain text lines.
pub struct ConsoleObserver<W> {
    out: W,
}

impl<W: Write + Send> ConsoleObserver<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        // A closed stdout is not worth aborting the session over.
        let _ = writeln!(self.out, "{text}");
    }
}

pub fn format_summary(summary: &DatasetSummary) -> String {
    format!(
        "rows={} columns={} missing={} duplicates={}",
        summary.row_count,
        summary.column_count,
        summary.missing_value_count,
        summary.duplicate_row_count
    )
}

impl<W: Write + Send> SessionObserver for ConsoleObserver<W> {
    fn on_session_started(&mut self, session_id: &SessionId, summary: &DatasetSummary) {
        self.line(&format!("session {session_id}: {}", format_summary(summary)));
        if !summary.column_names.is_empty() {
            self.line(&format!("  columns: {}", summary.column_names.join(", ")));
        }
    }

    fn on_operation_applied(&mut self, result: &OperationResult, summary: &DatasetSummary) {
        self.line(&format!("{}: {}", result.operation, result.description));
        self.line(&format!(
            "  {} -> {}",
            format_summary(&result.before_summary),
            format_summary(summary)
        ));
    }

    fn on_reset(&mut self, summary: &DatasetSummary) {
        self.line(&format!("reset: {}", format_summary(summary)));
    }

    fn on_notice(&mut self, kind: NoticeKind, text: &str) {
        if kind == NoticeKind::Error {
            self.line(&format!("error: {text}"));
        }
    }
}
