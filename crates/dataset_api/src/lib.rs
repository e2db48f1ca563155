use cleaning::{CleaningError, Table};
use shared::{
    domain::SessionId,
    error::{ApiError, ErrorCode},
    protocol::{
        CleanOptions, DatasetSummary, OperationRequest, OperationResult, ResetResponse,
        SummaryResponse, UploadResponse,
    },
};
use tracing::{error, info, warn};

mod store;

pub use store::{DatasetSession, DatasetStore, DEFAULT_MAX_SESSIONS};

pub const MAX_FILENAME_BYTES: usize = 180;
pub const EXPORT_FILENAME: &str = "cleaned_dataset.csv";
pub const ONE_SHOT_FILENAME: &str = "cleaned.csv";

const NO_DATASET: &str = "No active dataset. Please upload a CSV file first.";

#[derive(Clone, Default)]
pub struct ApiContext {
    pub store: DatasetStore,
}

pub async fn upload_dataset(
    ctx: &ApiContext,
    filename: Option<&str>,
    body: &[u8],
) -> Result<UploadResponse, ApiError> {
    let filename = validate_csv_filename(filename)?.to_string();
    let body = body.to_vec();
    let (session, summary) = run_blocking(move || {
        let table = parse_upload(&body)?;
        let summary = table.summary();
        Ok::<_, ApiError>((DatasetSession::new(filename, table.clone(), table), summary))
    })
    .await??;
    let filename = session.filename.clone();
    let session_id = ctx.store.create_session(session).await;
    info!(
        %session_id,
        %filename,
        rows = summary.row_count,
        columns = summary.column_count,
        "dataset uploaded"
    );
    Ok(UploadResponse {
        session_id,
        summary,
    })
}

/// Applies one operation to the session's working copy. The copy is only
/// swapped in when the operation succeeds.
pub async fn apply_operation(
    ctx: &ApiContext,
    session_id: &SessionId,
    request: &OperationRequest,
) -> Result<OperationResult, ApiError> {
    request
        .validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let operation = request.operation;
    let request = request.clone();
    let outcome = with_session(ctx, session_id, move |session| {
        let before_summary = session.current.summary();
        let mut next = session.current.clone();
        let applied = cleaning::apply_operation(&mut next, &request)?;
        let after_summary = next.summary();
        session.current = next;
        Ok::<_, CleaningError>(OperationResult {
            operation_kind: request.operation,
            operation: applied.label,
            description: applied.description,
            before_summary,
            after_summary,
        })
    })
    .await?;

    match outcome {
        Ok(result) => {
            info!(
                %session_id,
                operation = %result.operation_kind,
                rows = result.after_summary.row_count,
                "operation applied"
            );
            Ok(result)
        }
        Err(error) => {
            warn!(%session_id, %operation, %error, "operation rejected");
            Err(cleaning_error(error))
        }
    }
}

pub async fn reset_dataset(
    ctx: &ApiContext,
    session_id: &SessionId,
) -> Result<ResetResponse, ApiError> {
    let summary = with_session(ctx, session_id, |session| {
        session.current = session.original.clone();
        session.current.summary()
    })
    .await?;
    info!(%session_id, "dataset reset to original");
    Ok(ResetResponse {
        summary,
        message: "Dataset reset to original state".to_string(),
    })
}

pub async fn export_dataset(ctx: &ApiContext, session_id: &SessionId) -> Result<Vec<u8>, ApiError> {
    let bytes = with_session(ctx, session_id, |session| cleaning::write_csv(&session.current))
        .await?
        .map_err(|e| ApiError::internal(format!("Download failed: {e}")))?;
    info!(%session_id, bytes = bytes.len(), "dataset exported");
    Ok(bytes)
}

pub async fn dataset_summary(
    ctx: &ApiContext,
    session_id: &SessionId,
) -> Result<SummaryResponse, ApiError> {
    let summary: DatasetSummary =
        with_session(ctx, session_id, |session| session.current.summary()).await?;
    Ok(SummaryResponse { summary })
}

/// Stateless cleaning: parse, run the selected steps, serialize.
pub async fn clean_once(
    filename: Option<&str>,
    body: &[u8],
    options: CleanOptions,
) -> Result<Vec<u8>, ApiError> {
    validate_csv_filename(filename)?;
    let body = body.to_vec();
    run_blocking(move || {
        let mut table = parse_upload(&body)?;
        let applied = cleaning::clean_pipeline(&mut table, options);
        info!(steps = applied.len(), rows = table.row_count(), "one-shot clean finished");
        cleaning::write_csv(&table)
            .map_err(|e| ApiError::internal(format!("Error during data cleaning: {e}")))
    })
    .await?
}

/// Locks the session and runs `f` on a blocking thread, so table work never
/// stalls the async workers.
async fn with_session<R, F>(ctx: &ApiContext, session_id: &SessionId, f: F) -> Result<R, ApiError>
where
    F: FnOnce(&mut DatasetSession) -> R + Send + 'static,
    R: Send + 'static,
{
    let mut session = ctx
        .store
        .lock_session(session_id)
        .await
        .ok_or_else(|| ApiError::not_found(NO_DATASET))?;
    run_blocking(move || f(&mut session)).await
}

async fn run_blocking<R, F>(f: F) -> Result<R, ApiError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!(error = %e, "cleaning task failed");
        ApiError::internal("Error during data cleaning")
    })
}

fn validate_csv_filename(filename: Option<&str>) -> Result<&str, ApiError> {
    let name = filename
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::validation("No file selected"))?;
    if name.len() > MAX_FILENAME_BYTES {
        return Err(ApiError::validation("filename is too long"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(ApiError::validation(
            "filename must not contain path separators",
        ));
    }
    if !name.ends_with(".csv") {
        return Err(ApiError::validation(
            "Invalid file format. Please upload a CSV file.",
        ));
    }
    Ok(name)
}

fn parse_upload(body: &[u8]) -> Result<Table, ApiError> {
    cleaning::read_csv(body).map_err(|e| {
        ApiError::new(
            ErrorCode::Validation,
            format!("Failed to read CSV file: {e}"),
        )
    })
}

fn cleaning_error(error: CleaningError) -> ApiError {
    match error {
        CleaningError::InvalidRequest(e) => ApiError::validation(e.to_string()),
        other => ApiError::internal(format!("Error during cleaning: {other}")),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
