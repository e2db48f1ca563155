use async_trait::async_trait;
use shared::{
    domain::SessionId,
    protocol::{OperationRequest, OperationResult, ResetResponse, UploadResponse},
};

use crate::error::ServiceError;

/// The four capabilities the session client needs from whoever holds the data.
///
/// Every call may be slow and may fail for reasons outside the client's
/// control.
#[async_trait]
pub trait DatasetService: Send + Sync {
    async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<UploadResponse, ServiceError>;
    async fn apply_operation(
        &self,
        session_id: &SessionId,
        request: &OperationRequest,
    ) -> Result<OperationResult, ServiceError>;
    async fn reset(&self, session_id: &SessionId) -> Result<ResetResponse, ServiceError>;
    async fn export(&self, session_id: &SessionId) -> Result<Vec<u8>, ServiceError>;
}
