use async_trait::async_trait;
use client_core::{DatasetService, ServiceError};
use dataset_api::ApiContext;
use shared::{
    domain::SessionId,
    protocol::{OperationRequest, OperationResult, ResetResponse, UploadResponse},
};

/// Runs the dataset service in-process instead of over HTTP.
#[derive(Clone, Default)]
pub struct LocalDatasetService {
    ctx: ApiContext,
}

#[async_trait]
impl DatasetService for LocalDatasetService {
    async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<UploadResponse, ServiceError> {
        dataset_api::upload_dataset(&self.ctx, Some(filename), bytes)
            .await
            .map_err(ServiceError::Rejected)
    }

    async fn apply_operation(
        &self,
        session_id: &SessionId,
        request: &OperationRequest,
    ) -> Result<OperationResult, ServiceError> {
        dataset_api::apply_operation(&self.ctx, session_id, request)
            .await
            .map_err(ServiceError::Rejected)
    }

    async fn reset(&self, session_id: &SessionId) -> Result<ResetResponse, ServiceError> {
        dataset_api::reset_dataset(&self.ctx, session_id)
            .await
            .map_err(ServiceError::Rejected)
    }

    async fn export(&self, session_id: &SessionId) -> Result<Vec<u8>, ServiceError> {
        dataset_api::export_dataset(&self.ctx, session_id)
            .await
            .map_err(ServiceError::Rejected)
    }
}
