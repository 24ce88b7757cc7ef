use crate::error::Result;
use crate::operation::OperationResult;

/// Number of finished operations kept on disk.
pub const HISTORY_LIMIT: usize = 200;

/// Append-only record of finished operations.
#[async_trait::async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Appends a result, dropping the oldest entries beyond `HISTORY_LIMIT`.
    async fn append(&self, result: &OperationResult) -> Result<()>;

    /// Most recent results first.
    async fn recent(&self, limit: usize) -> Result<Vec<OperationResult>>;
}
