//! Sync provider abstraction
//!
//! The provider is the external collaborator that performs the actual
//! synchronization of buffered toolkit transactions with the server. The
//! scheduler receives one at construction and never resolves it globally.

use async_trait::async_trait;

use crate::error::SyncError;

/// External collaborator performing synchronization attempts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SyncProvider: Send + Sync {
    /// Whether preconditions such as device configuration are satisfied
    async fn is_ready(&self) -> bool;

    /// Perform one synchronization attempt
    async fn attempt_sync(&self) -> Result<(), SyncError>;
}
