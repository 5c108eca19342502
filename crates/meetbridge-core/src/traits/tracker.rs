//! Task-tracking seam.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{CreatedTask, TaskRequest};

/// Creates tasks in an external tracker.
#[async_trait]
pub trait TaskTracker: Send + Sync {
    fn name(&self) -> &str;

    /// Create one remote task. Not idempotent: repeating a call may create a duplicate.
    async fn create_task(&self, request: &TaskRequest) -> Result<CreatedTask>;
}
