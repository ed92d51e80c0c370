//! Upload from a local session to a remote one

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::TransferConfig;
use crate::error::Result;
use crate::filter::action::{ActionFilter, Direction};
use crate::filter::{PathMapping, TransferAction, TransferPathFilter};
use crate::path::Path;
use crate::session::Session;
use crate::status::TransferStatus;

/// Resumes only onto destinations that write ranges in place
pub struct UploadFilter(ActionFilter);

impl UploadFilter {
    pub fn new(
        local: Arc<dyn Session>,
        remote: Arc<dyn Session>,
        files: PathMapping,
        action: TransferAction,
    ) -> Self {
        Self(ActionFilter::new(local, remote, files, action, Direction::Upload))
    }

    /// Existing files handled by the configured upload action
    pub fn from_config(
        local: Arc<dyn Session>,
        remote: Arc<dyn Session>,
        files: PathMapping,
        config: &TransferConfig,
    ) -> Self {
        Self::new(local, remote, files, config.upload_action)
    }

    pub fn action(&self) -> TransferAction {
        self.0.action()
    }
}

#[async_trait]
impl TransferPathFilter for UploadFilter {
    async fn accept(&self, file: &Path) -> Result<bool> {
        self.0.accept(file).await
    }

    async fn prepare(&self, file: &mut Path) -> Result<TransferStatus> {
        self.0.prepare(file).await
    }

    fn complete(&self, file: &Path, status: &mut TransferStatus) {
        self.0.complete(file, status);
    }
}
