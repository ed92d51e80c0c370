//! Download from a remote session to a local one

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::TransferConfig;
use crate::error::Result;
use crate::filter::action::{ActionFilter, Direction};
use crate::filter::{PathMapping, TransferAction, TransferPathFilter};
use crate::path::Path;
use crate::session::Session;
use crate::status::TransferStatus;

pub struct DownloadFilter(ActionFilter);

impl DownloadFilter {
    pub fn new(
        remote: Arc<dyn Session>,
        local: Arc<dyn Session>,
        files: PathMapping,
        action: TransferAction,
    ) -> Self {
        Self(ActionFilter::new(remote, local, files, action, Direction::Download))
    }

    pub fn from_config(
        remote: Arc<dyn Session>,
        local: Arc<dyn Session>,
        files: PathMapping,
        config: &TransferConfig,
    ) -> Self {
        Self::new(remote, local, files, config.download_action)
    }

    pub fn action(&self) -> TransferAction {
        self.0.action()
    }
}

#[async_trait]
impl TransferPathFilter for DownloadFilter {
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
