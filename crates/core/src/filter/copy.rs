//! Copy between two sessions

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::TransferConfig;
use crate::error::Result;
use crate::filter::{CopyCost, PathMapping, TransferPathFilter, destination_of, seed_directory};
use crate::path::Path;
use crate::session::Session;
use crate::status::TransferStatus;

/// Copies every file and creates every missing directory
pub struct CopyTransferFilter {
    source: Arc<dyn Session>,
    destination: Arc<dyn Session>,
    files: PathMapping,
    cost: CopyCost,
}

impl CopyTransferFilter {
    pub fn new(source: Arc<dyn Session>, destination: Arc<dyn Session>, files: PathMapping) -> Self {
        Self {
            source,
            destination,
            files,
            cost: CopyCost::default(),
        }
    }

    pub fn with_cost(mut self, cost: CopyCost) -> Self {
        self.cost = cost;
        self
    }

    /// Cost model from the transfer settings
    pub fn with_config(self, config: &TransferConfig) -> Self {
        self.with_cost(config.copy_cost)
    }

    pub fn source(&self) -> &dyn Session {
        self.source.as_ref()
    }

    pub fn destination(&self) -> &dyn Session {
        self.destination.as_ref()
    }

    pub fn target(&self, file: &Path) -> Result<&Path> {
        destination_of(&self.files, file)
    }
}

#[async_trait]
impl TransferPathFilter for CopyTransferFilter {
    async fn accept(&self, file: &Path) -> Result<bool> {
        if file.is_directory() {
            let target = self.target(file)?;
            // Existing directories are already satisfied
            return Ok(!self.destination.exists(target).await?);
        }
        Ok(true)
    }

    async fn prepare(&self, file: &mut Path) -> Result<TransferStatus> {
        let mut status = TransferStatus::new();
        if file.is_file() {
            let size = self.source.resolve_size(file).await?;
            status = status.length(self.cost.length(size));
        } else if file.is_directory() {
            seed_directory(self.destination.as_ref(), self.target(file)?).await?;
        }
        tracing::debug!(path = %file, length = status.length, "Prepared copy");
        Ok(status)
    }

    fn complete(&self, file: &Path, status: &mut TransferStatus) {
        if !status.is_complete() {
            tracing::debug!(path = %file, bytes = status.transferred(), "Copy complete");
        }
        status.set_complete();
    }
}
