//! Synchronize: copy only what differs at the destination

use std::sync::Arc;

use async_trait::async_trait;

use crate::attributes::PathAttributes;
use crate::config::TransferConfig;
use crate::error::Result;
use crate::filter::{CopyCost, CopyTransferFilter, PathMapping, TransferPathFilter};
use crate::path::Path;
use crate::session::Session;
use crate::status::TransferStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    Different,
}

/// Decides whether two files hold the same content from their attributes
///
/// Checked in order: checksum, ETag when both sides speak the same protocol,
/// size, then modification time. A check that lacks the attribute on either
/// side is passed over; when nothing decides, the files count as different.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComparisonService {
    same_protocol: bool,
}

impl ComparisonService {
    pub fn new(same_protocol: bool) -> Self {
        Self { same_protocol }
    }

    pub fn compare(&self, source: &PathAttributes, target: &PathAttributes) -> Comparison {
        if let (Some(a), Some(b)) = (&source.checksum, &target.checksum)
            && a.algorithm == b.algorithm
        {
            return equal_if(a.hash == b.hash);
        }
        if self.same_protocol
            && let (Some(a), Some(b)) = (&source.etag, &target.etag)
        {
            return equal_if(a == b);
        }
        match (source.size, target.size) {
            (Some(a), Some(b)) if a != b => return Comparison::Different,
            (Some(_), Some(_)) => {}
            _ => return Comparison::Different,
        }
        match (source.modified, target.modified) {
            // Same size and the destination is at least as recent
            (Some(a), Some(b)) => equal_if(b.as_second() >= a.as_second()),
            _ => Comparison::Different,
        }
    }
}

fn equal_if(same: bool) -> Comparison {
    if same {
        Comparison::Equal
    } else {
        Comparison::Different
    }
}

/// Copy that skips files already identical at the destination
pub struct SyncTransferFilter {
    copy: CopyTransferFilter,
    comparison: ComparisonService,
}

impl SyncTransferFilter {
    pub fn new(source: Arc<dyn Session>, destination: Arc<dyn Session>, files: PathMapping) -> Self {
        let comparison = ComparisonService::new(source.protocol() == destination.protocol());
        Self {
            copy: CopyTransferFilter::new(source, destination, files),
            comparison,
        }
    }

    pub fn with_cost(mut self, cost: CopyCost) -> Self {
        self.copy = self.copy.with_cost(cost);
        self
    }

    pub fn with_config(self, config: &TransferConfig) -> Self {
        self.with_cost(config.copy_cost)
    }
}

#[async_trait]
impl TransferPathFilter for SyncTransferFilter {
    async fn accept(&self, file: &Path) -> Result<bool> {
        if !self.copy.accept(file).await? {
            return Ok(false);
        }
        if !file.is_file() {
            return Ok(true);
        }
        let target = self.copy.target(file)?;
        if !self.copy.destination().exists(target).await? {
            return Ok(true);
        }
        let source = self.copy.source().attributes(file).await?;
        let existing = self.copy.destination().attributes(target).await?;
        let comparison = self.comparison.compare(&source, &existing);
        tracing::debug!(path = %file, ?comparison, "Compared with destination");
        Ok(comparison == Comparison::Different)
    }

    async fn prepare(&self, file: &mut Path) -> Result<TransferStatus> {
        let status = self.copy.prepare(file).await?;
        if !file.is_file() {
            return Ok(status);
        }
        let exists = self.copy.destination().exists(self.copy.target(file)?).await?;
        Ok(status.exists(exists))
    }

    fn complete(&self, file: &Path, status: &mut TransferStatus) {
        self.copy.complete(file, status);
    }
}
