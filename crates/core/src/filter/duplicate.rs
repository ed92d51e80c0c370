//! Duplicate within one session

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::filter::{CopyCost, CopyTransferFilter, PathMapping, TransferPathFilter};
use crate::path::Path;
use crate::session::Session;
use crate::status::TransferStatus;

/// Copy where source and destination live on the same session
///
/// Costs the file size once when the backend copies server-side, twice when
/// the bytes have to be read and written back.
pub struct DuplicateFilter {
    copy: CopyTransferFilter,
}

impl DuplicateFilter {
    pub fn new(session: Arc<dyn Session>, files: PathMapping) -> Self {
        let cost = if session.server_copy().is_some() {
            CopyCost::ServerSide
        } else {
            CopyCost::DownloadUpload
        };
        Self {
            copy: CopyTransferFilter::new(session.clone(), session, files).with_cost(cost),
        }
    }
}

#[async_trait]
impl TransferPathFilter for DuplicateFilter {
    async fn accept(&self, file: &Path) -> Result<bool> {
        self.copy.accept(file).await
    }

    async fn prepare(&self, file: &mut Path) -> Result<TransferStatus> {
        self.copy.prepare(file).await
    }

    fn complete(&self, file: &Path, status: &mut TransferStatus) {
        self.copy.complete(file, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemorySession, WriteMode};

    #[tokio::test]
    async fn test_server_side_copy_costs_once() {
        let session = Arc::new(MemorySession::new(WriteMode::RandomAccess));
        session.insert_file("/a/file", vec![0u8; 64]);
        let file = Path::file("/a/file");
        let files = [(file.clone(), Path::file("/a/file-copy"))].into_iter().collect();

        let filter = DuplicateFilter::new(session, files);
        assert!(filter.accept(&file).await.unwrap());
        let status = filter.prepare(&mut file.clone()).await.unwrap();
        assert_eq!(status.length, 64);
    }

    #[tokio::test]
    async fn test_without_server_copy_costs_twice() {
        let session = Arc::new(MemorySession::new(WriteMode::RandomAccess).without_server_copy());
        session.insert_file("/a/file", vec![0u8; 64]);
        let file = Path::file("/a/file");
        let files = [(file.clone(), Path::file("/a/file-copy"))].into_iter().collect();

        let filter = DuplicateFilter::new(session, files);
        let status = filter.prepare(&mut file.clone()).await.unwrap();
        assert_eq!(status.length, 128);
    }
}
