//! Existing-destination handling shared by uploads and downloads

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::feature::FeatureKind;
use crate::filter::{PathMapping, TransferAction, TransferPathFilter, destination_of, seed_directory};
use crate::path::Path;
use crate::session::Session;
use crate::status::TransferStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// Applies a [`TransferAction`] to files that already exist at the destination
pub struct ActionFilter {
    source: Arc<dyn Session>,
    destination: Arc<dyn Session>,
    files: PathMapping,
    action: TransferAction,
    direction: Direction,
}

impl ActionFilter {
    pub fn new(
        source: Arc<dyn Session>,
        destination: Arc<dyn Session>,
        files: PathMapping,
        action: TransferAction,
        direction: Direction,
    ) -> Self {
        Self {
            source,
            destination,
            files,
            action,
            direction,
        }
    }

    pub fn action(&self) -> TransferAction {
        self.action
    }

    async fn resume(&self, target: &Path, size: u64, status: TransferStatus) -> Result<TransferStatus> {
        let writer = self
            .destination
            .writer()
            .ok_or_else(|| Error::unsupported(FeatureKind::Write))?;
        // Whole-object stores would re-send everything anyway
        if self.direction == Direction::Upload && !writer.random_access() {
            tracing::debug!(path = %target, "Destination cannot resume in place");
            return Ok(status.length(size));
        }
        let existing = writer.append(target).await?;
        if !existing.append || existing.size > size {
            return Ok(status.length(size));
        }
        tracing::debug!(path = %target, offset = existing.size, "Resume transfer");
        // Byte exact resume, nothing to skip
        Ok(status
            .append(true)
            .offset(existing.size)
            .length(size - existing.size))
    }

    async fn free_name(&self, target: &Path) -> Result<Path> {
        let name = target.name();
        let (stem, extension) = match name.rfind('.') {
            Some(i) if i > 0 => (&name[..i], &name[i..]),
            _ => (name, ""),
        };
        let mut n = 1u32;
        loop {
            let candidate = target.with_name(&format!("{stem}-{n}{extension}"));
            if !self.destination.exists(&candidate).await? {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

#[async_trait]
impl TransferPathFilter for ActionFilter {
    async fn accept(&self, file: &Path) -> Result<bool> {
        let target = destination_of(&self.files, file)?;
        let exists = self.destination.exists(target).await?;
        if file.is_directory() {
            return Ok(!exists);
        }
        if exists && self.action == TransferAction::Skip {
            tracing::debug!(path = %file, "Skip existing destination");
            return Ok(false);
        }
        Ok(true)
    }

    async fn prepare(&self, file: &mut Path) -> Result<TransferStatus> {
        let target = destination_of(&self.files, file)?.clone();
        if file.is_directory() {
            seed_directory(self.destination.as_ref(), &target).await?;
            return Ok(TransferStatus::new());
        }
        let size = self.source.resolve_size(file).await?;
        let exists = self.destination.exists(&target).await?;
        let status = TransferStatus::new().exists(exists);
        if !exists {
            return Ok(status.length(size));
        }
        match self.action {
            TransferAction::Resume => self.resume(&target, size, status).await,
            TransferAction::Rename => {
                let renamed = self.free_name(&target).await?;
                tracing::debug!(path = %file, target = %renamed, "Rename destination");
                Ok(status.exists(false).rename(renamed).length(size))
            }
            TransferAction::Overwrite | TransferAction::Skip => Ok(status.length(size)),
        }
    }

    fn complete(&self, file: &Path, status: &mut TransferStatus) {
        if !status.is_complete() {
            tracing::debug!(
                path = %file,
                direction = ?self.direction,
                bytes = status.transferred(),
                "Transfer complete"
            );
        }
        status.set_complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemorySession, WriteMode};

    fn filter(
        destination_mode: WriteMode,
        action: TransferAction,
        direction: Direction,
    ) -> (ActionFilter, Arc<MemorySession>) {
        let source = Arc::new(MemorySession::new(WriteMode::RandomAccess));
        let destination = Arc::new(MemorySession::new(destination_mode));
        source.insert_file("/src/report.pdf", vec![1u8; 100]);
        destination.insert_file("/dst/report.pdf", vec![1u8; 40]);
        let files = [(Path::file("/src/report.pdf"), Path::file("/dst/report.pdf"))]
            .into_iter()
            .collect();
        (
            ActionFilter::new(source, destination.clone(), files, action, direction),
            destination,
        )
    }

    #[tokio::test]
    async fn test_overwrite() {
        let (filter, _) = filter(WriteMode::RandomAccess, TransferAction::Overwrite, Direction::Upload);
        let mut file = Path::file("/src/report.pdf");
        assert!(filter.accept(&file).await.unwrap());
        let status = filter.prepare(&mut file).await.unwrap();
        assert!(status.exists);
        assert!(!status.append);
        assert_eq!(status.length, 100);
    }

    #[tokio::test]
    async fn test_skip_existing() {
        let (filter, _) = filter(WriteMode::RandomAccess, TransferAction::Skip, Direction::Download);
        assert!(!filter.accept(&Path::file("/src/report.pdf")).await.unwrap());
    }

    #[tokio::test]
    async fn test_resume_from_partial_destination() {
        let (filter, _) = filter(WriteMode::RandomAccess, TransferAction::Resume, Direction::Upload);
        let status = filter.prepare(&mut Path::file("/src/report.pdf")).await.unwrap();
        assert!(status.append);
        assert_eq!(status.offset, 40);
        assert_eq!(status.length, 60);
        assert_eq!(status.skip, 0);
        assert_eq!(status.read_position(), 40);
    }

    #[tokio::test]
    async fn test_resume_complete_destination() {
        let (filter, destination) = filter(WriteMode::RandomAccess, TransferAction::Resume, Direction::Download);
        destination.insert_file("/dst/report.pdf", vec![1u8; 100]);
        let status = filter.prepare(&mut Path::file("/src/report.pdf")).await.unwrap();
        assert!(status.append);
        assert_eq!(status.offset, 100);
        assert_eq!(status.length, 0);
    }

    #[tokio::test]
    async fn test_upload_to_whole_object_store_restarts() {
        let (filter, _) = filter(WriteMode::WholeObject, TransferAction::Resume, Direction::Upload);
        let status = filter.prepare(&mut Path::file("/src/report.pdf")).await.unwrap();
        assert!(!status.append);
        assert_eq!(status.length, 100);
    }

    #[tokio::test]
    async fn test_download_resumes_regardless_of_store() {
        let (filter, _) = filter(WriteMode::WholeObject, TransferAction::Resume, Direction::Download);
        let status = filter.prepare(&mut Path::file("/src/report.pdf")).await.unwrap();
        assert!(status.append);
        assert_eq!(status.offset, 40);
    }

    #[tokio::test]
    async fn test_rename_picks_free_name() {
        let (filter, destination) = filter(WriteMode::RandomAccess, TransferAction::Rename, Direction::Upload);
        destination.insert_file("/dst/report-1.pdf", Vec::new());
        let status = filter.prepare(&mut Path::file("/src/report.pdf")).await.unwrap();
        assert_eq!(status.rename.as_ref().unwrap().absolute(), "/dst/report-2.pdf");
        assert!(!status.exists);
    }
}
