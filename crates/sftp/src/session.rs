//! SFTP session over an established russh-sftp channel
//!
//! Paths are absolute server paths. Files support native ranged reads and
//! writes by seeking the remote handle.

use std::io::SeekFrom;
use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use russh_sftp::client::SftpSession as RusshSftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags};
use tokio::io::AsyncSeekExt;

use ferry_core::attributes::DEFAULT_FILE_MODE;
use ferry_core::feature::{
    Append, AttributesFinder, Delete, Directory, Find, Read, ReadStream, Touch, Write, WriteStream,
};
use ferry_core::io::ClosingWriteStream;
use ferry_core::mapping::ExceptionMappingService;
use ferry_core::{
    AttributedList, Error, ListService, Path, PathAttributes, PathCache, PathType, Permission,
    Protocol, Result, Session, TransferStatus,
};

use crate::mapping::SftpExceptionMappingService;

fn attributes_of(metadata: &FileAttributes) -> PathAttributes {
    PathAttributes {
        size: metadata.is_regular().then_some(metadata.size).flatten(),
        modified: metadata
            .mtime
            .and_then(|t| Timestamp::from_second(i64::from(t)).ok()),
        permission: metadata.permissions.map(Permission::new),
        ..Default::default()
    }
}

fn kind_of(metadata: &FileAttributes) -> PathType {
    if metadata.is_dir() {
        PathType::Directory
    } else if metadata.is_symlink() {
        PathType::Symlink
    } else {
        PathType::File
    }
}

fn now() -> u32 {
    u32::try_from(Timestamp::now().as_second()).unwrap_or(u32::MAX)
}

struct SftpLister {
    sftp: Arc<RusshSftpSession>,
}

#[async_trait]
impl ListService for SftpLister {
    async fn list(&self, directory: &Path) -> Result<AttributedList> {
        let entries = self
            .sftp
            .read_dir(directory.absolute())
            .await
            .map_err(|e| SftpExceptionMappingService.map_with("Listing directory failed", e))?;
        let mut items = Vec::new();
        for entry in entries {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let metadata = entry.metadata();
            items.push(
                directory
                    .child(&name, kind_of(&metadata))
                    .with_attributes(attributes_of(&metadata)),
            );
        }
        tracing::debug!(directory = %directory, entries = items.len(), "Listed SFTP directory");
        Ok(AttributedList::new(items))
    }
}

/// Session over one SFTP subsystem channel
pub struct SftpSession {
    sftp: Arc<RusshSftpSession>,
    cache: Arc<PathCache>,
    lister: SftpLister,
}

impl SftpSession {
    /// Wrap an authenticated SFTP client
    pub fn new(sftp: RusshSftpSession) -> Self {
        let sftp = Arc::new(sftp);
        Self {
            lister: SftpLister { sftp: sftp.clone() },
            sftp,
            cache: Arc::new(PathCache::new()),
        }
    }

    async fn metadata(&self, file: &Path) -> Result<FileAttributes> {
        self.sftp
            .metadata(file.absolute())
            .await
            .map_err(|e| SftpExceptionMappingService.map(e))
    }

    /// Every path below `directory`, parents before children
    async fn walk(&self, directory: &Path) -> Result<Vec<Path>> {
        let mut found = Vec::new();
        let mut pending = vec![directory.clone()];
        while let Some(next) = pending.pop() {
            for child in self.lister.list(&next).await?.into_vec() {
                if child.is_directory() {
                    pending.push(child.clone());
                }
                found.push(child);
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl Session for SftpSession {
    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }

    fn cache(&self) -> &PathCache {
        &self.cache
    }

    fn list_service(&self) -> &dyn ListService {
        &self.lister
    }

    fn reader(&self) -> Option<&dyn Read> {
        Some(self)
    }

    fn writer(&self) -> Option<&dyn Write> {
        Some(self)
    }

    fn deleter(&self) -> Option<&dyn Delete> {
        Some(self)
    }

    fn toucher(&self) -> Option<&dyn Touch> {
        Some(self)
    }

    fn finder(&self) -> Option<&dyn Find> {
        Some(self)
    }

    fn attributes_finder(&self) -> Option<&dyn AttributesFinder> {
        Some(self)
    }

    fn directories(&self) -> Option<&dyn Directory> {
        Some(self)
    }

    async fn close(&self) -> Result<()> {
        self.cache.clear();
        self.sftp
            .close()
            .await
            .map_err(|e| SftpExceptionMappingService.map(e))
    }
}

#[async_trait]
impl Read for SftpSession {
    async fn read(&self, file: &Path, status: &TransferStatus) -> Result<ReadStream> {
        let start = status.read_position();
        let mut handle = self
            .sftp
            .open(file.absolute())
            .await
            .map_err(|e| SftpExceptionMappingService.map_with("Download failed", e))?;
        if (start > 0 || status.length > 0)
            && let Some(size) = attributes_of(&self.metadata(file).await?).size
        {
            status.check_range(file, size)?;
        }
        if start > 0 {
            handle.seek(SeekFrom::Start(start)).await?;
        }
        tracing::debug!(path = %file, offset = start, "Open SFTP read");
        Ok(Box::pin(handle))
    }
}

#[async_trait]
impl Write for SftpSession {
    async fn write(&self, file: &Path, status: &TransferStatus) -> Result<WriteStream> {
        let handle = if status.append {
            let size = self.metadata(file).await?.size.unwrap_or_default();
            if size < status.offset {
                return Err(Error::interrupted(format!(
                    "{file} holds {size} bytes, cannot append at {}",
                    status.offset
                )));
            }
            let mut handle = self
                .sftp
                .open_with_flags(file.absolute(), OpenFlags::WRITE)
                .await
                .map_err(|e| SftpExceptionMappingService.map_with("Upload failed", e))?;
            handle.seek(SeekFrom::Start(status.offset)).await?;
            handle
        } else {
            self.sftp
                .open_with_flags(
                    file.absolute(),
                    OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
                )
                .await
                .map_err(|e| SftpExceptionMappingService.map_with("Upload failed", e))?
        };
        self.cache.invalidate_structure(file);
        tracing::debug!(path = %file, offset = status.offset, append = status.append, "Open SFTP write");

        let cache = self.cache.clone();
        let path = file.clone();
        Ok(Box::pin(ClosingWriteStream::new(handle, move || {
            cache.invalidate_structure(&path);
        })))
    }

    async fn append(&self, file: &Path) -> Result<Append> {
        match self.metadata(file).await {
            Ok(metadata) if metadata.is_regular() => {
                Ok(Append::existing(metadata.size.unwrap_or_default()))
            }
            Ok(_) => Ok(Append::none()),
            Err(e) if e.is_not_found() => Ok(Append::none()),
            Err(e) => Err(e),
        }
    }

    fn random_access(&self) -> bool {
        true
    }
}

#[async_trait]
impl Delete for SftpSession {
    async fn delete(&self, files: &[Path]) -> Result<()> {
        for file in files {
            if file.is_directory() {
                let below = self.walk(file).await?;
                for path in below.iter().filter(|p| !p.is_directory()) {
                    self.sftp
                        .remove_file(path.absolute())
                        .await
                        .map_err(|e| SftpExceptionMappingService.map_with("Cannot delete", e))?;
                }
                // Deepest directories first
                for path in below.iter().rev().filter(|p| p.is_directory()) {
                    self.sftp
                        .remove_dir(path.absolute())
                        .await
                        .map_err(|e| SftpExceptionMappingService.map_with("Cannot delete", e))?;
                }
                self.sftp
                    .remove_dir(file.absolute())
                    .await
                    .map_err(|e| SftpExceptionMappingService.map_with("Cannot delete", e))?;
            } else {
                self.sftp
                    .remove_file(file.absolute())
                    .await
                    .map_err(|e| SftpExceptionMappingService.map_with("Cannot delete", e))?;
            }
            tracing::debug!(path = %file, "Deleted");
            self.cache.invalidate_structure(file);
        }
        Ok(())
    }
}

#[async_trait]
impl Touch for SftpSession {
    async fn touch(&self, file: &Path) -> Result<()> {
        let exists = Find::find(self, file).await?;
        let attributes = if exists {
            let now = now();
            FileAttributes {
                atime: Some(now),
                mtime: Some(now),
                ..Default::default()
            }
        } else {
            self.sftp
                .create(file.absolute())
                .await
                .map_err(|e| SftpExceptionMappingService.map_with("Cannot create file", e))?;
            FileAttributes {
                permissions: Some(DEFAULT_FILE_MODE),
                ..Default::default()
            }
        };
        self.sftp
            .set_metadata(file.absolute(), attributes)
            .await
            .map_err(|e| SftpExceptionMappingService.map_with("Cannot create file", e))?;
        self.cache.invalidate_structure(file);
        Ok(())
    }
}

#[async_trait]
impl Find for SftpSession {
    async fn find(&self, file: &Path) -> Result<bool> {
        match self.metadata(file).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl AttributesFinder for SftpSession {
    async fn find(&self, file: &Path) -> Result<PathAttributes> {
        Ok(attributes_of(&self.metadata(file).await?))
    }
}

#[async_trait]
impl Directory for SftpSession {
    async fn mkdir(&self, folder: &Path) -> Result<Path> {
        if let Err(e) = self.sftp.create_dir(folder.absolute()).await {
            // Creating an existing directory fails with a generic status
            match self.metadata(folder).await {
                Ok(metadata) if metadata.is_dir() => {}
                _ => return Err(SftpExceptionMappingService.map_with("Cannot create folder", e)),
            }
        }
        if let Some(parent) = folder.parent() {
            self.cache.invalidate(&parent.reference());
        }
        Ok(Path::directory(folder.absolute()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_of_file() {
        let metadata = FileAttributes {
            size: Some(42),
            permissions: Some(0o100644),
            mtime: Some(1_700_000_000),
            ..Default::default()
        };
        let attributes = attributes_of(&metadata);
        assert_eq!(attributes.size, Some(42));
        assert_eq!(attributes.permission.unwrap().mode(), "644");
        assert_eq!(attributes.modified.unwrap().as_second(), 1_700_000_000);
        assert_eq!(kind_of(&metadata), PathType::File);
    }

    #[test]
    fn test_directory_has_no_size() {
        let metadata = FileAttributes {
            size: Some(4096),
            permissions: Some(0o040755),
            ..Default::default()
        };
        assert_eq!(kind_of(&metadata), PathType::Directory);
        assert_eq!(attributes_of(&metadata).size, None);
    }
}
