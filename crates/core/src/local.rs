//! Local filesystem backend rooted at a directory

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use jiff::Timestamp;
use tokio::io::AsyncSeekExt;

use crate::attributes::{DEFAULT_FILE_MODE, PathAttributes, Permission};
use crate::cache::PathCache;
use crate::error::{Error, Result};
use crate::feature::{
    self, Append, AttributesFinder, Delete, Directory, Find, Read, ReadStream, Touch, Write,
    WriteStream,
};
use crate::io::ClosingWriteStream;
use crate::path::{AttributedList, Path, PathType};
use crate::session::{ListService, Protocol, Session};
use crate::status::TransferStatus;

fn resolve(root: &std::path::Path, path: &Path) -> PathBuf {
    root.join(path.absolute().trim_start_matches('/'))
}

fn kind_of(file_type: std::fs::FileType) -> PathType {
    if file_type.is_symlink() {
        PathType::Symlink
    } else if file_type.is_dir() {
        PathType::Directory
    } else {
        PathType::File
    }
}

#[cfg(unix)]
fn permission_of(metadata: &std::fs::Metadata) -> Permission {
    use std::os::unix::fs::PermissionsExt;
    Permission::new(metadata.permissions().mode())
}

#[cfg(not(unix))]
fn permission_of(metadata: &std::fs::Metadata) -> Permission {
    if metadata.permissions().readonly() {
        Permission::new(0o444)
    } else {
        Permission::new(DEFAULT_FILE_MODE)
    }
}

fn attributes_of(metadata: &std::fs::Metadata) -> PathAttributes {
    PathAttributes {
        size: metadata.is_file().then(|| metadata.len()),
        modified: metadata
            .modified()
            .ok()
            .and_then(|t| Timestamp::try_from(t).ok()),
        permission: Some(permission_of(metadata)),
        ..Default::default()
    }
}

struct LocalLister {
    root: PathBuf,
}

#[async_trait]
impl ListService for LocalLister {
    async fn list(&self, directory: &Path) -> Result<AttributedList> {
        let mut entries = tokio::fs::read_dir(resolve(&self.root, directory)).await?;
        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = entry.metadata().await?;
            let kind = kind_of(entry.file_type().await?);
            items.push(directory.child(&name, kind).with_attributes(attributes_of(&metadata)));
        }
        items.sort_by(|a, b| a.absolute().cmp(b.absolute()));
        tracing::debug!(directory = %directory, entries = items.len(), "Listed local directory");
        Ok(AttributedList::new(items))
    }
}

/// Files below a local root directory, addressed as `/`-rooted paths
pub struct LocalSession {
    root: PathBuf,
    cache: Arc<PathCache>,
    lister: LocalLister,
}

impl LocalSession {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            lister: LocalLister { root: root.clone() },
            root,
            cache: Arc::new(PathCache::new()),
        }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Local filesystem location of `path`
    pub fn resolve(&self, path: &Path) -> PathBuf {
        resolve(&self.root, path)
    }
}

#[async_trait]
impl Session for LocalSession {
    fn protocol(&self) -> Protocol {
        Protocol::Local
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

    fn server_copy(&self) -> Option<&dyn feature::Copy> {
        Some(self)
    }

    fn directories(&self) -> Option<&dyn Directory> {
        Some(self)
    }
}

#[async_trait]
impl Read for LocalSession {
    async fn read(&self, file: &Path, status: &TransferStatus) -> Result<ReadStream> {
        let mut handle = tokio::fs::File::open(self.resolve(file)).await?;
        let size = handle.metadata().await?.len();
        let start = status.check_range(file, size)?;
        if start > 0 {
            handle.seek(SeekFrom::Start(start)).await?;
        }
        Ok(Box::pin(handle))
    }
}

#[async_trait]
impl Write for LocalSession {
    async fn write(&self, file: &Path, status: &TransferStatus) -> Result<WriteStream> {
        let target = self.resolve(file);
        let handle = if status.append {
            let mut handle = tokio::fs::OpenOptions::new().write(true).open(&target).await?;
            let size = handle.metadata().await?.len();
            if size < status.offset {
                return Err(Error::interrupted(format!(
                    "{file} holds {size} bytes, cannot append at {}",
                    status.offset
                )));
            }
            handle.seek(SeekFrom::Start(status.offset)).await?;
            handle
        } else {
            tokio::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&target)
                .await?
        };
        self.cache.invalidate_structure(file);

        let cache = self.cache.clone();
        let path = file.clone();
        Ok(Box::pin(ClosingWriteStream::new(handle, move || {
            cache.invalidate_structure(&path);
        })))
    }

    async fn append(&self, file: &Path) -> Result<Append> {
        match tokio::fs::metadata(self.resolve(file)).await {
            Ok(metadata) if metadata.is_file() => Ok(Append::existing(metadata.len())),
            Ok(_) => Ok(Append::none()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Append::none()),
            Err(e) => Err(e.into()),
        }
    }

    fn random_access(&self) -> bool {
        true
    }
}

#[async_trait]
impl Delete for LocalSession {
    async fn delete(&self, files: &[Path]) -> Result<()> {
        for file in files {
            let target = self.resolve(file);
            if tokio::fs::symlink_metadata(&target).await?.is_dir() {
                tokio::fs::remove_dir_all(&target).await?;
            } else {
                tokio::fs::remove_file(&target).await?;
            }
            self.cache.invalidate_structure(file);
        }
        Ok(())
    }
}

#[async_trait]
impl Touch for LocalSession {
    async fn touch(&self, file: &Path) -> Result<()> {
        let target = self.resolve(file);
        if tokio::fs::try_exists(&target).await? {
            let handle = tokio::fs::OpenOptions::new().write(true).open(&target).await?;
            handle.into_std().await.set_modified(SystemTime::now())?;
        } else {
            tokio::fs::File::create(&target).await?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                tokio::fs::set_permissions(
                    &target,
                    std::fs::Permissions::from_mode(DEFAULT_FILE_MODE),
                )
                .await?;
            }
        }
        self.cache.invalidate_structure(file);
        Ok(())
    }
}

#[async_trait]
impl Find for LocalSession {
    async fn find(&self, file: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resolve(file)).await?)
    }
}

#[async_trait]
impl AttributesFinder for LocalSession {
    async fn find(&self, file: &Path) -> Result<PathAttributes> {
        let metadata = tokio::fs::metadata(self.resolve(file)).await?;
        Ok(attributes_of(&metadata))
    }
}

#[async_trait]
impl feature::Copy for LocalSession {
    async fn copy(&self, source: &Path, target: &Path, _status: &TransferStatus) -> Result<()> {
        tokio::fs::copy(self.resolve(source), self.resolve(target)).await?;
        self.cache.invalidate_structure(target);
        Ok(())
    }
}

#[async_trait]
impl Directory for LocalSession {
    async fn mkdir(&self, folder: &Path) -> Result<Path> {
        let target = self.resolve(folder);
        match tokio::fs::create_dir(&target).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && target.is_dir() => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = folder.parent() {
            self.cache.invalidate(&parent.reference());
        }
        let metadata = tokio::fs::metadata(&target).await?;
        Ok(Path::directory(folder.absolute()).with_attributes(attributes_of(&metadata)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_list_and_attributes() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let session = LocalSession::new(dir.path());

        let listing = session.list(&Path::root()).await.unwrap();
        assert_eq!(listing.len(), 2);
        let file = listing.find_by_name("a.txt").unwrap();
        assert!(file.is_file());
        assert_eq!(file.attributes().size, Some(5));
        assert!(listing.find_by_name("sub").unwrap().is_directory());
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_found() {
        let dir = TempDir::new().unwrap();
        let session = LocalSession::new(dir.path());
        let e = session.list(&Path::directory("/nope")).await.unwrap_err();
        assert!(e.is_not_found());
    }

    #[tokio::test]
    async fn test_ranged_write_and_read() {
        let dir = TempDir::new().unwrap();
        let session = LocalSession::new(dir.path());
        let file = Path::file("/data.bin");
        let writer = session.writer().unwrap();

        let mut out = writer.write(&file, &TransferStatus::new()).await.unwrap();
        out.write_all(b"abc").await.unwrap();
        out.shutdown().await.unwrap();

        let status = TransferStatus::new().append(true).offset(3);
        let mut out = writer.write(&file, &status).await.unwrap();
        out.write_all(b"def").await.unwrap();
        out.shutdown().await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("data.bin")).unwrap(), b"abcdef");

        let mut input = session
            .reader()
            .unwrap()
            .read(&file, &TransferStatus::new().append(true).offset(2))
            .await
            .unwrap();
        let mut tail = Vec::new();
        input.read_to_end(&mut tail).await.unwrap();
        assert_eq!(tail, b"cdef");

        let past_end = TransferStatus::new().append(true).offset(2).length(5);
        assert!(session.reader().unwrap().read(&file, &past_end).await.is_err());
    }

    #[tokio::test]
    async fn test_append_check() {
        let dir = TempDir::new().unwrap();
        let session = LocalSession::new(dir.path());
        let file = Path::file("/f");
        assert_eq!(session.writer().unwrap().append(&file).await.unwrap(), Append::none());

        session.toucher().unwrap().touch(&file).await.unwrap();
        assert_eq!(session.writer().unwrap().append(&file).await.unwrap(), Append::existing(0));

        let status = TransferStatus::new().append(true).offset(4);
        assert!(session.writer().unwrap().write(&file, &status).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_touch_mode() {
        let dir = TempDir::new().unwrap();
        let session = LocalSession::new(dir.path());
        let file = Path::file("/touched");
        session.toucher().unwrap().touch(&file).await.unwrap();

        let attributes = session.attributes(&file).await.unwrap();
        assert_eq!(attributes.permission.unwrap().mode(), "644");
        assert_eq!(attributes.size, Some(0));
    }

    #[tokio::test]
    async fn test_mkdir_and_delete() {
        let dir = TempDir::new().unwrap();
        let session = LocalSession::new(dir.path());
        let folder = Path::directory("/nested");
        session.directories().unwrap().mkdir(&folder).await.unwrap();
        // Second call is a no-op
        session.directories().unwrap().mkdir(&folder).await.unwrap();
        session.toucher().unwrap().touch(&folder.child("x", PathType::File)).await.unwrap();

        assert!(session.exists(&folder).await.unwrap());
        session.deleter().unwrap().delete(&[folder.clone()]).await.unwrap();
        assert!(!dir.path().join("nested").exists());
        assert!(!session.exists(&folder).await.unwrap());
    }
}
