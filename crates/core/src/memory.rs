//! In-memory backend
//!
//! Holds a tree of files and directories behind one lock. Either write mode
//! can be selected so the same scenarios run against in-place ranged writes
//! and against whole-object replacement.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use jiff::Timestamp;
use parking_lot::Mutex;
use tokio::io::AsyncWrite;

use crate::attributes::{Checksum, DEFAULT_DIRECTORY_MODE, DEFAULT_FILE_MODE, PathAttributes, Permission};
use crate::cache::PathCache;
use crate::error::{Error, Result};
use crate::feature::{
    self, Append, AttributesFinder, Delete, Directory, Find, Read, ReadStream, Touch, Write,
    WriteStream,
};
use crate::io::{BufferedWriteStream, splice};
use crate::mapping::into_io_error;
use crate::path::{AttributedList, Path, PathType};
use crate::session::{ListService, Protocol, Session};
use crate::status::TransferStatus;

/// How a [`MemorySession`] applies writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Bytes land as they are written, partial writes persist
    RandomAccess,
    /// Bytes are buffered and spliced into a new version on close
    WholeObject,
}

struct Node {
    kind: PathType,
    data: Vec<u8>,
    modified: Timestamp,
    permission: Permission,
    version: u64,
}

impl Node {
    fn file(data: Vec<u8>, version: u64) -> Self {
        Self {
            kind: PathType::File,
            data,
            modified: Timestamp::now(),
            permission: Permission::new(DEFAULT_FILE_MODE),
            version,
        }
    }

    fn directory(version: u64) -> Self {
        Self {
            kind: PathType::Directory,
            data: Vec::new(),
            modified: Timestamp::now(),
            permission: Permission::new(DEFAULT_DIRECTORY_MODE),
            version,
        }
    }

    fn attributes(&self) -> PathAttributes {
        let mut attributes = PathAttributes {
            modified: Some(self.modified),
            permission: Some(self.permission),
            ..Default::default()
        };
        if self.kind == PathType::File {
            attributes.size = Some(self.data.len() as u64);
            attributes.etag = Some(format!("{:x}", self.version));
            attributes.checksum = Some(Checksum::sha256(&self.data));
        }
        attributes
    }
}

struct Tree {
    nodes: BTreeMap<String, Node>,
    version: u64,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::directory(0));
        Self { nodes, version: 0 }
    }

    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn require_parent(&self, path: &Path) -> Result<()> {
        let parent = path.parent().unwrap_or_else(Path::root);
        match self.nodes.get(parent.absolute()) {
            Some(node) if node.kind == PathType::Directory => Ok(()),
            _ => Err(Error::not_found(parent.absolute())),
        }
    }

    fn file(&self, path: &Path) -> Result<&Node> {
        match self.nodes.get(path.absolute()) {
            Some(node) if node.kind == PathType::File => Ok(node),
            Some(_) => Err(Error::unknown(format!("{path} is not a file"))),
            None => Err(Error::not_found(path.absolute())),
        }
    }

    fn file_mut(&mut self, path: &Path) -> Result<&mut Node> {
        match self.nodes.get_mut(path.absolute()) {
            Some(node) if node.kind == PathType::File => Ok(node),
            Some(_) => Err(Error::unknown(format!("{path} is not a file"))),
            None => Err(Error::not_found(path.absolute())),
        }
    }

    /// Create or replace a file's content as a new version
    fn replace(&mut self, path: &Path, data: Vec<u8>) -> Result<()> {
        self.require_parent(path)?;
        if let Some(node) = self.nodes.get(path.absolute())
            && node.kind != PathType::File
        {
            return Err(Error::unknown(format!("{path} is not a file")));
        }
        let version = self.next_version();
        let permission = self
            .nodes
            .get(path.absolute())
            .map(|n| n.permission)
            .unwrap_or(Permission::new(DEFAULT_FILE_MODE));
        let mut node = Node::file(data, version);
        node.permission = permission;
        self.nodes.insert(path.absolute().to_string(), node);
        Ok(())
    }

    fn make_dirs(&mut self, path: &Path) {
        let mut missing = Vec::new();
        let mut current = Some(path.clone());
        while let Some(dir) = current {
            if self.nodes.contains_key(dir.absolute()) {
                break;
            }
            current = dir.parent();
            missing.push(dir);
        }
        for dir in missing.into_iter().rev() {
            let version = self.next_version();
            self.nodes
                .insert(dir.absolute().to_string(), Node::directory(version));
        }
    }

    fn children(&self, directory: &Path) -> Result<AttributedList> {
        match self.nodes.get(directory.absolute()) {
            Some(node) if node.kind == PathType::Directory => {}
            Some(_) => return Err(Error::unknown(format!("{directory} is not a directory"))),
            None => return Err(Error::not_found(directory.absolute())),
        }
        Ok(self
            .nodes
            .iter()
            .filter(|(key, _)| key.as_str() != "/")
            .map(|(key, node)| (Path::new(key, node.kind), node))
            .filter(|(path, _)| path.parent().as_ref() == Some(directory))
            .map(|(path, node)| path.with_attributes(node.attributes()))
            .collect())
    }

    fn remove(&mut self, path: &Path) -> Result<()> {
        if self.nodes.remove(path.absolute()).is_none() {
            return Err(Error::not_found(path.absolute()));
        }
        let prefix = format!("{}/", path.absolute());
        self.nodes.retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }
}

struct MemoryLister {
    tree: Arc<Mutex<Tree>>,
    calls: AtomicUsize,
    latency: Duration,
}

#[async_trait]
impl ListService for MemoryLister {
    async fn list(&self, directory: &Path) -> Result<AttributedList> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tree.lock().children(directory)
    }
}

/// Backend keeping everything in process memory
pub struct MemorySession {
    tree: Arc<Mutex<Tree>>,
    cache: Arc<PathCache>,
    lister: MemoryLister,
    mode: WriteMode,
    server_copy: bool,
}

impl MemorySession {
    pub fn new(mode: WriteMode) -> Self {
        let tree = Arc::new(Mutex::new(Tree::new()));
        Self {
            lister: MemoryLister {
                tree: tree.clone(),
                calls: AtomicUsize::new(0),
                latency: Duration::ZERO,
            },
            tree,
            cache: Arc::new(PathCache::new()),
            mode,
            server_copy: true,
        }
    }

    /// Delay every listing round trip by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.lister.latency = latency;
        self
    }

    /// Drop the server-side copy capability
    pub fn without_server_copy(mut self) -> Self {
        self.server_copy = false;
        self
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Listing round trips made so far
    pub fn list_calls(&self) -> usize {
        self.lister.calls.load(Ordering::SeqCst)
    }

    /// Create `absolute` with `data`, creating parent directories as needed
    pub fn insert_file(&self, absolute: &str, data: impl Into<Vec<u8>>) {
        let path = Path::file(absolute);
        {
            let mut tree = self.tree.lock();
            if let Some(parent) = path.parent() {
                tree.make_dirs(&parent);
            }
            let version = tree.next_version();
            tree.nodes
                .insert(path.absolute().to_string(), Node::file(data.into(), version));
        }
        self.cache.invalidate_structure(&path);
    }

    pub fn insert_directory(&self, absolute: &str) {
        let path = Path::directory(absolute);
        self.tree.lock().make_dirs(&path);
        self.cache.invalidate_structure(&path);
    }

    /// Current content of a file
    pub fn contents(&self, absolute: &str) -> Option<Vec<u8>> {
        let path = Path::file(absolute);
        self.tree.lock().file(&path).ok().map(|n| n.data.clone())
    }
}

#[async_trait]
impl Session for MemorySession {
    fn protocol(&self) -> Protocol {
        Protocol::Memory
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
        if self.server_copy { Some(self) } else { None }
    }

    fn directories(&self) -> Option<&dyn Directory> {
        Some(self)
    }
}

#[async_trait]
impl Read for MemorySession {
    async fn read(&self, file: &Path, status: &TransferStatus) -> Result<ReadStream> {
        let mut data = self.tree.lock().file(file)?.data.clone();
        let start = status.check_range(file, data.len() as u64)?;
        let tail = data.split_off(start as usize);
        tracing::debug!(path = %file, offset = start, "Open memory read");
        Ok(Box::pin(Cursor::new(tail)))
    }
}

/// Writes through to the tree at an advancing position
struct RangeWriter {
    tree: Arc<Mutex<Tree>>,
    cache: Arc<PathCache>,
    path: Path,
    position: usize,
}

impl AsyncWrite for RangeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let mut tree = this.tree.lock();
        let version = tree.next_version();
        let node = match tree.file_mut(&this.path) {
            Ok(node) => node,
            Err(e) => return Poll::Ready(Err(into_io_error(e))),
        };
        let end = this.position + buf.len();
        if node.data.len() < end {
            node.data.resize(end, 0);
        }
        node.data[this.position..end].copy_from_slice(buf);
        node.version = version;
        node.modified = Timestamp::now();
        this.position = end;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.cache.invalidate_structure(&self.path);
        Poll::Ready(Ok(()))
    }
}

fn commit_whole_object(
    tree: &Mutex<Tree>,
    path: &Path,
    append: bool,
    position: usize,
    bytes: Vec<u8>,
) -> Result<()> {
    let mut tree = tree.lock();
    let data = if append {
        let existing = &tree.file(path)?.data;
        if existing.len() < position {
            return Err(Error::interrupted(format!(
                "{path} holds {} bytes, cannot append at {position}",
                existing.len()
            )));
        }
        splice(existing, position, &bytes)
    } else {
        bytes
    };
    tree.replace(path, data)
}

#[async_trait]
impl Write for MemorySession {
    async fn write(&self, file: &Path, status: &TransferStatus) -> Result<WriteStream> {
        let position = status.write_position() as usize;
        {
            let mut tree = self.tree.lock();
            tree.require_parent(file)?;
            if status.append {
                let size = tree.file(file)?.data.len();
                if size < position {
                    return Err(Error::interrupted(format!(
                        "{file} holds {size} bytes, cannot append at {position}"
                    )));
                }
            } else if self.mode == WriteMode::RandomAccess {
                tree.replace(file, Vec::new())?;
            }
        }
        tracing::debug!(path = %file, offset = position, append = status.append, "Open memory write");

        match self.mode {
            WriteMode::RandomAccess => {
                self.cache.invalidate_structure(file);
                Ok(Box::pin(RangeWriter {
                    tree: self.tree.clone(),
                    cache: self.cache.clone(),
                    path: file.clone(),
                    position,
                }))
            }
            WriteMode::WholeObject => {
                let tree = self.tree.clone();
                let cache = self.cache.clone();
                let path = file.clone();
                let append = status.append;
                Ok(Box::pin(BufferedWriteStream::new(Box::new(move |bytes: Vec<u8>| {
                    async move {
                        commit_whole_object(&tree, &path, append, position, bytes)?;
                        cache.invalidate_structure(&path);
                        Ok::<_, Error>(())
                    }
                    .boxed()
                }))))
            }
        }
    }

    async fn append(&self, file: &Path) -> Result<Append> {
        let tree = self.tree.lock();
        Ok(match tree.file(file) {
            Ok(node) => Append::existing(node.data.len() as u64),
            Err(_) => Append::none(),
        })
    }

    fn random_access(&self) -> bool {
        self.mode == WriteMode::RandomAccess
    }
}

#[async_trait]
impl Delete for MemorySession {
    async fn delete(&self, files: &[Path]) -> Result<()> {
        for file in files {
            self.tree.lock().remove(file)?;
            self.cache.invalidate_structure(file);
            tracing::debug!(path = %file, "Deleted");
        }
        Ok(())
    }
}

#[async_trait]
impl Touch for MemorySession {
    async fn touch(&self, file: &Path) -> Result<()> {
        {
            let mut tree = self.tree.lock();
            tree.require_parent(file)?;
            let version = tree.next_version();
            match tree.nodes.get_mut(file.absolute()) {
                Some(node) => node.modified = Timestamp::now(),
                None => {
                    tree.nodes
                        .insert(file.absolute().to_string(), Node::file(Vec::new(), version));
                }
            }
        }
        self.cache.invalidate_structure(file);
        Ok(())
    }
}

#[async_trait]
impl Find for MemorySession {
    async fn find(&self, file: &Path) -> Result<bool> {
        Ok(self.tree.lock().nodes.contains_key(file.absolute()))
    }
}

#[async_trait]
impl AttributesFinder for MemorySession {
    async fn find(&self, file: &Path) -> Result<PathAttributes> {
        self.tree
            .lock()
            .nodes
            .get(file.absolute())
            .map(Node::attributes)
            .ok_or_else(|| Error::not_found(file.absolute()))
    }
}

#[async_trait]
impl feature::Copy for MemorySession {
    async fn copy(&self, source: &Path, target: &Path, _status: &TransferStatus) -> Result<()> {
        {
            let mut tree = self.tree.lock();
            let data = tree.file(source)?.data.clone();
            tree.replace(target, data)?;
        }
        self.cache.invalidate_structure(target);
        Ok(())
    }
}

#[async_trait]
impl Directory for MemorySession {
    async fn mkdir(&self, folder: &Path) -> Result<Path> {
        let attributes = {
            let mut tree = self.tree.lock();
            tree.require_parent(folder)?;
            match tree.nodes.get(folder.absolute()) {
                Some(node) if node.kind == PathType::Directory => node.attributes(),
                Some(_) => return Err(Error::unknown(format!("{folder} exists as a file"))),
                None => {
                    let version = tree.next_version();
                    let node = Node::directory(version);
                    let attributes = node.attributes();
                    tree.nodes.insert(folder.absolute().to_string(), node);
                    attributes
                }
            }
        };
        // The new folder's own listing, if seeded, stays valid
        if let Some(parent) = folder.parent() {
            self.cache.invalidate(&parent.reference());
        }
        Ok(Path::directory(folder.absolute()).with_attributes(attributes))
    }
}
