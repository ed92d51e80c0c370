//! Capability traits
//!
//! A backend exposes each operation it can perform as an implementation of
//! one of these traits. Operations it cannot perform are simply absent from
//! its [`crate::Session`]; callers branch on the absence instead of catching
//! an error.

use std::collections::BTreeSet;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::attributes::PathAttributes;
use crate::error::Result;
use crate::path::Path;
use crate::status::TransferStatus;

/// Named operation a backend may or may not support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureKind {
    Read,
    Write,
    Delete,
    Touch,
    Find,
    AttributesFinder,
    /// Server-side copy without moving bytes through the client
    Copy,
    /// Directory creation
    Directory,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 8] = [
        FeatureKind::Read,
        FeatureKind::Write,
        FeatureKind::Delete,
        FeatureKind::Touch,
        FeatureKind::Find,
        FeatureKind::AttributesFinder,
        FeatureKind::Copy,
        FeatureKind::Directory,
    ];
}

impl std::fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FeatureKind::Read => "Read",
            FeatureKind::Write => "Write",
            FeatureKind::Delete => "Delete",
            FeatureKind::Touch => "Touch",
            FeatureKind::Find => "Find",
            FeatureKind::AttributesFinder => "AttributesFinder",
            FeatureKind::Copy => "Copy",
            FeatureKind::Directory => "Directory",
        };
        f.write_str(name)
    }
}

/// Set of operations supported by a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    kinds: BTreeSet<FeatureKind>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: FeatureKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    pub fn supports(&self, kind: FeatureKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = FeatureKind> + '_ {
        self.kinds.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl FromIterator<FeatureKind> for Capabilities {
    fn from_iter<I: IntoIterator<Item = FeatureKind>>(iter: I) -> Self {
        Self {
            kinds: iter.into_iter().collect(),
        }
    }
}

/// Byte stream opened by [`Read::read`]
pub type ReadStream = Pin<Box<dyn AsyncRead + Send>>;

/// Byte stream opened by [`Write::write`]
///
/// The write is committed by `shutdown()`. Dropping the stream unclosed
/// abandons it.
pub type WriteStream = Pin<Box<dyn AsyncWrite + Send>>;

/// Existing destination content a write could continue from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Append {
    /// The destination exists and can be appended to
    pub append: bool,
    /// Bytes already present
    pub size: u64,
}

impl Append {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn existing(size: u64) -> Self {
        Self { append: true, size }
    }
}

#[async_trait]
pub trait Read: Send + Sync {
    /// Open `file` for reading
    ///
    /// Starts at byte 0, or at `offset + skip` when `status.append` is set.
    /// The stream runs to the end of the object.
    async fn read(&self, file: &Path, status: &TransferStatus) -> Result<ReadStream>;
}

#[async_trait]
pub trait Write: Send + Sync {
    /// Open `file` for writing
    ///
    /// With `append = false` content is replaced from the start. With
    /// `append = true` the destination must already hold at least `offset`
    /// bytes and only the range starting at `offset` is touched.
    async fn write(&self, file: &Path, status: &TransferStatus) -> Result<WriteStream>;

    /// Whether `file` exists and how much of it is there
    async fn append(&self, file: &Path) -> Result<Append>;

    /// Whether ranged writes land in place rather than by whole-object replacement
    fn random_access(&self) -> bool;
}

#[async_trait]
pub trait Delete: Send + Sync {
    async fn delete(&self, files: &[Path]) -> Result<()>;
}

#[async_trait]
pub trait Touch: Send + Sync {
    /// Create an empty file, or update the modification time of an existing one
    async fn touch(&self, file: &Path) -> Result<()>;
}

#[async_trait]
pub trait Find: Send + Sync {
    async fn find(&self, file: &Path) -> Result<bool>;
}

#[async_trait]
pub trait AttributesFinder: Send + Sync {
    async fn find(&self, file: &Path) -> Result<PathAttributes>;
}

#[async_trait]
pub trait Copy: Send + Sync {
    async fn copy(&self, source: &Path, target: &Path, status: &TransferStatus) -> Result<()>;
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn mkdir(&self, folder: &Path) -> Result<Path>;
}

/// Typed handle returned by [`crate::Session::feature`]
#[derive(Clone, Copy)]
pub enum Feature<'a> {
    Read(&'a dyn Read),
    Write(&'a dyn Write),
    Delete(&'a dyn Delete),
    Touch(&'a dyn Touch),
    Find(&'a dyn Find),
    AttributesFinder(&'a dyn AttributesFinder),
    Copy(&'a dyn Copy),
    Directory(&'a dyn Directory),
}

impl Feature<'_> {
    pub fn kind(&self) -> FeatureKind {
        match self {
            Feature::Read(_) => FeatureKind::Read,
            Feature::Write(_) => FeatureKind::Write,
            Feature::Delete(_) => FeatureKind::Delete,
            Feature::Touch(_) => FeatureKind::Touch,
            Feature::Find(_) => FeatureKind::Find,
            Feature::AttributesFinder(_) => FeatureKind::AttributesFinder,
            Feature::Copy(_) => FeatureKind::Copy,
            Feature::Directory(_) => FeatureKind::Directory,
        }
    }
}

impl std::fmt::Debug for Feature<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Feature").field(&self.kind()).finish()
    }
}
