//! Session: one connected backend and the capabilities it exposes

use std::sync::Arc;

use async_trait::async_trait;

use crate::attributes::PathAttributes;
use crate::cache::PathCache;
use crate::error::{Error, Result};
use crate::feature::{
    self, AttributesFinder, Capabilities, Delete, Directory, Feature, FeatureKind, Find, Read,
    Touch, Write,
};
use crate::path::{AttributedList, Path};

/// Backend protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Sftp,
    Ftp,
    WebDav,
    S3,
    Swift,
    Local,
    Memory,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Protocol::Sftp => "sftp",
            Protocol::Ftp => "ftp",
            Protocol::WebDav => "webdav",
            Protocol::S3 => "s3",
            Protocol::Swift => "swift",
            Protocol::Local => "local",
            Protocol::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// Uncached directory listing against the backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ListService: Send + Sync {
    async fn list(&self, directory: &Path) -> Result<AttributedList>;
}

/// A connected and authenticated backend
///
/// Capability accessors default to absent. A backend overrides the ones it
/// supports and invalidates its [`PathCache`] after every structural change.
#[async_trait]
pub trait Session: Send + Sync {
    fn protocol(&self) -> Protocol;

    fn cache(&self) -> &PathCache;

    fn list_service(&self) -> &dyn ListService;

    fn reader(&self) -> Option<&dyn Read> {
        None
    }

    fn writer(&self) -> Option<&dyn Write> {
        None
    }

    fn deleter(&self) -> Option<&dyn Delete> {
        None
    }

    fn toucher(&self) -> Option<&dyn Touch> {
        None
    }

    fn finder(&self) -> Option<&dyn Find> {
        None
    }

    fn attributes_finder(&self) -> Option<&dyn AttributesFinder> {
        None
    }

    fn server_copy(&self) -> Option<&dyn feature::Copy> {
        None
    }

    fn directories(&self) -> Option<&dyn Directory> {
        None
    }

    /// Typed capability lookup, `None` when the backend cannot perform `kind`
    fn feature(&self, kind: FeatureKind) -> Option<Feature<'_>> {
        match kind {
            FeatureKind::Read => self.reader().map(Feature::Read),
            FeatureKind::Write => self.writer().map(Feature::Write),
            FeatureKind::Delete => self.deleter().map(Feature::Delete),
            FeatureKind::Touch => self.toucher().map(Feature::Touch),
            FeatureKind::Find => self.finder().map(Feature::Find),
            FeatureKind::AttributesFinder => self.attributes_finder().map(Feature::AttributesFinder),
            FeatureKind::Copy => self.server_copy().map(Feature::Copy),
            FeatureKind::Directory => self.directories().map(Feature::Directory),
        }
    }

    fn capabilities(&self) -> Capabilities {
        FeatureKind::ALL
            .into_iter()
            .filter(|kind| self.feature(*kind).is_some())
            .collect()
    }

    /// Children of `directory`, served from the cache when listed before
    async fn list(&self, directory: &Path) -> Result<Arc<AttributedList>> {
        let reference = directory.reference();
        self.cache()
            .get_or_fetch(&reference, || self.list_service().list(directory))
            .await
    }

    async fn exists(&self, file: &Path) -> Result<bool> {
        let Some(parent) = file.parent() else {
            return Ok(true);
        };
        if let Some(listing) = self.cache().get(&parent.reference()) {
            return Ok(listing.contains(&file.reference()));
        }
        if let Some(finder) = self.finder() {
            return finder.find(file).await;
        }
        match self.list(&parent).await {
            Ok(listing) => Ok(listing.contains(&file.reference())),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Attributes of `file` from the attribute finder, else its parent listing
    async fn attributes(&self, file: &Path) -> Result<PathAttributes> {
        if let Some(finder) = self.attributes_finder() {
            return finder.find(file).await;
        }
        let parent = file.parent().unwrap_or_else(Path::root);
        let listing = self.list(&parent).await?;
        listing
            .get(&file.reference())
            .map(|p| p.attributes().clone())
            .ok_or_else(|| Error::not_found(file.absolute()))
    }

    /// Size of `file`, looked up and stored on the path when unresolved
    async fn resolve_size(&self, file: &mut Path) -> Result<u64> {
        if let Some(size) = file.attributes().size {
            return Ok(size);
        }
        let attributes = self.attributes(file).await?;
        let size = attributes.size;
        file.set_attributes(attributes);
        size.ok_or_else(|| Error::unknown(format!("Size of {file} is unavailable")))
    }

    /// Release the connection and drop every cached listing
    async fn close(&self) -> Result<()> {
        self.cache().clear();
        Ok(())
    }
}
