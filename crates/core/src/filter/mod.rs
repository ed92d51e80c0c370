//! Transfer path filters
//!
//! A filter decides per path whether the transfer acts on it and with which
//! byte range. The driver calls `accept`, then `prepare`, then moves the
//! bytes, then calls `complete`, once per path per attempt.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::path::{AttributedList, Path};
use crate::session::Session;
use crate::status::TransferStatus;

pub mod action;
pub mod copy;
pub mod download;
pub mod duplicate;
pub mod sync;
pub mod upload;

pub use action::ActionFilter;
pub use copy::CopyTransferFilter;
pub use download::DownloadFilter;
pub use duplicate::DuplicateFilter;
pub use sync::{Comparison, ComparisonService, SyncTransferFilter};
pub use upload::UploadFilter;

/// Source path to destination path
pub type PathMapping = HashMap<Path, Path>;

#[async_trait]
pub trait TransferPathFilter: Send + Sync {
    /// Whether the transfer should act on `file`
    async fn accept(&self, file: &Path) -> Result<bool>;

    /// Byte range and continuation state for this attempt
    ///
    /// May resolve attributes of `file` and store them on it.
    async fn prepare(&self, file: &mut Path) -> Result<TransferStatus>;

    /// Called once bytes are moved; repeated calls have no further effect
    fn complete(&self, file: &Path, status: &mut TransferStatus);
}

/// Progress cost charged for copying a file of a given size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CopyCost {
    /// Bytes pass the client twice, once read and once written
    #[default]
    DownloadUpload,
    /// The backend copies without the client seeing the bytes
    ServerSide,
}

impl CopyCost {
    pub fn length(&self, size: u64) -> u64 {
        match self {
            CopyCost::DownloadUpload => size.saturating_mul(2),
            CopyCost::ServerSide => size,
        }
    }
}

/// What to do with a file that already exists at the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferAction {
    #[default]
    Overwrite,
    /// Continue from the bytes already present
    Resume,
    Skip,
    /// Write next to it under the first free `name-N.ext`
    Rename,
}

impl std::fmt::Display for TransferAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransferAction::Overwrite => "overwrite",
            TransferAction::Resume => "resume",
            TransferAction::Skip => "skip",
            TransferAction::Rename => "rename",
        };
        f.write_str(name)
    }
}

pub(crate) fn destination_of<'m>(files: &'m PathMapping, source: &Path) -> Result<&'m Path> {
    files
        .get(source)
        .ok_or_else(|| Error::unknown(format!("No destination mapped for {source}")))
}

/// Seed an empty listing for a directory about to be created
///
/// Lookups below it are answered locally instead of listing a directory
/// known to be empty.
pub(crate) async fn seed_directory(destination: &dyn Session, target: &Path) -> Result<()> {
    if !destination.exists(target).await? {
        tracing::debug!(directory = %target, "Seed empty listing");
        destination
            .cache()
            .put(target.reference(), AttributedList::empty());
    }
    Ok(())
}
