//! Per-attempt transfer descriptor

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::{Error, Result};
use crate::path::Path;

/// Byte range and continuation state for one path's transfer attempt
///
/// Prepared fresh by a filter for every attempt; never reused across paths.
#[derive(Debug, Clone, Default)]
pub struct TransferStatus {
    /// First byte to act on
    pub offset: u64,
    /// Bytes to transfer, not the total size of the file
    pub length: u64,
    /// Continue a prior partial transfer
    pub append: bool,
    /// Payload bytes to discard after `offset`
    ///
    /// The bundled filters resume at the exact destination size and leave this
    /// at 0. A backend whose resume point is rounded down (block or record
    /// aligned) sets it to the bytes between that point and the real offset.
    pub skip: u64,
    /// The destination already existed when the status was prepared
    pub exists: bool,
    /// Write to this path instead of the mapped destination
    pub rename: Option<Path>,
    complete: bool,
    transferred: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl TransferStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn length(mut self, length: u64) -> Self {
        self.length = length;
        self
    }

    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn exists(mut self, exists: bool) -> Self {
        self.exists = exists;
        self
    }

    pub fn rename(mut self, target: Path) -> Self {
        self.rename = Some(target);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// First byte a reader should deliver for this attempt
    pub fn read_position(&self) -> u64 {
        if self.append {
            self.offset + self.skip
        } else {
            0
        }
    }

    /// First byte to read once `[read_position, read_position + length)` is
    /// checked against the object `size`
    ///
    /// A zero length reads through to the end.
    pub fn check_range(&self, file: &Path, size: u64) -> Result<u64> {
        let start = self.read_position();
        let end = start.saturating_add(self.length);
        if end > size {
            return Err(Error::interrupted(format!(
                "Range {start}-{end} beyond size {size} of {file}"
            )));
        }
        Ok(start)
    }

    /// First byte a writer should touch for this attempt
    pub fn write_position(&self) -> u64 {
        if self.append { self.offset } else { 0 }
    }

    /// Mark the attempt done, repeated calls have no further effect
    pub fn set_complete(&mut self) {
        self.complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Bytes moved so far in this attempt
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn add_transferred(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolves once the attempt is canceled
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}
