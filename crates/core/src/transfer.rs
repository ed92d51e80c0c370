//! Transfer driver
//!
//! Walks a source tree and moves it through a [`TransferPathFilter`]:
//! directories first, sequentially and in pre-order, then files on a pool
//! of workers. Every file attempt gets a freshly prepared status from the
//! filter, so a retry after a transient failure resumes from whatever the
//! filter finds at the destination.

use std::future::Future;
use std::sync::Arc;

use futures::{StreamExt, stream};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::config::{RetryConfig, TransferConfig};
use crate::error::{Error, Result};
use crate::feature::{FeatureKind, ReadStream};
use crate::filter::{PathMapping, TransferPathFilter};
use crate::io::{BandwidthThrottle, DisabledStreamListener, StreamCopier, StreamListener};
use crate::path::Path;
use crate::retry::{is_retryable_error, retry_until_canceled};
use crate::session::Session;
use crate::status::TransferStatus;

/// One source path and where it lands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    pub source: Path,
    pub destination: Path,
}

impl TransferItem {
    pub fn new(source: Path, destination: Path) -> Self {
        Self {
            source,
            destination,
        }
    }
}

/// Outcome of [`Transfer::run`]
#[derive(Debug, Default)]
pub struct TransferSummary {
    pub files: usize,
    pub directories: usize,
    /// Paths the filter declined
    pub skipped: usize,
    pub bytes: u64,
    pub failed: Vec<(Path, Error)>,
}

impl TransferSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Outcome {
    Done(u64),
    Skipped,
}

pub struct Transfer {
    source: Arc<dyn Session>,
    destination: Arc<dyn Session>,
    roots: Vec<TransferItem>,
    same_session: bool,
    config: TransferConfig,
    retry: RetryConfig,
    throttle: BandwidthThrottle,
    listener: Arc<dyn StreamListener>,
    cancel: CancellationToken,
    /// Directories `expand` could not list, reported by the next `run`
    unlisted: Mutex<Vec<(Path, Error)>>,
}

impl Transfer {
    pub fn new(
        source: Arc<dyn Session>,
        destination: Arc<dyn Session>,
        roots: Vec<TransferItem>,
    ) -> Self {
        Self {
            source,
            destination,
            roots,
            same_session: false,
            config: TransferConfig::default(),
            retry: RetryConfig::default(),
            throttle: BandwidthThrottle::unlimited(),
            listener: Arc::new(DisabledStreamListener),
            cancel: CancellationToken::new(),
            unlisted: Mutex::new(Vec::new()),
        }
    }

    /// Copy within one session, using its server-side copy when available
    pub fn duplicate(session: Arc<dyn Session>, roots: Vec<TransferItem>) -> Self {
        let mut transfer = Self::new(session.clone(), session, roots);
        transfer.same_session = true;
        transfer
    }

    /// Apply transfer tuning, including a fresh throttle for its bandwidth limit
    pub fn with_config(mut self, config: TransferConfig) -> Self {
        self.throttle = BandwidthThrottle::new(config.bandwidth_limit);
        self.config = config;
        self
    }

    /// Share an existing throttle with other transfers
    pub fn with_throttle(mut self, throttle: BandwidthThrottle) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn StreamListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Token that aborts the whole transfer when canceled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn check_canceled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::canceled());
        }
        Ok(())
    }

    /// Await a backend call unless the transfer is canceled first
    async fn guard<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::canceled()),
            result = call => result,
        }
    }

    /// Every path below the roots in pre-order, symlinks left out
    ///
    /// A directory that cannot be listed is left out together with everything
    /// below it and reported as failed by the next [`Transfer::run`].
    pub async fn expand(&self) -> Result<Vec<TransferItem>> {
        let mut items = Vec::new();
        let mut pending: Vec<TransferItem> = self.roots.iter().rev().cloned().collect();
        while let Some(item) = pending.pop() {
            self.check_canceled()?;
            if item.source.is_symlink() {
                continue;
            }
            if !item.source.is_directory() {
                items.push(item);
                continue;
            }
            let listing = match self.guard(self.source.list(&item.source)).await {
                Ok(listing) => listing,
                Err(e) if e.is_canceled() => return Err(e),
                Err(e) => {
                    tracing::warn!(path = %item.source, error = %e, "Cannot list directory");
                    self.unlisted.lock().push((item.source, e));
                    continue;
                }
            };
            let children: Vec<TransferItem> = listing
                .iter()
                .filter(|child| !child.is_symlink())
                .map(|child| TransferItem {
                    destination: item.destination.child(child.name(), child.kind()),
                    source: child.clone(),
                })
                .collect();
            items.push(item);
            pending.extend(children.into_iter().rev());
        }
        tracing::debug!(items = items.len(), "Expanded transfer roots");
        Ok(items)
    }

    /// Source to destination mapping for constructing a filter
    pub fn files(items: &[TransferItem]) -> PathMapping {
        items
            .iter()
            .map(|item| (item.source.clone(), item.destination.clone()))
            .collect()
    }

    pub async fn run(
        &self,
        filter: &dyn TransferPathFilter,
        items: Vec<TransferItem>,
    ) -> Result<TransferSummary> {
        let (directories, files): (Vec<_>, Vec<_>) =
            items.into_iter().partition(|item| item.source.is_directory());
        let mut summary = TransferSummary {
            failed: std::mem::take(&mut *self.unlisted.lock()),
            ..Default::default()
        };

        for item in directories {
            self.check_canceled()?;
            match self.directory(filter, &item).await {
                Ok(Outcome::Done(_)) => summary.directories += 1,
                Ok(Outcome::Skipped) => summary.skipped += 1,
                Err(e) if e.is_canceled() => return Err(e),
                Err(e) => {
                    tracing::warn!(path = %item.source, error = %e, "Directory failed");
                    summary.failed.push((item.source, e));
                }
            }
        }

        let outcomes: Vec<(TransferItem, Result<Outcome>)> = stream::iter(files)
            .map(|item| async move {
                let result = retry_until_canceled(
                    &self.retry,
                    &self.cancel,
                    || self.file(filter, &item),
                    is_retryable_error,
                )
                .await;
                (item, result)
            })
            .buffer_unordered(self.config.workers())
            .collect()
            .await;

        self.check_canceled()?;
        for (item, result) in outcomes {
            match result {
                Ok(Outcome::Done(bytes)) => {
                    summary.files += 1;
                    summary.bytes += bytes;
                }
                Ok(Outcome::Skipped) => summary.skipped += 1,
                Err(e) if e.is_canceled() => return Err(e),
                Err(e) => {
                    tracing::warn!(path = %item.source, error = %e, "File failed");
                    summary.failed.push((item.source, e));
                }
            }
        }

        tracing::info!(
            files = summary.files,
            directories = summary.directories,
            skipped = summary.skipped,
            failed = summary.failed.len(),
            size = %humansize::format_size(summary.bytes, humansize::DECIMAL),
            "Transfer finished"
        );
        Ok(summary)
    }

    async fn directory(&self, filter: &dyn TransferPathFilter, item: &TransferItem) -> Result<Outcome> {
        let mut source = item.source.clone();
        if !self.guard(filter.accept(&source)).await? {
            return Ok(Outcome::Skipped);
        }
        let mut status = self.guard(filter.prepare(&mut source)).await?;
        let directories = self
            .destination
            .directories()
            .ok_or_else(|| Error::unsupported(FeatureKind::Directory))?;
        self.guard(directories.mkdir(&item.destination)).await?;
        filter.complete(&source, &mut status);
        Ok(Outcome::Done(0))
    }

    async fn file(&self, filter: &dyn TransferPathFilter, item: &TransferItem) -> Result<Outcome> {
        let mut source = item.source.clone();
        if !self.guard(filter.accept(&source)).await? {
            return Ok(Outcome::Skipped);
        }
        let mut status = self
            .guard(filter.prepare(&mut source))
            .await?
            .with_cancel_token(self.cancel.child_token());
        let target = status
            .rename
            .clone()
            .unwrap_or_else(|| item.destination.clone());

        let bytes = match self.destination.server_copy() {
            Some(copy) if self.same_session => {
                tokio::select! {
                    _ = status.cancelled() => return Err(Error::canceled()),
                    result = copy.copy(&source, &target, &status) => result?,
                }
                let size = source.attributes().size.unwrap_or_default();
                status.add_transferred(size);
                size
            }
            _ => self.stream(&source, &target, &status).await?,
        };
        filter.complete(&source, &mut status);
        Ok(Outcome::Done(bytes))
    }

    async fn stream(&self, source: &Path, target: &Path, status: &TransferStatus) -> Result<u64> {
        let reader = self
            .source
            .reader()
            .ok_or_else(|| Error::unsupported(FeatureKind::Read))?;
        let writer = self
            .destination
            .writer()
            .ok_or_else(|| Error::unsupported(FeatureKind::Write))?;
        // The status length may carry a cost model, the byte count comes from the size
        let size = source.attributes().size.unwrap_or_default();
        let limit = size.saturating_sub(status.read_position());
        let range = status.clone().length(limit);

        let mut input: ReadStream = if status.read_position() == size {
            // Nothing left to read, the destination is still opened to create or commit it
            Box::pin(tokio::io::empty())
        } else {
            self.guard(reader.read(source, &range)).await?
        };
        let mut output = self.guard(writer.write(target, &range)).await?;
        let copied = StreamCopier::new(&range, self.listener.as_ref())
            .with_limit(limit)
            .with_throttle(self.throttle.clone())
            .with_chunk_size(self.config.chunk_size)
            .transfer(&mut input, &mut output)
            .await?;
        tokio::select! {
            biased;
            _ = range.cancelled() => return Err(Error::canceled()),
            result = output.shutdown() => result?,
        }
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::CopyTransferFilter;
    use crate::memory::{MemorySession, WriteMode};

    #[tokio::test]
    async fn test_expand_pre_order() {
        let source = Arc::new(MemorySession::new(WriteMode::RandomAccess));
        source.insert_file("/src/a/one.txt", b"1".to_vec());
        source.insert_file("/src/b.txt", b"22".to_vec());
        let destination = Arc::new(MemorySession::new(WriteMode::RandomAccess));
        let transfer = Transfer::new(
            source,
            destination,
            vec![TransferItem::new(Path::directory("/src"), Path::directory("/dst"))],
        );

        let items = transfer.expand().await.unwrap();
        let sources: Vec<&str> = items.iter().map(|i| i.source.absolute()).collect();
        assert_eq!(sources, ["/src", "/src/a", "/src/a/one.txt", "/src/b.txt"]);
        assert_eq!(items[2].destination.absolute(), "/dst/a/one.txt");
        assert!(items[2].destination.is_file());
    }

    #[tokio::test]
    async fn test_run_copies_tree() {
        let source = Arc::new(MemorySession::new(WriteMode::RandomAccess));
        source.insert_file("/src/a/one.txt", b"1".to_vec());
        source.insert_file("/src/b.txt", b"22".to_vec());
        source.insert_file("/src/empty", Vec::new());
        let destination = Arc::new(MemorySession::new(WriteMode::WholeObject));
        let transfer = Transfer::new(
            source.clone(),
            destination.clone(),
            vec![TransferItem::new(Path::directory("/src"), Path::directory("/dst"))],
        );

        let items = transfer.expand().await.unwrap();
        let filter = CopyTransferFilter::new(source, destination.clone(), Transfer::files(&items));
        let summary = transfer.run(&filter, items).await.unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.directories, 2);
        assert_eq!(summary.files, 3);
        assert_eq!(summary.bytes, 3);
        assert_eq!(destination.contents("/dst/a/one.txt").unwrap(), b"1");
        assert_eq!(destination.contents("/dst/b.txt").unwrap(), b"22");
        assert_eq!(destination.contents("/dst/empty").unwrap(), b"");
    }

    #[tokio::test]
    async fn test_missing_source_recorded_as_failure() {
        let source = Arc::new(MemorySession::new(WriteMode::RandomAccess));
        source.insert_file("/src/present", b"x".to_vec());
        let destination = Arc::new(MemorySession::new(WriteMode::RandomAccess));
        destination.insert_directory("/dst");
        let items = vec![
            TransferItem::new(Path::file("/src/present"), Path::file("/dst/present")),
            TransferItem::new(Path::file("/src/gone"), Path::file("/dst/gone")),
        ];
        let filter = CopyTransferFilter::new(source.clone(), destination.clone(), Transfer::files(&items));
        let transfer = Transfer::new(source, destination.clone(), Vec::new());

        let summary = transfer.run(&filter, items).await.unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0.absolute(), "/src/gone");
        assert!(summary.failed[0].1.is_not_found());
        assert_eq!(destination.contents("/dst/present").unwrap(), b"x");
    }
}
