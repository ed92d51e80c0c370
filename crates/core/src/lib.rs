//! ferry-core: Core library for the ferry transfer engine
//!
//! This crate provides everything a transfer needs independent of any wire
//! protocol client:
//! - Paths, attributes and the per-session listing cache
//! - Feature traits and the Session capability lookup
//! - Error taxonomy and the mapping services backends use
//! - Transfer status, stream copying and bandwidth throttling
//! - Transfer filters and the transfer driver
//! - In-memory and local filesystem backends
//!
//! Protocol backends live in their own crates and plug in by implementing
//! [`Session`] and the feature traits they support.

pub mod attributes;
pub mod cache;
pub mod config;
pub mod error;
pub mod feature;
pub mod filter;
pub mod io;
pub mod local;
pub mod mapping;
pub mod memory;
pub mod path;
pub mod retry;
pub mod session;
pub mod status;
pub mod transfer;

pub use attributes::{Checksum, HashAlgorithm, PathAttributes, Permission};
pub use cache::PathCache;
pub use config::{Config, ConfigManager, RetryConfig, TransferConfig};
pub use error::{Category, Error, Result};
pub use feature::{Append, Capabilities, Feature, FeatureKind, ReadStream, WriteStream};
pub use filter::{
    CopyCost, CopyTransferFilter, DownloadFilter, DuplicateFilter, PathMapping,
    SyncTransferFilter, TransferAction, TransferPathFilter, UploadFilter,
};
pub use io::{BandwidthThrottle, StreamCopier, StreamListener};
pub use local::LocalSession;
pub use mapping::ExceptionMappingService;
pub use memory::{MemorySession, WriteMode};
pub use path::{AttributedList, Path, PathReference, PathType};
pub use retry::{RetryBuilder, is_retryable_error, retry_with_backoff};
pub use session::{ListService, Protocol, Session};
pub use status::TransferStatus;
pub use transfer::{Transfer, TransferItem, TransferSummary};
