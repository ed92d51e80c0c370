//! ferry-s3: S3 backend for ferry
//!
//! Implements the ferry-core [`Session`](ferry_core::Session) and feature
//! traits on top of aws-sdk-s3, and maps SDK failures into the ferry error
//! taxonomy.

pub mod mapping;
pub mod session;

pub use mapping::S3ExceptionMappingService;
pub use session::{S3Config, S3Session};
