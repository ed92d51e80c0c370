//! ferry-sftp: SFTP backend for ferry
//!
//! Wraps an already authenticated russh-sftp client. Establishing the SSH
//! connection and opening the subsystem channel is left to the caller.

pub mod mapping;
pub mod session;

pub use mapping::SftpExceptionMappingService;
pub use session::SftpSession;
