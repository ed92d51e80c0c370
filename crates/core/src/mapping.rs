//! Exception mapping services
//!
//! Pure translations from backend-native failures into [`Error`]. Mapping is
//! total: anything without a specific rule lands in [`Category::Unknown`]
//! and keeps its original message and cause.

use std::io::ErrorKind;

use crate::error::{Category, Error};

/// Translate one kind of backend-native failure into an [`Error`]
pub trait ExceptionMappingService<E> {
    fn map(&self, failure: E) -> Error;

    /// Map and replace the message key with an operation description,
    /// e.g. "Listing directory failed"
    fn map_with(&self, message: &str, failure: E) -> Error {
        self.map(failure).with_message(message)
    }
}

/// Maps `std::io::Error`
#[derive(Debug, Clone, Copy, Default)]
pub struct IoExceptionMappingService;

impl IoExceptionMappingService {
    pub fn category(kind: ErrorKind) -> Category {
        match kind {
            ErrorKind::NotFound => Category::NotFound,
            ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem => Category::AccessDenied,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
            | ErrorKind::AddrNotAvailable
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
            | ErrorKind::NetworkDown => Category::Connection,
            ErrorKind::UnexpectedEof
            | ErrorKind::Interrupted
            | ErrorKind::StorageFull
            | ErrorKind::FileTooLarge => Category::Interrupted,
            ErrorKind::Unsupported => Category::Unsupported,
            _ => Category::Unknown,
        }
    }
}

impl ExceptionMappingService<std::io::Error> for IoExceptionMappingService {
    fn map(&self, failure: std::io::Error) -> Error {
        // Already mapped once, typically by a write stream commit
        if let Some(mapped) = failure
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<Error>())
        {
            return mapped.clone();
        }
        let category = Self::category(failure.kind());
        Error::new(category, failure.to_string()).with_cause(failure)
    }
}

/// Embed an already-mapped error in an `std::io::Error` for `AsyncWrite`
pub fn into_io_error(error: Error) -> std::io::Error {
    std::io::Error::other(error)
}

/// HTTP response status as seen by WebDAV, Swift and S3 style backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    pub status: u16,
    pub reason: String,
}

impl HttpFailure {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status, self.reason)
    }
}

impl std::error::Error for HttpFailure {}

/// Maps HTTP status codes
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpExceptionMappingService;

impl HttpExceptionMappingService {
    pub fn category(status: u16) -> Category {
        match status {
            404 | 410 => Category::NotFound,
            401 | 403 | 407 => Category::AccessDenied,
            408 | 429 | 500 | 502 | 503 | 504 => Category::Connection,
            // Payload too large, insufficient storage, bandwidth exceeded
            413 | 507 | 509 => Category::Interrupted,
            405 | 501 => Category::Unsupported,
            _ => Category::Unknown,
        }
    }
}

impl ExceptionMappingService<HttpFailure> for HttpExceptionMappingService {
    fn map(&self, failure: HttpFailure) -> Error {
        Error::new(Self::category(failure.status), failure.to_string()).with_cause(failure)
    }
}

/// FTP reply, e.g. `550 No such file or directory`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpReply {
    pub code: u16,
    pub text: String,
}

impl FtpReply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }
}

impl std::fmt::Display for FtpReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}

impl std::error::Error for FtpReply {}

/// Maps FTP reply codes
#[derive(Debug, Clone, Copy, Default)]
pub struct FtpExceptionMappingService;

impl FtpExceptionMappingService {
    pub fn category(code: u16) -> Category {
        match code {
            450 | 550 => Category::NotFound,
            530 | 532 | 553 => Category::AccessDenied,
            421 | 425 | 426 => Category::Connection,
            451 | 452 | 552 => Category::Interrupted,
            202 | 502 | 504 => Category::Unsupported,
            _ => Category::Unknown,
        }
    }
}

impl ExceptionMappingService<FtpReply> for FtpExceptionMappingService {
    fn map(&self, failure: FtpReply) -> Error {
        Error::new(Self::category(failure.code), failure.to_string()).with_cause(failure)
    }
}
