//! SFTP error mapping

use russh_sftp::client::error::Error as SftpError;
use russh_sftp::protocol::StatusCode;

use ferry_core::mapping::ExceptionMappingService;
use ferry_core::{Category, Error};

/// Maps russh-sftp client failures by SFTP status code
#[derive(Debug, Clone, Copy, Default)]
pub struct SftpExceptionMappingService;

impl SftpExceptionMappingService {
    pub fn category(code: &StatusCode) -> Category {
        match code {
            StatusCode::NoSuchFile => Category::NotFound,
            StatusCode::PermissionDenied => Category::AccessDenied,
            StatusCode::NoConnection | StatusCode::ConnectionLost => Category::Connection,
            // Premature end of file while reading a range
            StatusCode::Eof => Category::Interrupted,
            StatusCode::OpUnsupported => Category::Unsupported,
            StatusCode::Ok | StatusCode::Failure | StatusCode::BadMessage => Category::Unknown,
        }
    }
}

impl ExceptionMappingService<SftpError> for SftpExceptionMappingService {
    fn map(&self, failure: SftpError) -> Error {
        let category = match &failure {
            SftpError::Status(status) => Self::category(&status.status_code),
            SftpError::Timeout | SftpError::IO(_) => Category::Connection,
            SftpError::Limited(_) => Category::Interrupted,
            _ => Category::Unknown,
        };
        Error::new(category, failure.to_string()).with_cause(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            SftpExceptionMappingService::category(&StatusCode::NoSuchFile),
            Category::NotFound
        );
        assert_eq!(
            SftpExceptionMappingService::category(&StatusCode::PermissionDenied),
            Category::AccessDenied
        );
        assert_eq!(
            SftpExceptionMappingService::category(&StatusCode::ConnectionLost),
            Category::Connection
        );
        assert_eq!(
            SftpExceptionMappingService::category(&StatusCode::OpUnsupported),
            Category::Unsupported
        );
        assert_eq!(
            SftpExceptionMappingService::category(&StatusCode::Failure),
            Category::Unknown
        );
    }

    #[test]
    fn test_transport_failures() {
        let e = SftpExceptionMappingService.map(SftpError::Timeout);
        assert_eq!(e.category(), Category::Connection);

        let e = SftpExceptionMappingService.map(SftpError::IO("channel closed".to_string()));
        assert_eq!(e.category(), Category::Connection);
        assert!(e.detail().contains("channel closed"));

        let e = SftpExceptionMappingService.map(SftpError::UnexpectedPacket);
        assert_eq!(e.category(), Category::Unknown);
        assert!(e.cause().is_some());
    }
}
