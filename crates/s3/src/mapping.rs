//! S3 error mapping
//!
//! S3 reports failures as an error code in the response body plus the HTTP
//! status. The code is more specific and wins; the status decides otherwise.

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStreamError;
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use ferry_core::mapping::{ExceptionMappingService, HttpExceptionMappingService};
use ferry_core::{Category, Error};

/// Maps aws-sdk-s3 failures
#[derive(Debug, Clone, Copy, Default)]
pub struct S3ExceptionMappingService;

impl S3ExceptionMappingService {
    pub fn category(code: Option<&str>, status: Option<u16>) -> Category {
        match code {
            Some("NoSuchKey" | "NoSuchBucket" | "NoSuchUpload" | "NotFound" | "NoSuchVersion") => {
                Category::NotFound
            }
            Some(
                "AccessDenied"
                | "AllAccessDisabled"
                | "AccountProblem"
                | "InvalidAccessKeyId"
                | "SignatureDoesNotMatch"
                | "ExpiredToken"
                | "InvalidToken",
            ) => Category::AccessDenied,
            Some("RequestTimeout" | "SlowDown" | "ServiceUnavailable" | "InternalError") => {
                Category::Connection
            }
            Some("QuotaExceeded" | "EntityTooLarge" | "IncompleteBody" | "InvalidRange") => {
                Category::Interrupted
            }
            Some("NotImplemented" | "MethodNotAllowed") => Category::Unsupported,
            _ => status
                .map(HttpExceptionMappingService::category)
                .unwrap_or(Category::Unknown),
        }
    }

    fn detail<E>(failure: &SdkError<E, HttpResponse>) -> String
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
    {
        match failure {
            SdkError::ServiceError(service) => {
                let err = service.err();
                let mut detail = err
                    .message()
                    .map(str::to_string)
                    .unwrap_or_else(|| err.to_string());
                if let Some(code) = err.code() {
                    detail.push_str(&format!(" (code: {code})"));
                }
                detail
            }
            SdkError::TimeoutError(_) => "Request timeout".to_string(),
            SdkError::DispatchFailure(_) => {
                format!("Network dispatch error: {}", DisplayErrorContext(failure))
            }
            _ => DisplayErrorContext(failure).to_string(),
        }
    }
}

impl<E> ExceptionMappingService<SdkError<E, HttpResponse>> for S3ExceptionMappingService
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    fn map(&self, failure: SdkError<E, HttpResponse>) -> Error {
        let category = match &failure {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => Category::Connection,
            SdkError::ServiceError(service) => Self::category(
                service.err().code(),
                Some(service.raw().status().as_u16()),
            ),
            SdkError::ResponseError(response) => {
                Self::category(None, Some(response.raw().status().as_u16()))
            }
            _ => Category::Unknown,
        };
        Error::new(category, Self::detail(&failure)).with_cause(failure)
    }
}

impl ExceptionMappingService<ByteStreamError> for S3ExceptionMappingService {
    fn map(&self, failure: ByteStreamError) -> Error {
        Error::connection(format!("Reading object body failed: {failure}")).with_cause(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_wins_over_status() {
        assert_eq!(
            S3ExceptionMappingService::category(Some("NoSuchKey"), Some(404)),
            Category::NotFound
        );
        assert_eq!(
            S3ExceptionMappingService::category(Some("NoSuchBucket"), Some(400)),
            Category::NotFound
        );
        assert_eq!(
            S3ExceptionMappingService::category(Some("SignatureDoesNotMatch"), Some(400)),
            Category::AccessDenied
        );
        assert_eq!(
            S3ExceptionMappingService::category(Some("SlowDown"), Some(400)),
            Category::Connection
        );
        assert_eq!(
            S3ExceptionMappingService::category(Some("EntityTooLarge"), Some(400)),
            Category::Interrupted
        );
    }

    #[test]
    fn test_status_fallback() {
        // HEAD responses carry no body and so no code
        assert_eq!(S3ExceptionMappingService::category(None, Some(404)), Category::NotFound);
        assert_eq!(S3ExceptionMappingService::category(None, Some(403)), Category::AccessDenied);
        assert_eq!(S3ExceptionMappingService::category(None, Some(503)), Category::Connection);
        assert_eq!(
            S3ExceptionMappingService::category(Some("Teapot"), Some(418)),
            Category::Unknown
        );
        assert_eq!(S3ExceptionMappingService::category(None, None), Category::Unknown);
    }
}
