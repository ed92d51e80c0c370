//! Error taxonomy shared by every backend
//!
//! A backend-native failure is mapped exactly once, where it first crosses
//! into the core (see [`crate::mapping`]), into an [`Error`] tagged with a
//! [`Category`]. From there it propagates unchanged.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::feature::FeatureKind;

/// Result type alias for ferry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Chained cause of an [`Error`]
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Failure categories surfaced to callers regardless of backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// The resource does not exist
    NotFound,
    /// Authentication or authorization refused the operation
    AccessDenied,
    /// Transport failure, timeout or lost connection
    Connection,
    /// Quota exhausted, transfer cut short or canceled
    Interrupted,
    /// The backend cannot perform the operation at all
    Unsupported,
    /// Invalid local configuration
    Config,
    /// Anything not covered above
    Unknown,
}

impl Category {
    /// Untranslated message key for this category
    pub fn label(&self) -> &'static str {
        match self {
            Category::NotFound => "File not found",
            Category::AccessDenied => "Access denied",
            Category::Connection => "Connection failed",
            Category::Interrupted => "Transfer interrupted",
            Category::Unsupported => "Unsupported operation",
            Category::Config => "Configuration error",
            Category::Unknown => "Unknown",
        }
    }

    /// Untranslated remediation hint, if the category has one
    pub fn help(&self) -> Option<&'static str> {
        match self {
            Category::NotFound | Category::AccessDenied => {
                Some("Please contact your web hosting service provider for assistance")
            }
            Category::Connection => Some("Check your network connection and try again"),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Category::NotFound => "not-found",
            Category::AccessDenied => "access-denied",
            Category::Connection => "connection",
            Category::Interrupted => "interrupted",
            Category::Unsupported => "unsupported",
            Category::Config => "config",
            Category::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// External localized-string lookup keyed by `(key, table)`
pub trait Localizer: Send + Sync {
    fn localize(&self, key: &str, table: &str) -> Option<String>;
}

/// Localizer without any translations
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledLocalizer;

impl Localizer for DisabledLocalizer {
    fn localize(&self, _key: &str, _table: &str) -> Option<String> {
        None
    }
}

const CANCELED: &str = "Canceled";

/// Error type for ferry operations
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", render(.message, .detail))]
pub struct Error {
    category: Category,
    message: String,
    detail: String,
    #[source]
    cause: Option<Cause>,
}

fn render(message: &str, detail: &str) -> String {
    if detail.is_empty() {
        message.to_string()
    } else {
        format!("{message}: {detail}")
    }
}

impl Error {
    pub fn new(category: Category, detail: impl Into<String>) -> Self {
        Self {
            category,
            message: category.label().to_string(),
            detail: detail.into(),
            cause: None,
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(Category::NotFound, detail)
    }

    pub fn access_denied(detail: impl Into<String>) -> Self {
        Self::new(Category::AccessDenied, detail)
    }

    pub fn connection(detail: impl Into<String>) -> Self {
        Self::new(Category::Connection, detail)
    }

    pub fn interrupted(detail: impl Into<String>) -> Self {
        Self::new(Category::Interrupted, detail)
    }

    /// Capability absent on the backend
    pub fn unsupported(kind: FeatureKind) -> Self {
        Self::new(Category::Unsupported, format!("{kind} is not supported"))
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::new(Category::Config, detail)
    }

    pub fn unknown(detail: impl Into<String>) -> Self {
        Self::new(Category::Unknown, detail)
    }

    /// Transfer canceled through its cancellation token
    pub fn canceled() -> Self {
        Self::new(Category::Interrupted, CANCELED)
    }

    /// Replace the message key (defaults to the category label)
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Chain the original backend failure
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    pub fn is_not_found(&self) -> bool {
        self.category == Category::NotFound
    }

    pub fn is_canceled(&self) -> bool {
        self.category == Category::Interrupted && self.detail == CANCELED
    }

    /// Message translated from the `Error` table, falling back to the key
    pub fn localized_message(&self, localizer: &dyn Localizer) -> String {
        localizer
            .localize(&self.message, "Error")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.message.clone())
    }

    /// Help text translated from the `Support` table, falling back to the key
    pub fn localized_help(&self, localizer: &dyn Localizer) -> Option<String> {
        self.category.help().map(|key| {
            localizer
                .localize(key, "Support")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| key.to_string())
        })
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        use crate::mapping::{ExceptionMappingService, IoExceptionMappingService};
        IoExceptionMappingService.map(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::error::Error as _;

    struct TableLocalizer(HashMap<(&'static str, &'static str), &'static str>);

    impl Localizer for TableLocalizer {
        fn localize(&self, key: &str, table: &str) -> Option<String> {
            self.0
                .iter()
                .find(|((k, t), _)| *k == key && *t == table)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_display_includes_detail() {
        let e = Error::not_found("/home/test.txt");
        assert_eq!(e.to_string(), "File not found: /home/test.txt");
        assert_eq!(e.category(), Category::NotFound);
    }

    #[test]
    fn test_display_without_detail() {
        let e = Error::connection("");
        assert_eq!(e.to_string(), "Connection failed");
    }

    #[test]
    fn test_cause_is_chained() {
        let io = std::io::Error::other("socket closed");
        let e = Error::connection("listing /").with_cause(io);
        let source = e.source().expect("cause should be kept");
        assert_eq!(source.to_string(), "socket closed");
    }

    #[test]
    fn test_localized_message_fallback() {
        let e = Error::not_found("/missing");
        assert_eq!(e.localized_message(&DisabledLocalizer), "File not found");
        assert_eq!(
            e.localized_help(&DisabledLocalizer).as_deref(),
            Some("Please contact your web hosting service provider for assistance")
        );
    }

    #[test]
    fn test_localized_message_translated() {
        let mut table = HashMap::new();
        table.insert(("File not found", "Error"), "Datei nicht gefunden");
        table.insert(("Access denied", "Error"), "");
        let localizer = TableLocalizer(table);

        let e = Error::not_found("/missing");
        assert_eq!(e.localized_message(&localizer), "Datei nicht gefunden");
        assert_eq!(e.detail(), "/missing");

        // Empty translations never replace the key
        let e = Error::access_denied("/secret");
        assert_eq!(e.localized_message(&localizer), "Access denied");
    }

    #[test]
    fn test_canceled() {
        let e = Error::canceled();
        assert!(e.is_canceled());
        assert_eq!(e.category(), Category::Interrupted);
        assert!(!Error::interrupted("quota exceeded").is_canceled());
    }

    #[test]
    fn test_unsupported_names_feature() {
        let e = Error::unsupported(FeatureKind::Copy);
        assert_eq!(e.category(), Category::Unsupported);
        assert!(e.detail().contains("Copy"));
    }
}
