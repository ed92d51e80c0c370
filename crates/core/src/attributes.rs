//! Path attributes
//!
//! Populated lazily by attribute-lookup features; transfer code reads them
//! but never fills them in itself.

use jiff::Timestamp;
use sha2::{Digest, Sha256};

/// Default mode of newly created files
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Default mode of newly created directories
pub const DEFAULT_DIRECTORY_MODE: u32 = 0o755;

/// Attributes of a remote resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathAttributes {
    /// Size in bytes, `None` until resolved
    pub size: Option<u64>,
    pub modified: Option<Timestamp>,
    pub permission: Option<Permission>,
    /// Backend-opaque content version token
    pub etag: Option<String>,
    pub checksum: Option<Checksum>,
}

impl PathAttributes {
    pub fn with_size(size: u64) -> Self {
        Self {
            size: Some(size),
            ..Default::default()
        }
    }
}

/// Unix permission bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Permission(u32);

impl Permission {
    pub fn new(mode: u32) -> Self {
        Self(mode & 0o777)
    }

    /// Parse an octal mode string such as `"644"`
    pub fn from_mode(mode: &str) -> Option<Self> {
        u32::from_str_radix(mode, 8).ok().map(Self::new)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Octal mode string, e.g. `"644"`
    pub fn mode(&self) -> String {
        format!("{:o}", self.0)
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:o}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Md5,
    Sha256,
}

/// Content checksum reported by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest
    pub hash: String,
}

impl Checksum {
    pub fn new(algorithm: HashAlgorithm, hash: impl Into<String>) -> Self {
        Self {
            algorithm,
            hash: hash.into().to_lowercase(),
        }
    }

    pub fn sha256(data: &[u8]) -> Self {
        Self::new(HashAlgorithm::Sha256, hex::encode(Sha256::digest(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_mode() {
        let p = Permission::new(0o100644);
        assert_eq!(p.mode(), "644");
        assert_eq!(p.bits(), 0o644);
        assert_eq!(Permission::from_mode("755"), Some(Permission::new(0o755)));
        assert_eq!(Permission::from_mode("9z"), None);
    }

    #[test]
    fn test_sha256_checksum() {
        let c = Checksum::sha256(b"test");
        assert_eq!(c.algorithm, HashAlgorithm::Sha256);
        assert_eq!(
            c.hash,
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }

    #[test]
    fn test_size_unresolved_by_default() {
        assert_eq!(PathAttributes::default().size, None);
        assert_eq!(PathAttributes::with_size(0).size, Some(0));
    }
}
