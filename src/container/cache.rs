use crate::errors::{DindError, Result};
use sha2::{Digest, Sha256};

const STORAGE_PREFIX: &str = "dindrun-cache";

/// A named, persistent mount shared across containers.
///
/// Storage is addressed by a hash of the name: two handles with the same name
/// always land on the same volume. Nothing serializes concurrent writers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheVolume {
    name: String,
}

impl CacheVolume {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DindError::InvalidSpec(
                "cache volume name must not be empty".to_string(),
            ));
        }
        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend volume name, valid for docker regardless of the characters in `name`
    pub fn storage_id(&self) -> String {
        let digest = Sha256::digest(self.name.as_bytes());
        let hex = format!("{:x}", digest);
        format!("{}-{}", STORAGE_PREFIX, &hex[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_name_same_storage() {
        let a = CacheVolume::new("shared-tmp").unwrap();
        let b = CacheVolume::new("shared-tmp").unwrap();
        assert_eq!(a.storage_id(), b.storage_id());
        assert!(a.storage_id().starts_with("dindrun-cache-"));
        assert_eq!(a.storage_id().len(), "dindrun-cache-".len() + 16);
    }

    #[test]
    fn test_different_names_different_storage() {
        let a = CacheVolume::new("shared-tmp").unwrap();
        let b = CacheVolume::new("shared tmp/other").unwrap();
        assert_ne!(a.storage_id(), b.storage_id());
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(CacheVolume::new("  ").is_err());
    }
}
