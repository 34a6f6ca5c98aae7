use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Lower-hex SHA-256 digest of a chunk text or file body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn parse(hash: String) -> Result<Self, String> {
        if hash.len() != 64 {
            return Err("hash must be 64 characters long (SHA-256)".to_string());
        }

        if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("hash must contain only hexadecimal characters".to_string());
        }

        Ok(Self(hash.to_lowercase()))
    }

    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn of_text(text: &str) -> Self {
        Self::of_bytes(text.as_bytes())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, other: &ContentHash) -> bool {
        self.0 == other.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

/// Deterministic 128-bit chunk identifier: the first 16 bytes of
/// `SHA-256(source_id + ":" + content_hash)`.
///
/// Identical `(source_id, text)` pairs always produce the same id, which is
/// what makes re-processing an unchanged source an upsert instead of a
/// duplicate insert.
pub fn deterministic_chunk_id(source_id: &str, content_hash: &ContentHash) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b":");
    hasher.update(content_hash.as_str().as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_of_text_is_lower_hex() {
        let hash = ContentHash::of_text("hello world");
        assert_eq!(hash.as_str().len(), 64);
        assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash.as_str(), hash.as_str().to_lowercase());
    }

    #[test]
    fn test_known_digest() {
        // sha256("hello world")
        let hash = ContentHash::of_text("hello world");
        assert_eq!(
            hash.as_str(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(ContentHash::parse("short".to_string()).is_err());
        assert!(ContentHash::parse("g".repeat(64)).is_err());
    }

    #[test]
    fn test_parse_normalizes_case() {
        let upper = "B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9";
        let hash = ContentHash::parse(upper.to_string()).unwrap();
        assert_eq!(hash.as_str(), upper.to_lowercase());
    }

    #[test]
    fn test_chunk_id_is_deterministic() {
        let hash = ContentHash::of_text("some chunk text");
        let a = deterministic_chunk_id("docs/a.txt", &hash);
        let b = deterministic_chunk_id("docs/a.txt", &hash);
        assert_eq!(a, b);
    }

    #[test]
    fn test_chunk_id_varies_with_source() {
        let hash = ContentHash::of_text("some chunk text");
        let a = deterministic_chunk_id("docs/a.txt", &hash);
        let b = deterministic_chunk_id("docs/b.txt", &hash);
        assert_ne!(a, b);
    }

    #[test]
    fn test_chunk_id_varies_with_content() {
        let a = deterministic_chunk_id("docs/a.txt", &ContentHash::of_text("one"));
        let b = deterministic_chunk_id("docs/a.txt", &ContentHash::of_text("two"));
        assert_ne!(a, b);
    }
}
