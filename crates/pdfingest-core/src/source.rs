//! Byte source adapter
//!
//! Wraps uploaded bytes into an immutable shared buffer and computes the
//! content fingerprint used as the cache key. No parsing happens here.

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// SHA-256 digest of a document's bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex characters, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

/// An uploaded document: read-only bytes plus fingerprint
#[derive(Clone)]
pub struct RawDocument {
    bytes: Arc<[u8]>,
    fingerprint: Fingerprint,
    content_id: Option<String>,
}

impl RawDocument {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        let fingerprint = Fingerprint::of(&bytes);
        Self {
            bytes,
            fingerprint,
            content_id: None,
        }
    }

    /// Attach a caller-supplied label (file name, upload id).
    ///
    /// The label is informational only; caching is keyed by fingerprint.
    pub fn with_content_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for RawDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawDocument")
            .field("len", &self.bytes.len())
            .field("fingerprint", &self.fingerprint)
            .field("content_id", &self.content_id)
            .finish()
    }
}

impl From<Vec<u8>> for RawDocument {
    fn from(bytes: Vec<u8>) -> Self {
        RawDocument::new(bytes)
    }
}

impl From<&[u8]> for RawDocument {
    fn from(bytes: &[u8]) -> Self {
        RawDocument::new(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_of_empty_input() {
        // Well-known SHA-256 of the empty string
        assert_eq!(
            Fingerprint::of(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_fingerprint_depends_only_on_bytes() {
        let a = RawDocument::new(b"%PDF-1.4 a".to_vec()).with_content_id("a.pdf");
        let b = RawDocument::new(b"%PDF-1.4 a".to_vec()).with_content_id("b.pdf");
        let c = RawDocument::new(b"%PDF-1.4 b".to_vec());

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.content_id(), Some("a.pdf"));
    }

    #[test]
    fn test_short_is_prefix_of_hex() {
        let fp = Fingerprint::of(b"hello");
        assert!(fp.to_hex().starts_with(&fp.short()));
        assert_eq!(fp.short().len(), 12);
    }

    #[test]
    fn test_clone_shares_buffer() {
        let doc = RawDocument::new(vec![1u8, 2, 3]);
        let copy = doc.clone();
        assert_eq!(doc.bytes().as_ptr(), copy.bytes().as_ptr());
    }
}
