use sha2::{Digest, Sha256};

/// Hashes a sequence of fields joined by `\u{1f}` (unit separator) so that
/// e.g. ("ab", "c") and ("a", "bc") never collide.
pub fn content_hash(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(field.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Stable content hash for a file's bytes, used by the indexer to skip
/// unchanged files between scans.
pub fn file_content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Privacy-preserving hash of a project path, used to name backup files
/// without leaking the raw filesystem path.
pub fn path_hash(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
