//! Content fingerprints for deduplication and save verification.

/// MD5 of the full byte content, rendered as lowercase hex.
pub fn fingerprint(data: &[u8]) -> String {
    hex::encode(md5::compute(data).0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_stable() {
        assert_eq!(fingerprint(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(fingerprint(b"salvor"), fingerprint(b"salvor"));
        assert_ne!(fingerprint(b"salvor"), fingerprint(b"salvage"));
    }
}
