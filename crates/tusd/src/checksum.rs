use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use tus_errors::ErrorMetadata;

/// `Upload-Checksum: <algo> <base64 digest>`. Only `sha256` is implemented;
/// any other algorithm is rejected up front rather than silently ignored.
pub struct UploadChecksum {
    hasher: Sha256,
    expected: Vec<u8>,
}

impl UploadChecksum {
    pub fn parse(header: &str) -> anyhow::Result<Self> {
        let (algo, digest) = header
            .split_once(' ')
            .ok_or_else(|| ErrorMetadata::invalid_metadata("malformed Upload-Checksum header"))?;
        if !algo.eq_ignore_ascii_case("sha256") {
            return Err(ErrorMetadata::unsupported_checksum_algorithm(format!(
                "unsupported checksum algorithm: {algo}"
            ))
            .into());
        }
        let expected = BASE64
            .decode(digest)
            .map_err(|e| ErrorMetadata::invalid_metadata(format!("bad checksum digest: {e}")))?;
        Ok(Self {
            hasher: Sha256::new(),
            expected,
        })
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn verify(self) -> anyhow::Result<()> {
        let actual = self.hasher.finalize().to_vec();
        if actual != self.expected {
            return Err(ErrorMetadata::checksum_mismatch(
                "uploaded bytes do not match the supplied checksum",
            )
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_digest_verifies() {
        let digest = BASE64.encode(Sha256::digest(b"hello"));
        let mut checksum = UploadChecksum::parse(&format!("sha256 {digest}")).unwrap();
        checksum.update(b"hello");
        checksum.verify().unwrap();
    }

    #[test]
    fn mismatched_digest_fails() {
        let digest = BASE64.encode(Sha256::digest(b"hello"));
        let mut checksum = UploadChecksum::parse(&format!("sha256 {digest}")).unwrap();
        checksum.update(b"goodbye");
        assert!(checksum.verify().is_err());
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        assert!(UploadChecksum::parse("crc32 AAAA").is_err());
    }
}
