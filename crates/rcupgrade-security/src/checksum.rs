use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

pub fn sha256_hex(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

pub fn verify_sha256(payload: &[u8], expected_hex: &str) -> bool {
    digest_matches(&sha256_hex(payload), expected_hex)
}

pub fn verify_sha256_reader<R: Read>(reader: R, expected_hex: &str) -> Result<bool> {
    let actual = sha256_reader_hex(reader).context("failed to hash stream")?;
    Ok(digest_matches(&actual, expected_hex))
}

pub fn verify_sha256_file(path: &Path, expected_hex: &str) -> Result<bool> {
    let actual = sha256_file_hex(path)?;
    Ok(digest_matches(&actual, expected_hex))
}

pub fn sha256_file_hex(path: &Path) -> Result<String> {
    let file =
        File::open(path).with_context(|| format!("failed to open {} for hashing", path.display()))?;
    sha256_reader_hex(file).with_context(|| format!("failed to hash {}", path.display()))
}

fn sha256_reader_hex<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn digest_matches(actual_hex: &str, expected_hex: &str) -> bool {
    actual_hex.eq_ignore_ascii_case(expected_hex.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn sha256_hex_matches_known_vectors() {
        assert_eq!(sha256_hex(b""), EMPTY_SHA256);
        assert_eq!(sha256_hex(b"abc"), ABC_SHA256);
    }

    #[test]
    fn verify_sha256_is_case_insensitive_and_trims_expected() {
        assert!(verify_sha256(b"abc", &ABC_SHA256.to_ascii_uppercase()));
        assert!(verify_sha256(b"abc", &format!(" {ABC_SHA256}\n")));
        assert!(!verify_sha256(b"abd", ABC_SHA256));
    }

    #[test]
    fn verify_sha256_reader_streams_input() {
        let verified = verify_sha256_reader(&b"abc"[..], ABC_SHA256).expect("must hash");
        assert!(verified);

        let large = vec![7_u8; 200 * 1024];
        let expected = sha256_hex(&large);
        assert!(verify_sha256_reader(large.as_slice(), &expected).expect("must hash"));
    }

    #[test]
    fn verify_sha256_file_reports_mismatch_and_missing_file() {
        let path = std::env::temp_dir().join(format!(
            "rcupgrade-security-tests-{}-checksum",
            std::process::id()
        ));
        std::fs::write(&path, b"abc").expect("must write fixture");

        assert!(verify_sha256_file(&path, ABC_SHA256).expect("must hash"));
        assert!(!verify_sha256_file(&path, EMPTY_SHA256).expect("must hash"));

        std::fs::remove_file(&path).expect("must cleanup fixture");
        assert!(verify_sha256_file(&path, ABC_SHA256).is_err());
    }
}
