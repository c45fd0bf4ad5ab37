use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn sha256_file_hex(path: &Path) -> Result<String> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    digest_reader(BufReader::new(file))
        .with_context(|| format!("failed to hash {}", path.display()))
}

pub fn verify_sha256(bytes: &[u8], expected_hex: &str) -> bool {
    sha256_hex(bytes).eq_ignore_ascii_case(expected_hex.trim())
}

pub fn verify_sha256_file(path: &Path, expected_hex: &str) -> Result<bool> {
    Ok(sha256_file_hex(path)?.eq_ignore_ascii_case(expected_hex.trim()))
}

fn digest_reader<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 8192];
    loop {
        let read = reader.read(&mut buffer).context("failed reading input")?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
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
    fn verify_sha256_is_case_insensitive() {
        assert!(verify_sha256(b"abc", &ABC_SHA256.to_ascii_uppercase()));
        assert!(!verify_sha256(b"abd", ABC_SHA256));
    }

    #[test]
    fn sha256_file_hex_streams_large_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bundle.js");
        let data = vec![b'a'; 20_000];
        std::fs::write(&path, &data).expect("write");
        assert_eq!(sha256_file_hex(&path).expect("hash"), sha256_hex(&data));
    }

    #[test]
    fn verify_sha256_file_detects_tampering() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("package.json");
        std::fs::write(&path, b"abc").expect("write");
        assert!(verify_sha256_file(&path, ABC_SHA256).expect("hash"));

        std::fs::write(&path, b"abcd").expect("rewrite");
        assert!(!verify_sha256_file(&path, ABC_SHA256).expect("hash"));
    }

    #[test]
    fn sha256_file_hex_reports_missing_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = sha256_file_hex(&dir.path().join("absent")).expect_err("must fail");
        assert!(err.to_string().contains("absent"));
    }
}
