// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Content digests: SHA-256 of the snippet body, used as its address.

use sha2::{Digest, Sha256};
use snippetd_core::error::SnippetdError;

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Compute the SHA-256 digest of `data` as a lowercase hex string.
pub fn digest_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Check that `data` still hashes to `expected_hex`.
pub fn verify_digest(data: &[u8], expected_hex: &str) -> Result<(), SnippetdError> {
    let actual = digest_hex(data);
    if actual.eq_ignore_ascii_case(expected_hex) {
        Ok(())
    } else {
        Err(SnippetdError::ArchiveIo(format!(
            "stored body does not match digest: expected {expected_hex}, got {actual}"
        )))
    }
}

/// Validate a caller-supplied digest and return it in canonical lowercase.
///
/// Digests become file names, so anything other than exactly 64 hex
/// characters is refused.
pub fn normalize_digest(input: &str) -> Result<String, SnippetdError> {
    let trimmed = input.trim();
    if trimmed.len() != DIGEST_HEX_LEN || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(SnippetdError::InvalidDigest(truncate_for_log(trimmed)));
    }
    Ok(trimmed.to_ascii_lowercase())
}

fn truncate_for_log(s: &str) -> String {
    s.chars().take(80).collect()
}
