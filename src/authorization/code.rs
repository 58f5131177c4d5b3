//! Code and reference generation.
//!
//! Everything here draws from `OsRng`. With three attempts per code the guess
//! space must stay at 36^9, so a seeded PRNG is not acceptable.

use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;

/// `[A-Z0-9]`
pub const CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub const CODE_LENGTH: usize = 9;

pub const REFERENCE_LENGTH: usize = 20;

/// Draw a fresh verification code, uniform over [`CODE_ALPHABET`]
pub fn generate_code() -> String {
    let mut rng = OsRng;
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Draw a fresh opaque transfer reference (mixed-case alphanumeric)
pub fn generate_reference() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(REFERENCE_LENGTH)
        .map(char::from)
        .collect()
}

/// Strip everything but ASCII alphanumerics and uppercase the rest.
///
/// `"ab3-xy9-2ZQ"` becomes `"AB3XY92ZQ"`.
pub fn normalize_code(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Exact byte comparison that does not short-circuit on the first mismatch
pub fn codes_match(normalized_attempt: &str, expected: &str) -> bool {
    let a = normalized_attempt.as_bytes();
    let b = expected.as_bytes();
    if a.len() != CODE_LENGTH || b.len() != CODE_LENGTH {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
