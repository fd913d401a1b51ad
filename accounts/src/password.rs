use hex;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SCHEME: &str = "sha256";

// Salted digest of a password
fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hashes a password into `sha256$<salt>$<digest>` with a fresh random salt
pub fn hash_password(password: &str) -> String {
    let salt = hex::encode(rand::random::<[u8; 16]>());
    format!("{}${}${}", SCHEME, salt, digest(&salt, password))
}

/// Checks `password` against a string produced by `hash_password`.
/// Malformed hashes never verify.
pub fn verify_password(encoded: &str, password: &str) -> bool {
    let mut parts = encoded.splitn(3, '$');
    let (Some(scheme), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if scheme != SCHEME {
        return false;
    }

    let (Ok(actual), Ok(expected)) = (hex::decode(digest(salt, password)), hex::decode(expected))
    else {
        return false;
    };
    if actual.len() != expected.len() {
        return false;
    }
    actual.as_slice().ct_eq(expected.as_slice()).into()
}
