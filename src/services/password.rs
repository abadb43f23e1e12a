//! Password storage: Argon2id PHC strings, with a constant-time path for the
//! plaintext records that predate hashing.

use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use rand::Rng;
use ring::hmac;
use ring::rand::SystemRandom;

use crate::store::UserRecord;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Outcome of checking a submitted password against a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Valid,
    /// Matched the legacy plaintext field; the record should be rehashed.
    ValidLegacy,
    Invalid,
}

/// Hash `password` with a fresh random salt.
///
/// # Errors
///
/// Returns `PasswordError::Hash` if Argon2 fails.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill(&mut salt_bytes);
    let salt =
        SaltString::encode_b64(&salt_bytes).map_err(|e| PasswordError::Hash(e.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Check `submitted` against `record`.
///
/// A stored hash always wins; the plaintext field is only consulted when the
/// record has no hash. A hash that cannot be parsed never verifies.
#[must_use]
pub fn verify(record: &UserRecord, submitted: &str) -> Verification {
    if let Some(stored) = record.password_hash.as_deref() {
        return match PasswordHash::new(stored) {
            Ok(parsed) => {
                if Argon2::default()
                    .verify_password(submitted.as_bytes(), &parsed)
                    .is_ok()
                {
                    Verification::Valid
                } else {
                    Verification::Invalid
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Stored password hash is malformed");
                Verification::Invalid
            }
        };
    }

    match record.password.as_deref() {
        Some(plain) if plaintext_matches(plain, submitted) => Verification::ValidLegacy,
        _ => Verification::Invalid,
    }
}

/// Compare MACs under a throwaway key so neither the content nor the length of
/// the stored password leaks through timing.
fn plaintext_matches(stored: &str, submitted: &str) -> bool {
    let Ok(key) = hmac::Key::generate(hmac::HMAC_SHA256, &SystemRandom::new()) else {
        tracing::error!("System RNG unavailable; refusing legacy password check");
        return false;
    };
    let tag = hmac::sign(&key, stored.as_bytes());
    hmac::verify(&key, submitted.as_bytes(), tag.as_ref()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Role;

    #[test]
    fn hashed_record_verifies() {
        let record = UserRecord {
            password: None,
            password_hash: Some(hash_password("papak123").unwrap()),
            role: Role::SuperAdmin,
        };
        assert_eq!(verify(&record, "papak123"), Verification::Valid);
        assert_eq!(verify(&record, "Papak123"), Verification::Invalid);
    }

    #[test]
    fn salts_differ_between_hashes() {
        assert_ne!(hash_password("same").unwrap(), hash_password("same").unwrap());
    }

    #[test]
    fn legacy_plaintext_is_case_sensitive() {
        let record = UserRecord {
            password: Some("papak123".into()),
            ..UserRecord::default()
        };
        assert_eq!(verify(&record, "papak123"), Verification::ValidLegacy);
        assert_eq!(verify(&record, "PAPAK123"), Verification::Invalid);
        assert_eq!(verify(&record, ""), Verification::Invalid);
        assert_eq!(verify(&record, "papak"), Verification::Invalid);
        assert_eq!(verify(&record, "papak1234"), Verification::Invalid);
    }

    #[test]
    fn hash_takes_precedence_over_plaintext() {
        let record = UserRecord {
            password: Some("old".into()),
            password_hash: Some(hash_password("new").unwrap()),
            role: Role::User,
        };
        assert_eq!(verify(&record, "old"), Verification::Invalid);
        assert_eq!(verify(&record, "new"), Verification::Valid);
    }

    #[test]
    fn record_without_any_password_never_matches() {
        assert_eq!(verify(&UserRecord::default(), ""), Verification::Invalid);
    }

    #[test]
    fn malformed_hash_is_invalid() {
        let record = UserRecord {
            password_hash: Some("not-a-phc-string".into()),
            ..UserRecord::default()
        };
        assert_eq!(verify(&record, "anything"), Verification::Invalid);
    }
}
