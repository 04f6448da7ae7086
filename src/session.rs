//! Deterministic session identifiers
//!
//! A session id is `base64url_nopad(sha256(token + "_" + date_stamp))`. Both
//! sides of a match can recompute it from the waiting party's token and the
//! match time without any coordination.

use crate::error::{MatchmakingError, Result};
use base64::prelude::*;
use sha2::{Digest, Sha256};

const SELF_TEST_INPUT: (&str, &str) = ("tokenA", "2024-05-01");
const SELF_TEST_EXPECTED: &str = "QnUANCnvZwsd-Pl79TFODz1X-brBq29AplRf7Z6xi_s";

/// Derive a session id without the startup self-test
pub fn derive_session_id(token: &str, date_stamp: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update(b"_");
    hasher.update(date_stamp.as_bytes());
    BASE64_URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Session id derivation, checked once against a known answer
#[derive(Debug, Clone, Copy)]
pub struct SessionIdDeriver {
    _verified: (),
}

impl SessionIdDeriver {
    /// Returns `HashUnavailable` if the digest does not reproduce the known answer
    pub fn new() -> Result<Self> {
        let (token, date_stamp) = SELF_TEST_INPUT;
        let actual = derive_session_id(token, date_stamp);
        if actual != SELF_TEST_EXPECTED {
            return Err(MatchmakingError::HashUnavailable {
                reason: format!(
                    "SHA-256 self-test mismatch: expected {}, got {}",
                    SELF_TEST_EXPECTED, actual
                ),
            }
            .into());
        }
        Ok(Self { _verified: () })
    }

    pub fn derive_id(&self, token: &str, date_stamp: &str) -> String {
        derive_session_id(token, date_stamp)
    }
}
