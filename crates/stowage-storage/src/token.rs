//! Signed tokens for temporary local file access.
//!
//! Token = base64url(JSON `{"path", "exp", "sig"}`), where `sig` is the hex
//! HMAC-SHA256 of `"{path}:{exp}"` and `exp` is a unix timestamp in seconds.

use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Why a temporary token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Temporary URL has expired")]
    Expired,
    #[error("Temporary URL signature does not match")]
    InvalidSignature,
    #[error("Temporary URL token is malformed")]
    InvalidToken,
    #[error("No signing secret is configured")]
    MissingKey,
    #[error("File behind the temporary URL no longer exists")]
    FileNotFound,
}

impl TokenError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::Expired => "expired",
            TokenError::InvalidSignature => "invalid_signature",
            TokenError::InvalidToken => "invalid_token",
            TokenError::MissingKey => "missing_key",
            TokenError::FileNotFound => "file_not_found",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TokenPayload {
    pub path: String,
    pub exp: i64,
    pub sig: String,
}

fn signature(secret: &[u8], path: &str, exp: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC accepts any key size");
    mac.update(format!("{}:{}", path, exp).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Build a token for `path` that expires at `exp` (unix seconds).
pub(crate) fn issue(secret: &[u8], path: &str, exp: i64) -> String {
    let payload = TokenPayload {
        path: path.to_string(),
        exp,
        sig: signature(secret, path, exp),
    };
    // Serializing a struct of strings and integers cannot fail
    let json = serde_json::to_vec(&payload).unwrap_or_default();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
}

pub(crate) fn decode(token: &str) -> Result<TokenPayload, TokenError> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(token.trim().trim_end_matches('='))
        .map_err(|_| TokenError::InvalidToken)?;
    // Non-UTF-8 bytes inside a string value must reach the signature check
    let text = String::from_utf8_lossy(&bytes);
    serde_json::from_str(&text).map_err(|_| TokenError::InvalidToken)
}

/// Check a token against `secret` at time `now`, returning the signed path.
pub(crate) fn verify(secret: Option<&[u8]>, token: &str, now: i64) -> Result<String, TokenError> {
    let secret = secret.ok_or(TokenError::MissingKey)?;
    let payload = decode(token)?;

    if now > payload.exp {
        return Err(TokenError::Expired);
    }

    let expected = signature(secret, &payload.path, payload.exp);
    let matches: bool = payload.sig.as_bytes().ct_eq(expected.as_bytes()).into();
    if !matches {
        return Err(TokenError::InvalidSignature);
    }

    Ok(payload.path)
}
