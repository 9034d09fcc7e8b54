//! Webhook authenticity checks

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::EngineError;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// `sha256=<hex>` signature GitHub sends in `X-Hub-Signature-256`
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, EngineError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| EngineError::AuthError(e.to_string()))?;
    mac.update(body);
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verify an HMAC-SHA256 signature over the raw body
pub fn verify_signature(secret: &[u8], body: &[u8], header: Option<&str>) -> Result<(), EngineError> {
    let header = header
        .filter(|h| !h.is_empty())
        .ok_or_else(|| EngineError::AuthError("Missing webhook signature".to_string()))?;
    let hex_digest = header
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or_else(|| EngineError::AuthError("Unsupported signature scheme".to_string()))?;
    let expected = hex::decode(hex_digest)
        .map_err(|_| EngineError::AuthError("Malformed webhook signature".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| EngineError::AuthError(e.to_string()))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| EngineError::AuthError("Webhook signature mismatch".to_string()))
}

/// Compare a shared token without leaking where it differs
pub fn verify_token(expected: &[u8], header: Option<&str>) -> Result<(), EngineError> {
    let provided = header
        .filter(|h| !h.is_empty())
        .ok_or_else(|| EngineError::AuthError("Missing webhook token".to_string()))?;

    // Both sides go through the same MAC so the final comparison is constant time
    let tag = {
        let mut mac = HmacSha256::new_from_slice(expected)
            .map_err(|e| EngineError::AuthError(e.to_string()))?;
        mac.update(b"dockhand-webhook-token");
        mac.finalize().into_bytes()
    };
    let mut mac = HmacSha256::new_from_slice(provided.as_bytes())
        .map_err(|e| EngineError::AuthError(e.to_string()))?;
    mac.update(b"dockhand-webhook-token");
    mac.verify_slice(&tag)
        .map_err(|_| EngineError::AuthError("Webhook token mismatch".to_string()))
}
