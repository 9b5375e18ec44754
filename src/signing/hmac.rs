//! Per-source authentication checks for the ingest endpoint. Two
//! independent schemes are supported: a static `X-API-Key` secret, or an
//! `X-Webhook-Signature` HMAC-SHA-256 of the raw body, source-dependent
//! which is required; callers decide precedence, this module only
//! verifies whichever header is presented.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;

use crate::error::{LeadflowError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Checks `provided` against the configured key for `source`, in constant
/// time so response latency doesn't leak how many bytes matched.
pub fn verify_api_key(source: &str, provided: Option<&str>, api_keys: &HashMap<String, String>) -> Result<()> {
    let expected = api_keys
        .get(source)
        .ok_or_else(|| LeadflowError::Auth(format!("no API key configured for source {source}")))?;
    let provided = provided.ok_or_else(|| LeadflowError::Auth("missing X-API-Key header".to_string()))?;

    if constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
        Ok(())
    } else {
        Err(LeadflowError::Auth(format!("invalid API key for source {source}")))
    }
}

/// Recomputes HMAC-SHA-256 over the raw request body with the secret
/// configured for `source` and compares it to the hex-encoded signature
/// in `provided`. Must run against the raw body bytes, before JSON
/// parsing, or the signature would cover a re-serialized copy instead of
/// what the sender actually signed.
pub fn verify_webhook_signature(
    source: &str,
    provided: Option<&str>,
    raw_body: &[u8],
    hmac_secrets: &HashMap<String, String>,
) -> Result<()> {
    let secret = hmac_secrets
        .get(source)
        .ok_or_else(|| LeadflowError::Auth(format!("no HMAC secret configured for source {source}")))?;
    let provided = provided.ok_or_else(|| LeadflowError::Auth("missing X-Webhook-Signature header".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| LeadflowError::Internal(format!("HMAC init failed: {e}")))?;
    mac.update(raw_body);
    let expected = hex::encode(mac.finalize().into_bytes());

    if constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
        Ok(())
    } else {
        Err(LeadflowError::Auth(format!("invalid webhook signature for source {source}")))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(source: &str, secret: &str) -> HashMap<String, String> {
        HashMap::from([(source.to_string(), secret.to_string())])
    }

    #[test]
    fn verify_api_key_accepts_matching_secret() {
        let keys = secrets("moco", "topsecret");
        assert!(verify_api_key("moco", Some("topsecret"), &keys).is_ok());
    }

    #[test]
    fn verify_api_key_rejects_mismatch() {
        let keys = secrets("moco", "topsecret");
        assert!(verify_api_key("moco", Some("wrong"), &keys).is_err());
    }

    #[test]
    fn verify_api_key_rejects_missing_header() {
        let keys = secrets("moco", "topsecret");
        assert!(verify_api_key("moco", None, &keys).is_err());
    }

    #[test]
    fn verify_api_key_rejects_unconfigured_source() {
        let keys = secrets("moco", "topsecret");
        assert!(verify_api_key("waalaxy", Some("topsecret"), &keys).is_err());
    }

    #[test]
    fn verify_webhook_signature_accepts_matching_hmac() {
        let body = br#"{"event_type":"page_view"}"#;
        let secrets = secrets("waalaxy", "whsecret");

        let mut mac = HmacSha256::new_from_slice(b"whsecret").unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(verify_webhook_signature("waalaxy", Some(&sig), body, &secrets).is_ok());
    }

    #[test]
    fn verify_webhook_signature_rejects_tampered_body() {
        let body = br#"{"event_type":"page_view"}"#;
        let secrets = secrets("waalaxy", "whsecret");

        let mut mac = HmacSha256::new_from_slice(b"whsecret").unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        let tampered = br#"{"event_type":"form_submit"}"#;
        assert!(verify_webhook_signature("waalaxy", Some(&sig), tampered, &secrets).is_err());
    }

    #[test]
    fn constant_time_eq_rejects_length_mismatch() {
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
