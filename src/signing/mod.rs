//! Inbound request authentication: static API keys and HMAC-SHA-256
//! webhook signatures, both keyed per event source out of `AuthConfig`.

pub mod hmac;

pub use hmac::{verify_api_key, verify_webhook_signature};
