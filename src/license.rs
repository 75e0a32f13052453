//! Offline license verification.
//!
//! A license token is a base64-encoded JSON envelope
//! `{ "data": { "type", "expiry", "serial", "issued_at" }, "sig": base64 }`
//! where `sig` is an ECDSA P-256 (SHA-256) signature over the canonical
//! JSON serialization of `data` (deterministic key ordering). Verification
//! is fully offline against a compiled-in key set; the payload is untrusted
//! until the signature check passes, so nothing beyond well-formedness is
//! trusted before that point.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use serde::Deserialize;
use thiserror::Error;

use crate::config::{UserConfigStore, TRIAL_HOURS};
use crate::error::MonitorError;
use crate::types::{LicenseActivation, LicenseClaims};

/// Embedded verification keys, SEC1 uncompressed hex. The verifier is
/// parameterized over a key set so a rotation only has to append here.
pub const EMBEDDED_PUBLIC_KEYS: &[&str] = &[
    "046b17d1f2e12c4247f8bce6e563a440f277037d812deb33a0f4a13945d898c2964fe342e2fe1a7f9b8ee7eb4a7c0f9e162bce33576b315ececbb6406837bf51f5",
];

/// License verification failures, surfaced verbatim to the caller.
#[derive(Debug, Error, PartialEq)]
pub enum LicenseError {
    /// The token could not be decoded or parsed.
    #[error("malformed license token: {0}")]
    MalformedEnvelope(String),

    /// The signature does not match any configured key.
    #[error("license signature verification failed")]
    BadSignature,

    /// The payload verified but its expiry is in the past.
    #[error("license expired")]
    Expired,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: serde_json::Value,
    sig: String,
}

/// Offline verifier over a fixed set of P-256 public keys.
pub struct LicenseVerifier {
    keys: Vec<VerifyingKey>,
}

impl LicenseVerifier {
    /// Verifier over an explicit key set (key rotation path).
    pub fn with_keys(keys: Vec<VerifyingKey>) -> Self {
        Self { keys }
    }

    /// Verifier over the compiled-in key set.
    pub fn embedded() -> Self {
        let keys = EMBEDDED_PUBLIC_KEYS
            .iter()
            .filter_map(|hex_key| {
                let bytes = hex::decode(hex_key).ok()?;
                VerifyingKey::from_sec1_bytes(&bytes).ok()
            })
            .collect();
        Self { keys }
    }

    /// Decode, signature-check, and expiry-check a license token.
    pub fn verify(&self, token: &str) -> Result<LicenseClaims, LicenseError> {
        let decoded = BASE64
            .decode(token.trim())
            .map_err(|e| LicenseError::MalformedEnvelope(format!("base64: {}", e)))?;
        let envelope: Envelope = serde_json::from_slice(&decoded)
            .map_err(|e| LicenseError::MalformedEnvelope(format!("json: {}", e)))?;

        // Canonical serialization: serde_json's Value map is ordered by key,
        // so re-serializing the parsed payload gives a deterministic byte
        // string independent of the sender's key order.
        let canonical = serde_json::to_string(&envelope.data)
            .map_err(|e| LicenseError::MalformedEnvelope(format!("canonicalize: {}", e)))?;

        let sig_bytes = BASE64
            .decode(&envelope.sig)
            .map_err(|e| LicenseError::MalformedEnvelope(format!("sig base64: {}", e)))?;
        let signature = Signature::from_slice(&sig_bytes)
            .map_err(|e| LicenseError::MalformedEnvelope(format!("sig format: {}", e)))?;

        if !self
            .keys
            .iter()
            .any(|key| key.verify(canonical.as_bytes(), &signature).is_ok())
        {
            return Err(LicenseError::BadSignature);
        }

        let claims = parse_claims(&envelope.data)?;
        if claims.expiry < Utc::now() {
            return Err(LicenseError::Expired);
        }
        Ok(claims)
    }
}

fn parse_claims(data: &serde_json::Value) -> Result<LicenseClaims, LicenseError> {
    let plan = required_str(data, "type")?;
    let serial = required_str(data, "serial")?;
    let expiry = parse_timestamp(&required_str(data, "expiry")?)
        .ok_or_else(|| LicenseError::MalformedEnvelope("unparseable expiry".to_string()))?;
    let issued_at = data
        .get("issued_at")
        .and_then(|v| v.as_str())
        .and_then(parse_timestamp);

    Ok(LicenseClaims {
        plan,
        expiry,
        serial,
        issued_at,
    })
}

fn required_str(data: &serde_json::Value, field: &str) -> Result<String, LicenseError> {
    data.get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| LicenseError::MalformedEnvelope(format!("missing field: {}", field)))
}

/// Parse an ISO-8601 timestamp, with or without an offset. Offset-free
/// timestamps (as emitted by the license tooling) are taken as UTC.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Start the user's trial on first reference, otherwise check the window.
///
/// The trial start is stamped exactly once; later calls never move it.
/// Returns whether the user currently has trial access.
pub fn start_or_check_trial(
    config_store: &UserConfigStore,
    user_id: &str,
) -> Result<bool, MonitorError> {
    let config = config_store.load(user_id);
    if config.trial_start.is_none() {
        config_store.start_trial(user_id)?;
        return Ok(true);
    }
    Ok(config.is_trial_active())
}

/// Verify a token and, on success, persist it on the user record.
///
/// Replaying a still-valid token is a harmless no-op rewrite. The reported
/// remaining days are computed from now and clamped at zero so a license on
/// its expiry day never reports a negative figure.
pub fn activate(
    verifier: &LicenseVerifier,
    config_store: &UserConfigStore,
    user_id: &str,
    token: &str,
) -> Result<LicenseActivation, MonitorError> {
    let claims = verifier.verify(token)?;
    config_store.set_license(user_id, token, claims.expiry)?;

    let remaining_days = (claims.expiry - Utc::now()).num_days().max(0);
    Ok(LicenseActivation {
        plan: claims.plan,
        expiry: claims.expiry,
        serial: claims.serial,
        remaining_days,
    })
}

/// Days of access remaining for a user, clamped at zero: the end of the
/// trial window while the trial is active, else the license expiry.
pub fn remaining_days(config: &crate::config::UserConfig) -> i64 {
    let now = Utc::now();
    if config.is_trial_active() {
        if let Some(start) = config.trial_start {
            let trial_end = start + chrono::Duration::hours(TRIAL_HOURS);
            return (trial_end - now).num_days().max(0);
        }
    }
    if config.is_license_valid() {
        if let Some(expiry) = config.license_expiry {
            return (expiry - now).num_days().max(0);
        }
    }
    0
}
