//! Inbound webhook signature verification.
//!
//! Signature header: `t=<unix-seconds>,v1=<hex-hmac>[,v1=<hex-hmac>...]`. The
//! signed message is `"<t>.<raw payload>"` under HMAC-SHA256 with the shared
//! secret. Several `v1` entries allow secret rotation; any match suffices.

use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;

use crate::error::ConnectorError;

type HmacSha256 = Hmac<Sha256>;

/// Name of the HTTP header carrying the signature.
pub const SIGNATURE_HEADER: &str = "Signature";

/// Maximum accepted distance between the signed timestamp and now.
pub const REPLAY_WINDOW: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    /// Decoded `v1` signatures. Entries that are not valid hex are dropped.
    pub signatures: Vec<Vec<u8>>,
}

pub fn parse_signature_header(header: &str) -> Result<SignatureHeader, ConnectorError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key.trim() {
            "t" => {
                let t = value.trim().parse::<i64>().map_err(|_| {
                    ConnectorError::Signature(format!("Invalid timestamp '{value}'"))
                })?;
                timestamp = Some(t);
            }
            "v1" => {
                if let Ok(sig) = hex::decode(value.trim()) {
                    signatures.push(sig);
                }
            }
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| ConnectorError::Signature("Missing timestamp".into()))?;
    if signatures.is_empty() {
        return Err(ConnectorError::Signature("No v1 signature present".into()));
    }
    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

fn mac_for(payload: &[u8], secret: &str, timestamp: i64) -> Result<HmacSha256, ConnectorError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ConnectorError::Signature(format!("Unusable secret: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Produce a signature header for `payload` at `timestamp`.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, ConnectorError> {
    let mac = mac_for(payload, secret, timestamp)?;
    let sig = hex::encode(mac.finalize().into_bytes());
    Ok(format!("t={timestamp},v1={sig}"))
}

/// Check `header` against `payload` as of `now` (unix seconds). Signatures
/// are compared in constant time.
pub fn verify_at(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance: Duration,
) -> Result<(), ConnectorError> {
    let parsed = parse_signature_header(header)?;

    let age = now.saturating_sub(parsed.timestamp).unsigned_abs();
    if age > tolerance.as_secs() {
        return Err(ConnectorError::Signature(format!(
            "Timestamp {} is outside the {}s replay window",
            parsed.timestamp,
            tolerance.as_secs()
        )));
    }

    let mac = mac_for(payload, secret, parsed.timestamp)?;
    let matched = parsed
        .signatures
        .iter()
        .any(|sig| mac.clone().verify_slice(sig).is_ok());
    if matched {
        Ok(())
    } else {
        Err(ConnectorError::Signature(
            "No signature matches the payload".into(),
        ))
    }
}

/// True when `header` is a valid, fresh signature of `payload` under `secret`.
pub fn verify(payload: &[u8], header: &str, secret: &str) -> bool {
    verify_at(
        payload,
        header,
        secret,
        chrono::Utc::now().timestamp(),
        REPLAY_WINDOW,
    )
    .is_ok()
}

/// A verified inbound delivery.
#[derive(Debug, Clone)]
pub struct WebhookEnvelope {
    pub payload: Vec<u8>,
    pub signature: String,
    /// The payload's `type` field, when it is a JSON object carrying one.
    pub event_type: Option<String>,
}

impl WebhookEnvelope {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ConnectorError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| ConnectorError::ProtocolError(format!("Invalid webhook payload: {e}")))
    }
}

#[derive(Deserialize)]
struct EventTypeProbe {
    #[serde(rename = "type")]
    event_type: Option<String>,
}

/// Verifier bound to one shared secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance: REPLAY_WINDOW,
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn verify(&self, payload: &[u8], header: &str) -> bool {
        self.check(payload, header).is_ok()
    }

    pub fn check(&self, payload: &[u8], header: &str) -> Result<(), ConnectorError> {
        verify_at(
            payload,
            header,
            &self.secret,
            chrono::Utc::now().timestamp(),
            self.tolerance,
        )
    }

    /// Verify and wrap a delivery, extracting its declared event type.
    pub fn open(&self, payload: Vec<u8>, header: &str) -> Result<WebhookEnvelope, ConnectorError> {
        self.check(&payload, header)?;
        let event_type = serde_json::from_slice::<EventTypeProbe>(&payload)
            .ok()
            .and_then(|p| p.event_type);
        Ok(WebhookEnvelope {
            payload,
            signature: header.to_string(),
            event_type,
        })
    }
}
