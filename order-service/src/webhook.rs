use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature header missing")]
    Missing,
    #[error("signature header malformed")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature does not match payload")]
    Mismatch,
}

/// Checks `t=<unix>,v1=<hex>` signatures: HMAC-SHA256 over `"<t>.<payload>"`.
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: &str, tolerance_secs: u64) -> Self {
        Self {
            secret: secret.to_string(),
            tolerance_secs: i64::try_from(tolerance_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn verify(&self, header: Option<&str>, payload: &[u8], now: DateTime<Utc>) -> Result<(), SignatureError> {
        let header = header.ok_or(SignatureError::Missing)?;

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
        if signatures.is_empty() {
            return Err(SignatureError::Malformed);
        }
        if (now.timestamp() - timestamp).abs() > self.tolerance_secs {
            return Err(SignatureError::Expired);
        }

        let matches = signatures.iter().any(|signature| {
            let Ok(expected) = hex::decode(signature) else {
                return false;
            };
            let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.as_bytes()) else {
                return false;
            };
            mac.update(timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(payload);
            mac.verify_slice(&expected).is_ok()
        });
        if matches {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    Succeeded,
    Failed { reason: String },
}

/// A processor's verdict on one charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSignal {
    pub event_id: String,
    pub external_reference: String,
    pub intent_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub outcome: SignalOutcome,
}

#[derive(Debug, Deserialize)]
struct Event {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChargeObject {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    last_payment_error: Option<ChargeError>,
    cancellation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChargeError {
    message: Option<String>,
}

/// Extracts a payment signal from a webhook body. Event types that do not
/// settle an order payment yield `None`.
pub fn parse_event(payload: &[u8]) -> Result<Option<PaymentSignal>, serde_json::Error> {
    let event: Event = serde_json::from_slice(payload)?;
    let succeeded = match event.event_type.as_str() {
        "payment_intent.succeeded" => true,
        "payment_intent.payment_failed" | "payment_intent.canceled" => false,
        _ => return Ok(None),
    };

    let charge: ChargeObject = serde_json::from_value(event.data.object)?;
    let metadata_id = |key: &str| charge.metadata.get(key).and_then(|value| Uuid::parse_str(value).ok());
    let intent_id = metadata_id("intent_id");
    let order_id = metadata_id("order_id");

    let outcome = if succeeded {
        SignalOutcome::Succeeded
    } else {
        let reason = charge
            .last_payment_error
            .and_then(|error| error.message)
            .or(charge.cancellation_reason)
            .unwrap_or_else(|| event.event_type.clone());
        SignalOutcome::Failed { reason }
    };

    Ok(Some(PaymentSignal {
        event_id: event.id,
        external_reference: charge.id,
        intent_id,
        order_id,
        outcome,
    }))
}
