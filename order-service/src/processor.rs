use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use shared::{Money, PaymentIntent};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("processor rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

pub struct ChargeRequest<'a> {
    pub intent: &'a PaymentIntent,
    /// Platform commission retained from the charge.
    pub application_fee: Money,
    pub currency: &'a str,
    /// The restaurant's connected account the charge is made on.
    pub connected_account: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorCharge {
    pub external_reference: String,
    pub client_secret: String,
}

/// What the processor did with a charge we asked it to cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Canceled now or earlier; it can no longer be paid.
    Canceled,
    /// The diner paid before the cancel arrived.
    AlreadySucceeded,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_charge(&self, request: ChargeRequest<'_>) -> Result<ProcessorCharge, ProcessorError>;

    async fn cancel_charge(
        &self,
        external_reference: &str,
        connected_account: &str,
    ) -> Result<CancelOutcome, ProcessorError>;
}

/// Stripe Connect payment intents, created directly on the restaurant's
/// connected account with the platform fee as `application_fee_amount`.
pub struct StripeProcessor {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
    code: Option<String>,
    payment_intent: Option<StripeIntentState>,
}

#[derive(Debug, Deserialize)]
struct StripeIntentState {
    status: String,
}

/// Reads the outcome of a refused cancel: Stripe answers
/// `payment_intent_unexpected_state` with the intent's current status.
fn cancel_refusal(detail: &StripeErrorDetail) -> Option<CancelOutcome> {
    if detail.code.as_deref() != Some("payment_intent_unexpected_state") {
        return None;
    }
    match detail.payment_intent.as_ref()?.status.as_str() {
        "canceled" => Some(CancelOutcome::Canceled),
        "succeeded" => Some(CancelOutcome::AlreadySucceeded),
        _ => None,
    }
}

impl StripeProcessor {
    pub fn new(api_base: &str, secret_key: &str) -> Result<Self, ProcessorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    fn form(request: &ChargeRequest<'_>) -> Vec<(&'static str, String)> {
        let intent = request.intent;
        let item_ids = intent
            .covered_item_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        vec![
            ("amount", intent.amount.cents().to_string()),
            ("currency", request.currency.to_string()),
            ("application_fee_amount", request.application_fee.cents().to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("metadata[intent_id]", intent.id.to_string()),
            ("metadata[order_id]", intent.order_id.to_string()),
            ("metadata[table_id]", intent.table_id.to_string()),
            ("metadata[payment_type]", intent.payment_type.to_string()),
            ("metadata[customer_name]", intent.customer_name.clone().unwrap_or_default()),
            ("metadata[item_ids]", item_ids),
        ]
    }
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    async fn create_charge(&self, request: ChargeRequest<'_>) -> Result<ProcessorCharge, ProcessorError> {
        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .basic_auth(&self.secret_key, Some(""))
            .header("Stripe-Account", request.connected_account)
            .header("Idempotency-Key", request.intent.id.to_string())
            .form(&Self::form(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<StripeErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or_else(|| "no error message".to_string());
            return Err(ProcessorError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let created: StripePaymentIntent = response.json().await?;
        info!(
            "Created processor charge {} for intent {} ({} + fee {})",
            created.id, request.intent.id, request.intent.amount, request.application_fee
        );
        Ok(ProcessorCharge {
            external_reference: created.id,
            client_secret: created.client_secret,
        })
    }

    async fn cancel_charge(
        &self,
        external_reference: &str,
        connected_account: &str,
    ) -> Result<CancelOutcome, ProcessorError> {
        let response = self
            .client
            .post(format!("{}/v1/payment_intents/{}/cancel", self.api_base, external_reference))
            .basic_auth(&self.secret_key, Some(""))
            .header("Stripe-Account", connected_account)
            .form(&[("cancellation_reason", "abandoned")])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!("Canceled processor charge {}", external_reference);
            return Ok(CancelOutcome::Canceled);
        }

        let detail = response.json::<StripeErrorBody>().await.ok().map(|body| body.error);
        if let Some(outcome) = detail.as_ref().and_then(cancel_refusal) {
            return Ok(outcome);
        }
        Err(ProcessorError::Rejected {
            status: status.as_u16(),
            message: detail
                .and_then(|detail| detail.message)
                .unwrap_or_else(|| "no error message".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;
    use shared::{IntentStatus, PaymentType};
    use uuid::Uuid;

    use super::*;

    #[test]
    fn charge_form_declares_fee_and_metadata() {
        let item = Uuid::new_v4();
        let intent = PaymentIntent {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            table_id: Uuid::new_v4(),
            restaurant_id: Uuid::new_v4(),
            amount: Money::from_cents(3050).unwrap(),
            payment_type: PaymentType::Table,
            covered_item_ids: BTreeSet::from([item]),
            customer_name: None,
            status: IntentStatus::Pending,
            external_reference: None,
            failure_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let request = ChargeRequest {
            intent: &intent,
            application_fee: Money::from_cents(92).unwrap(),
            currency: "eur",
            connected_account: "acct_123",
        };

        let form = StripeProcessor::form(&request);
        let field = |name: &str| {
            form.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.clone())
        };
        assert_eq!(field("amount").as_deref(), Some("3050"));
        assert_eq!(field("application_fee_amount").as_deref(), Some("92"));
        assert_eq!(field("metadata[intent_id]"), Some(intent.id.to_string()));
        assert_eq!(field("metadata[payment_type]").as_deref(), Some("table"));
        assert_eq!(field("metadata[item_ids]"), Some(item.to_string()));
        assert_eq!(field("metadata[customer_name]").as_deref(), Some(""));
    }

    #[test]
    fn refused_cancel_reports_the_charge_state() {
        let refusal = |body: serde_json::Value| {
            let body: StripeErrorBody = serde_json::from_value(body).unwrap();
            cancel_refusal(&body.error)
        };

        let paid = serde_json::json!({"error": {
            "code": "payment_intent_unexpected_state",
            "message": "This PaymentIntent could not be canceled.",
            "payment_intent": {"id": "pi_1", "status": "succeeded"}
        }});
        assert_eq!(refusal(paid), Some(CancelOutcome::AlreadySucceeded));

        let canceled = serde_json::json!({"error": {
            "code": "payment_intent_unexpected_state",
            "payment_intent": {"id": "pi_1", "status": "canceled"}
        }});
        assert_eq!(refusal(canceled), Some(CancelOutcome::Canceled));

        let processing = serde_json::json!({"error": {
            "code": "payment_intent_unexpected_state",
            "payment_intent": {"id": "pi_1", "status": "processing"}
        }});
        assert_eq!(refusal(processing), None);

        let auth = serde_json::json!({"error": {"message": "Invalid API Key provided"}});
        assert_eq!(refusal(auth), None);
    }
}
