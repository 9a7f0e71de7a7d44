use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{AppError, Result};

use super::{Gateway, GatewayOrder, PaymentProbe};

const API_BASE: &str = "https://api.razorpay.com/v1";

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    id: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct OrderPaymentsResponse {
    items: Vec<PaymentEntity>,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    amount: i64,
    status: String,
    error_description: Option<String>,
}

/// Razorpay Orders API client. Stateless besides credentials; all
/// persisted state lives in the payment intent store.
#[derive(Debug, Clone)]
pub struct RazorpayClient {
    client: Client,
    key_id: String,
    key_secret: String,
}

impl RazorpayClient {
    pub fn new(key_id: &str, key_secret: &str) -> Self {
        Self {
            client: Client::new(),
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
        }
    }

    /// Map an HTTP-level failure onto the transient/terminal split.
    /// 5xx and 429 mean the gateway itself is struggling - retryable.
    /// Other 4xx mean the request can never succeed as-is.
    async fn classify_error(response: reqwest::Response) -> AppError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            AppError::GatewayUnavailable(format!("{}: {}", status, body))
        } else {
            AppError::GatewayRejected(format!("{}: {}", status, body))
        }
    }
}

#[async_trait]
impl Gateway for RazorpayClient {
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder> {
        let response = self
            .client
            .post(format!("{}/orders", API_BASE))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&serde_json::json!({
                "amount": amount_minor,
                "currency": currency,
                "receipt": receipt,
            }))
            .send()
            .await
            .map_err(|e| AppError::GatewayUnavailable(format!("order create: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::classify_error(response).await);
        }

        let order: CreateOrderResponse = response
            .json()
            .await
            .map_err(|e| AppError::GatewayUnavailable(format!("order parse: {}", e)))?;

        Ok(GatewayOrder {
            id: order.id,
            amount_minor: order.amount,
            currency: order.currency,
        })
    }

    async fn fetch_payment(&self, order_id: &str) -> Result<PaymentProbe> {
        let response = self
            .client
            .get(format!("{}/orders/{}/payments", API_BASE, order_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|e| AppError::GatewayUnavailable(format!("payment fetch: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::classify_error(response).await);
        }

        let payments: OrderPaymentsResponse = response
            .json()
            .await
            .map_err(|e| AppError::GatewayUnavailable(format!("payment parse: {}", e)))?;

        // A captured payment settles the order regardless of earlier
        // failed attempts; report failure only when nothing succeeded.
        let mut failed: Option<PaymentProbe> = None;
        for payment in payments.items {
            match payment.status.as_str() {
                "captured" => {
                    return Ok(PaymentProbe::Captured {
                        payment_id: payment.id,
                        amount_minor: payment.amount,
                    });
                }
                "failed" => {
                    failed = Some(PaymentProbe::Failed {
                        payment_id: payment.id,
                        reason: payment
                            .error_description
                            .unwrap_or_else(|| "payment failed".to_string()),
                    });
                }
                _ => {}
            }
        }

        Ok(failed.unwrap_or(PaymentProbe::Pending))
    }
}
