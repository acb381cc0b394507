use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use vendra_core::{
    BalanceResult, ExternalStatus, FailureKind, IntegrationConfig, NormalizedProduct, OrderPayload,
    ProviderDriver, ProviderErrorKind, StatusResult, SubmitResult,
};

use crate::http::{
    body_snippet, build_client, classify_transport_error, BALANCE_TIMEOUT, CATALOG_TIMEOUT,
    STATUS_TIMEOUT, SUBMIT_TIMEOUT,
};
use crate::normalize::{normalize_base_url, normalize_credential};

/// Rejection codes PinDeck documents as final.
const PERMANENT_CODES: [&str; 3] = ["INSUFFICIENT_BALANCE", "INVALID_PRODUCT", "INVALID_TARGET"];

/// Driver for the `PinDeck` provider kind: bearer-token JSON API where every
/// response is wrapped in a `{"status": "success"|"error", "data": ...}`
/// envelope.
pub struct PinDeckDriver {
    client: reqwest::Client,
}

impl PinDeckDriver {
    pub fn new() -> Self {
        Self {
            client: build_client(),
        }
    }

    fn call_site(&self, config: &IntegrationConfig) -> Result<(String, String), String> {
        let base = normalize_base_url(&config.base_url)
            .ok_or_else(|| "integration base URL is unusable".to_string())?;
        let token = config
            .token()
            .ok_or_else(|| "PinDeck integration requires a token credential".to_string())?;
        Ok((base, format!("Bearer {}", normalize_credential(token))))
    }
}

impl Default for PinDeckDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn envelope_error(body: &Value) -> Option<(Option<String>, String)> {
    if body.get("status").and_then(Value::as_str) != Some("error") {
        return None;
    }
    let code = body
        .get("error_code")
        .and_then(Value::as_str)
        .map(str::to_string);
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("provider error")
        .to_string();
    Some((code, message))
}

fn map_pindeck_status(status: &str) -> ExternalStatus {
    match status.to_ascii_lowercase().as_str() {
        "pending" | "processing" => ExternalStatus::Sent,
        "success" => ExternalStatus::Delivered,
        "failed" | "refunded" => ExternalStatus::Failed,
        _ => ExternalStatus::Unknown,
    }
}

#[async_trait]
impl ProviderDriver for PinDeckDriver {
    async fn get_balance(&self, config: &IntegrationConfig) -> BalanceResult {
        let (base, auth) = match self.call_site(config) {
            Ok(site) => site,
            Err(message) => {
                return BalanceResult::failed(ProviderErrorKind::ConfigInvalid, message, None)
            }
        };

        let response = self
            .client
            .get(format!("{}/v2/account/balance", base))
            .header("Authorization", auth)
            .timeout(BALANCE_TIMEOUT)
            .send()
            .await;
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                return BalanceResult::failed(classify_transport_error(&err), err.to_string(), None)
            }
        };

        let status = response.status();
        if status.is_server_error() {
            return BalanceResult::failed(
                ProviderErrorKind::Remote5xx,
                format!("HTTP {}", status),
                Some(status.as_u16()),
            );
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                return BalanceResult::failed(
                    ProviderErrorKind::BalanceParseFail,
                    err.to_string(),
                    Some(status.as_u16()),
                )
            }
        };

        if let Some((_, message)) = envelope_error(&body) {
            return BalanceResult::failed(
                ProviderErrorKind::Remote(status.as_u16() as u32),
                message,
                Some(status.as_u16()),
            );
        }

        match body
            .get("data")
            .and_then(|d| d.get("balance"))
            .and_then(Value::as_f64)
        {
            Some(balance) => BalanceResult::ok(balance),
            None => BalanceResult::failed(
                ProviderErrorKind::BalanceParseFail,
                body_snippet(&body.to_string()),
                Some(status.as_u16()),
            ),
        }
    }

    async fn list_products(&self, config: &IntegrationConfig) -> Vec<NormalizedProduct> {
        let (base, auth) = match self.call_site(config) {
            Ok(site) => site,
            Err(message) => {
                warn!(integration = %config.id, "catalog fetch skipped: {}", message);
                return Vec::new();
            }
        };

        let body: Value = match self
            .client
            .get(format!("{}/v2/products", base))
            .header("Authorization", auth)
            .timeout(CATALOG_TIMEOUT)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => match response.json().await {
                Ok(body) => body,
                Err(err) => {
                    warn!(integration = %config.id, "catalog body unreadable: {}", err);
                    return Vec::new();
                }
            },
            Ok(response) => {
                warn!(integration = %config.id, status = %response.status(), "catalog fetch failed");
                return Vec::new();
            }
            Err(err) => {
                warn!(integration = %config.id, "catalog fetch failed: {}", err);
                return Vec::new();
            }
        };

        if envelope_error(&body).is_some() {
            return Vec::new();
        }

        body.get("data")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        Some(NormalizedProduct {
                            external_id: item.get("code").and_then(Value::as_str)?.to_string(),
                            name: item.get("title").and_then(Value::as_str)?.to_string(),
                            price: item.get("price").and_then(Value::as_f64)?,
                            currency: item
                                .get("currency")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            available: item
                                .get("enabled")
                                .and_then(Value::as_bool)
                                .unwrap_or(true),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn submit_order(&self, config: &IntegrationConfig, order: &OrderPayload) -> SubmitResult {
        let (base, auth) = match self.call_site(config) {
            Ok(site) => site,
            Err(message) => return SubmitResult::rejected(FailureKind::Config, message),
        };

        let payload = serde_json::json!({
            "product_code": order.external_package_id,
            "quantity": order.quantity,
            "ref_id": order.order_uuid,
            "fields": order.fields,
        });

        let response = self
            .client
            .post(format!("{}/v2/orders", base))
            .header("Authorization", auth)
            .timeout(SUBMIT_TIMEOUT)
            .json(&payload)
            .send()
            .await;
        let response = match response {
            Ok(response) => response,
            Err(err) if err.is_timeout() => return SubmitResult::ambiguous(err.to_string()),
            Err(err) => return SubmitResult::rejected(FailureKind::Transient, err.to_string()),
        };

        let status = response.status();
        if status.is_server_error() {
            return SubmitResult::rejected(FailureKind::Transient, format!("HTTP {}", status));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return SubmitResult::rejected(FailureKind::Config, format!("HTTP {}", status));
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(err) => return SubmitResult::rejected(FailureKind::Remote, err.to_string()),
        };

        if let Some((code, message)) = envelope_error(&body) {
            let permanent = code
                .as_deref()
                .map(|c| PERMANENT_CODES.contains(&c))
                .unwrap_or(false);
            let kind = if permanent {
                FailureKind::Permanent
            } else {
                FailureKind::Remote
            };
            return SubmitResult::rejected(kind, message);
        }

        let data = body.get("data").cloned().unwrap_or(Value::Null);
        match data.get("trx_id").and_then(Value::as_str) {
            Some(trx_id) => {
                let external_status = data
                    .get("status")
                    .and_then(Value::as_str)
                    .map(map_pindeck_status)
                    .unwrap_or(ExternalStatus::Sent);
                SubmitResult::accepted(trx_id.to_string(), external_status)
            }
            None => SubmitResult::rejected(
                FailureKind::Remote,
                body_snippet(&body.to_string()),
            ),
        }
    }

    async fn check_order_status(&self, config: &IntegrationConfig, reference: &str) -> StatusResult {
        let (base, auth) = match self.call_site(config) {
            Ok(site) => site,
            Err(message) => {
                return StatusResult {
                    external_status: ExternalStatus::Unknown,
                    external_order_id: None,
                    message: Some(message),
                }
            }
        };

        // A uuid reference is our ref_id; anything else is PinDeck's trx id.
        let url = if Uuid::parse_str(reference).is_ok() {
            format!("{}/v2/orders?ref_id={}", base, reference)
        } else {
            format!("{}/v2/orders/{}", base, reference)
        };

        let response = match self
            .client
            .get(url)
            .header("Authorization", auth)
            .timeout(STATUS_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                return StatusResult {
                    external_status: ExternalStatus::Unknown,
                    external_order_id: None,
                    message: Some(err.to_string()),
                }
            }
        };

        if response.status().as_u16() == 404 {
            return StatusResult {
                external_status: ExternalStatus::NotSent,
                external_order_id: None,
                message: Some("order not found at provider".to_string()),
            };
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                return StatusResult {
                    external_status: ExternalStatus::Unknown,
                    external_order_id: None,
                    message: Some(err.to_string()),
                }
            }
        };

        if let Some((_, message)) = envelope_error(&body) {
            return StatusResult {
                external_status: ExternalStatus::Unknown,
                external_order_id: None,
                message: Some(message),
            };
        }

        let data = body.get("data").cloned().unwrap_or(Value::Null);
        StatusResult {
            external_status: data
                .get("status")
                .and_then(Value::as_str)
                .map(map_pindeck_status)
                .unwrap_or(ExternalStatus::Unknown),
            external_order_id: data
                .get("trx_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            message: data
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}
