use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use vendra_core::{
    BalanceResult, ExternalStatus, FailureKind, IntegrationConfig, NormalizedProduct, OrderPayload,
    ProviderDriver, ProviderErrorKind, StatusResult, SubmitResult,
};

use crate::http::{
    body_snippet, build_client, classify_transport_error, BALANCE_TIMEOUT, CATALOG_TIMEOUT,
    STATUS_TIMEOUT, SUBMIT_TIMEOUT,
};
use crate::normalize::{auth_header, normalize_base_url, parse_balance, remote_error_code};

/// Driver for the `Internal` provider kind: fulfills through another tenant's
/// public storefront API on this same platform. Order lookup accepts either
/// the storefront order id or the client `order_uuid`, which is what makes
/// timeout recovery possible without a second submission.
pub struct InternalStoreDriver {
    client: reqwest::Client,
}

impl InternalStoreDriver {
    pub fn new() -> Self {
        Self {
            client: build_client(),
        }
    }

    fn call_site(&self, config: &IntegrationConfig) -> Result<(String, (&'static str, String)), String> {
        let base = normalize_base_url(&config.base_url)
            .ok_or_else(|| "integration base URL is unusable".to_string())?;
        let token = config
            .token()
            .ok_or_else(|| "storefront integration requires a token credential".to_string())?;
        Ok((base, auth_header(token)))
    }
}

impl Default for InternalStoreDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Storefront order statuses as they appear on the wire.
fn map_store_status(status: &str) -> ExternalStatus {
    match status.to_ascii_uppercase().as_str() {
        "PENDING" | "PROCESSING" | "ACCEPTED" | "SENT" => ExternalStatus::Sent,
        "COMPLETED" | "DELIVERED" | "SUCCESS" => ExternalStatus::Delivered,
        "FAILED" | "REJECTED" | "CANCELLED" => ExternalStatus::Failed,
        _ => ExternalStatus::Unknown,
    }
}

fn order_id_of(body: &Value) -> Option<String> {
    body.get("id")
        .or_else(|| body.get("order_id"))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn product_from(value: &Value) -> Option<NormalizedProduct> {
    let external_id = value
        .get("id")
        .or_else(|| value.get("code"))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })?;
    let name = value
        .get("name")
        .or_else(|| value.get("title"))
        .and_then(Value::as_str)?
        .to_string();
    let price = match value.get("price") {
        Some(Value::Number(n)) => n.as_f64()?,
        Some(Value::String(s)) => s.trim().parse().ok()?,
        _ => return None,
    };
    let available = value
        .get("available")
        .or_else(|| value.get("is_active"))
        .and_then(Value::as_bool)
        .unwrap_or(true);
    Some(NormalizedProduct {
        external_id,
        name,
        price,
        currency: value
            .get("currency")
            .and_then(Value::as_str)
            .map(str::to_string),
        available,
    })
}

#[async_trait]
impl ProviderDriver for InternalStoreDriver {
    async fn get_balance(&self, config: &IntegrationConfig) -> BalanceResult {
        let (base, (header, value)) = match self.call_site(config) {
            Ok(site) => site,
            Err(message) => {
                return BalanceResult::failed(ProviderErrorKind::ConfigInvalid, message, None)
            }
        };

        let response = self
            .client
            .get(format!("{}/api/v1/me", base))
            .header(header, value)
            .timeout(BALANCE_TIMEOUT)
            .send()
            .await;
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                return BalanceResult::failed(
                    classify_transport_error(&err),
                    err.to_string(),
                    None,
                )
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(err) => {
                return BalanceResult::failed(
                    ProviderErrorKind::FetchFailed,
                    err.to_string(),
                    Some(status.as_u16()),
                )
            }
        };

        if status.is_server_error() {
            return BalanceResult::failed(
                ProviderErrorKind::Remote5xx,
                body_snippet(&text),
                Some(status.as_u16()),
            );
        }
        if !status.is_success() {
            return BalanceResult::failed(
                ProviderErrorKind::Remote(status.as_u16() as u32),
                body_snippet(&text),
                Some(status.as_u16()),
            );
        }

        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(_) => {
                return BalanceResult::failed(
                    ProviderErrorKind::BalanceParseFail,
                    body_snippet(&text),
                    Some(status.as_u16()),
                )
            }
        };

        match parse_balance(&body) {
            Ok(balance) => BalanceResult::ok(balance),
            Err(kind) => BalanceResult::failed(kind, body_snippet(&text), Some(status.as_u16())),
        }
    }

    async fn list_products(&self, config: &IntegrationConfig) -> Vec<NormalizedProduct> {
        let (base, (header, value)) = match self.call_site(config) {
            Ok(site) => site,
            Err(message) => {
                warn!(integration = %config.id, "catalog fetch skipped: {}", message);
                return Vec::new();
            }
        };

        let response = self
            .client
            .get(format!("{}/api/v1/products", base))
            .header(header, value)
            .timeout(CATALOG_TIMEOUT)
            .send()
            .await;
        let body: Value = match response {
            Ok(response) if response.status().is_success() => {
                match response.json().await {
                    Ok(body) => body,
                    Err(err) => {
                        warn!(integration = %config.id, "catalog body unreadable: {}", err);
                        return Vec::new();
                    }
                }
            }
            Ok(response) => {
                warn!(integration = %config.id, status = %response.status(), "catalog fetch failed");
                return Vec::new();
            }
            Err(err) => {
                warn!(integration = %config.id, "catalog fetch failed: {}", err);
                return Vec::new();
            }
        };

        let items = body
            .get("data")
            .and_then(Value::as_array)
            .or_else(|| body.as_array())
            .cloned()
            .unwrap_or_default();
        items.iter().filter_map(product_from).collect()
    }

    async fn submit_order(&self, config: &IntegrationConfig, order: &OrderPayload) -> SubmitResult {
        let (base, (header, value)) = match self.call_site(config) {
            Ok(site) => site,
            Err(message) => return SubmitResult::rejected(FailureKind::Config, message),
        };

        let payload = serde_json::json!({
            "package_id": order.external_package_id,
            "quantity": order.quantity,
            "fields": order.fields,
            "order_uuid": order.order_uuid,
        });

        let response = self
            .client
            .post(format!("{}/api/v1/orders", base))
            .header(header, value)
            .timeout(SUBMIT_TIMEOUT)
            .json(&payload)
            .send()
            .await;
        let response = match response {
            Ok(response) => response,
            // A timed-out submission may have reached the storefront; the
            // engine has to status-check before trying again.
            Err(err) if err.is_timeout() => return SubmitResult::ambiguous(err.to_string()),
            Err(err) => return SubmitResult::rejected(FailureKind::Transient, err.to_string()),
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.is_server_error() {
            return SubmitResult::rejected(FailureKind::Transient, body_snippet(&text));
        }

        // 409 is the storefront deduplicating on order_uuid: adopt the
        // existing order rather than failing.
        if !status.is_success() && status.as_u16() != 409 {
            return match status.as_u16() {
                401 | 403 => SubmitResult::rejected(FailureKind::Config, body_snippet(&text)),
                // 402 insufficient funds, 404 unknown package, 422 bad
                // fields: explicit rejections, none retryable.
                _ => SubmitResult::rejected(FailureKind::Permanent, body_snippet(&text)),
            };
        }

        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(_) => {
                return SubmitResult::rejected(FailureKind::Remote, body_snippet(&text));
            }
        };
        if let Some(code) = remote_error_code(&body) {
            return SubmitResult::rejected(
                FailureKind::Remote,
                format!("REMOTE_{}: {}", code, body_snippet(&text)),
            );
        }

        match order_id_of(&body) {
            Some(external_id) => {
                let external_status = body
                    .get("status")
                    .and_then(Value::as_str)
                    .map(map_store_status)
                    .unwrap_or(ExternalStatus::Sent);
                SubmitResult::accepted(external_id, external_status)
            }
            None => SubmitResult::rejected(FailureKind::Remote, body_snippet(&text)),
        }
    }

    async fn check_order_status(&self, config: &IntegrationConfig, reference: &str) -> StatusResult {
        let (base, (header, value)) = match self.call_site(config) {
            Ok(site) => site,
            Err(message) => {
                return StatusResult {
                    external_status: ExternalStatus::Unknown,
                    external_order_id: None,
                    message: Some(message),
                }
            }
        };

        let response = self
            .client
            .get(format!("{}/api/v1/orders/{}", base, reference))
            .header(header, value)
            .timeout(STATUS_TIMEOUT)
            .send()
            .await;
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                return StatusResult {
                    external_status: ExternalStatus::Unknown,
                    external_order_id: None,
                    message: Some(err.to_string()),
                }
            }
        };

        let status = response.status();
        // The storefront never saw this reference; submitting again is safe.
        if status.as_u16() == 404 {
            return StatusResult {
                external_status: ExternalStatus::NotSent,
                external_order_id: None,
                message: Some("order not found at storefront".to_string()),
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

        let external_status = body
            .get("status")
            .and_then(Value::as_str)
            .map(map_store_status)
            .unwrap_or(ExternalStatus::Unknown);
        StatusResult {
            external_status,
            external_order_id: order_id_of(&body),
            message: body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}
