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
use crate::normalize::normalize_base_url;

const PERMANENT_CODES: [&str; 3] = ["NO_BALANCE", "UNKNOWN_SERVICE", "BAD_TARGET"];

/// Driver for the `TopupBox` provider kind: a form-flavored API authenticated
/// with an (api_id, api_key) pair in the request body, responses shaped as
/// `{"result": true|false, ...}`.
pub struct TopupBoxDriver {
    client: reqwest::Client,
}

impl TopupBoxDriver {
    pub fn new() -> Self {
        Self {
            client: build_client(),
        }
    }

    fn call_site(&self, config: &IntegrationConfig) -> Result<(String, String, String), String> {
        let base = normalize_base_url(&config.base_url)
            .ok_or_else(|| "integration base URL is unusable".to_string())?;
        let (api_id, api_secret) = config
            .key_pair()
            .ok_or_else(|| "TopupBox integration requires an id/secret credential pair".to_string())?;
        Ok((base, api_id.to_string(), api_secret.to_string()))
    }
}

impl Default for TopupBoxDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn result_flag(body: &Value) -> bool {
    body.get("result").and_then(Value::as_bool).unwrap_or(false)
}

fn failure_of(body: &Value) -> (FailureKind, String) {
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("provider rejected the request")
        .to_string();
    let permanent = body
        .get("error_code")
        .and_then(Value::as_str)
        .map(|code| PERMANENT_CODES.contains(&code))
        .unwrap_or(false);
    if permanent {
        (FailureKind::Permanent, message)
    } else {
        (FailureKind::Remote, message)
    }
}

fn map_box_status(status: &str) -> ExternalStatus {
    match status.to_ascii_lowercase().as_str() {
        "processing" | "pending" | "waiting" => ExternalStatus::Sent,
        "success" | "completed" => ExternalStatus::Delivered,
        "failed" | "canceled" | "cancelled" | "refund" => ExternalStatus::Failed,
        _ => ExternalStatus::Unknown,
    }
}

/// The buyer's destination account. Falls back to the serialized field blob
/// for packages whose input is richer than one target value.
fn target_of(fields: &Value) -> String {
    fields
        .get("target")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| fields.to_string())
}

#[async_trait]
impl ProviderDriver for TopupBoxDriver {
    async fn get_balance(&self, config: &IntegrationConfig) -> BalanceResult {
        let (base, api_id, api_key) = match self.call_site(config) {
            Ok(site) => site,
            Err(message) => {
                return BalanceResult::failed(ProviderErrorKind::ConfigInvalid, message, None)
            }
        };

        let response = self
            .client
            .post(format!("{}/api/balance", base))
            .form(&[("api_id", api_id.as_str()), ("api_key", api_key.as_str())])
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

        if !result_flag(&body) {
            let (_, message) = failure_of(&body);
            return BalanceResult::failed(
                ProviderErrorKind::Remote(status.as_u16() as u32),
                message,
                Some(status.as_u16()),
            );
        }

        // Balance arrives as a numeric string ("12500.00").
        match body.get("balance").and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }) {
            Some(balance) => BalanceResult::ok(balance),
            None => BalanceResult::failed(
                ProviderErrorKind::BalanceParseFail,
                body_snippet(&body.to_string()),
                Some(status.as_u16()),
            ),
        }
    }

    async fn list_products(&self, config: &IntegrationConfig) -> Vec<NormalizedProduct> {
        let (base, api_id, api_key) = match self.call_site(config) {
            Ok(site) => site,
            Err(message) => {
                warn!(integration = %config.id, "catalog fetch skipped: {}", message);
                return Vec::new();
            }
        };

        let body: Value = match self
            .client
            .post(format!("{}/api/pricelist", base))
            .form(&[("api_id", api_id.as_str()), ("api_key", api_key.as_str())])
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

        if !result_flag(&body) {
            return Vec::new();
        }

        body.get("data")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        Some(NormalizedProduct {
                            external_id: item.get("service").and_then(Value::as_str)?.to_string(),
                            name: item.get("name").and_then(Value::as_str)?.to_string(),
                            price: match item.get("price")? {
                                Value::Number(n) => n.as_f64()?,
                                Value::String(s) => s.trim().parse().ok()?,
                                _ => return None,
                            },
                            currency: None,
                            available: item.get("status").and_then(Value::as_str)
                                != Some("empty"),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn submit_order(&self, config: &IntegrationConfig, order: &OrderPayload) -> SubmitResult {
        let (base, api_id, api_key) = match self.call_site(config) {
            Ok(site) => site,
            Err(message) => return SubmitResult::rejected(FailureKind::Config, message),
        };

        let quantity = order.quantity.to_string();
        let custom_id = order.order_uuid.to_string();
        let target = target_of(&order.fields);
        let form = [
            ("api_id", api_id.as_str()),
            ("api_key", api_key.as_str()),
            ("service", order.external_package_id.as_str()),
            ("quantity", quantity.as_str()),
            ("target", target.as_str()),
            ("custom_id", custom_id.as_str()),
        ];

        let response = self
            .client
            .post(format!("{}/api/order", base))
            .form(&form)
            .timeout(SUBMIT_TIMEOUT)
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

        if !result_flag(&body) {
            let (kind, message) = failure_of(&body);
            return SubmitResult::rejected(kind, message);
        }

        match body.get("order_id").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }) {
            Some(order_id) => {
                let external_status = body
                    .get("status")
                    .and_then(Value::as_str)
                    .map(map_box_status)
                    .unwrap_or(ExternalStatus::Sent);
                SubmitResult::accepted(order_id, external_status)
            }
            None => SubmitResult::rejected(FailureKind::Remote, body_snippet(&body.to_string())),
        }
    }

    async fn check_order_status(&self, config: &IntegrationConfig, reference: &str) -> StatusResult {
        let (base, api_id, api_key) = match self.call_site(config) {
            Ok(site) => site,
            Err(message) => {
                return StatusResult {
                    external_status: ExternalStatus::Unknown,
                    external_order_id: None,
                    message: Some(message),
                }
            }
        };

        // Client uuids go out as custom_id, provider ids as order_id.
        let id_field = if Uuid::parse_str(reference).is_ok() {
            "custom_id"
        } else {
            "order_id"
        };
        let form = [
            ("api_id", api_id.as_str()),
            ("api_key", api_key.as_str()),
            (id_field, reference),
        ];

        let response = match self
            .client
            .post(format!("{}/api/status", base))
            .form(&form)
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

        if !result_flag(&body) {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            // "Order not found" means the submission never landed; anything
            // else leaves the state unresolved.
            let external_status = if message.to_ascii_lowercase().contains("not found") {
                ExternalStatus::NotSent
            } else {
                ExternalStatus::Unknown
            };
            return StatusResult {
                external_status,
                external_order_id: None,
                message: Some(message.to_string()),
            };
        }

        StatusResult {
            external_status: body
                .get("status")
                .and_then(Value::as_str)
                .map(map_box_status)
                .unwrap_or(ExternalStatus::Unknown),
            external_order_id: body.get("order_id").and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }),
            message: body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}
