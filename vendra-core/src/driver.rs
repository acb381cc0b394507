use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::integration::IntegrationConfig;

/// External lifecycle of an order as the provider sees it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalStatus {
    NotSent,
    Sent,
    Delivered,
    Failed,
    Unknown,
}

impl ExternalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalStatus::NotSent => "NOT_SENT",
            ExternalStatus::Sent => "SENT",
            ExternalStatus::Delivered => "DELIVERED",
            ExternalStatus::Failed => "FAILED",
            ExternalStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NOT_SENT" => Some(ExternalStatus::NotSent),
            "SENT" => Some(ExternalStatus::Sent),
            "DELIVERED" => Some(ExternalStatus::Delivered),
            "FAILED" => Some(ExternalStatus::Failed),
            "UNKNOWN" => Some(ExternalStatus::Unknown),
            _ => None,
        }
    }

    /// Terminal states never leave the engine again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExternalStatus::Delivered | ExternalStatus::Failed)
    }
}

/// Machine-readable kind for a failed provider fetch. Rendered into the
/// snapshot `error` column so operators see "could not fetch", never a
/// fabricated zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProviderErrorKind {
    FetchFailed,
    Timeout,
    Remote5xx,
    /// 2xx body carrying an embedded error envelope with this code.
    Remote(u32),
    BalanceParseFail,
    ConfigInvalid,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::FetchFailed => write!(f, "FETCH_FAILED"),
            ProviderErrorKind::Timeout => write!(f, "TIMEOUT"),
            ProviderErrorKind::Remote5xx => write!(f, "REMOTE_5XX"),
            ProviderErrorKind::Remote(code) => write!(f, "REMOTE_{}", code),
            ProviderErrorKind::BalanceParseFail => write!(f, "BALANCE_PARSE_FAIL"),
            ProviderErrorKind::ConfigInvalid => write!(f, "CONFIG_INVALID"),
        }
    }
}

/// How the engine should treat a failed submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Malformed base URL or credential. Terminal for the attempt; an admin
    /// has to fix the integration before the order can move.
    Config,
    /// Timeout, connect error, 5xx. Retryable with backoff.
    Transient,
    /// 2xx carrying an error envelope. Never success, never retried blindly.
    Remote,
    /// Provider explicitly declined (insufficient balance, unknown package).
    Permanent,
}

/// Balance readback. `balance` is only meaningful when `error` is `None`;
/// callers must treat an errored result as "could not determine", not zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResult {
    pub balance: f64,
    pub error: Option<ProviderErrorKind>,
    pub message: Option<String>,
    pub status: Option<u16>,
}

impl BalanceResult {
    pub fn ok(balance: f64) -> Self {
        Self {
            balance,
            error: None,
            message: None,
            status: None,
        }
    }

    pub fn failed(error: ProviderErrorKind, message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            balance: 0.0,
            error: Some(error),
            message: Some(message.into()),
            status,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// What the dispatch engine hands a driver for one submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPayload {
    /// Client-side idempotency key, echoed to providers that support one.
    pub order_uuid: Uuid,
    pub external_package_id: String,
    pub quantity: i32,
    /// Buyer-supplied parameters (player id, zone, msisdn, ...), opaque here.
    pub fields: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResult {
    pub accepted: bool,
    pub external_order_id: Option<String>,
    pub external_status: ExternalStatus,
    pub failure: Option<FailureKind>,
    pub message: Option<String>,
}

impl SubmitResult {
    pub fn accepted(external_order_id: String, status: ExternalStatus) -> Self {
        Self {
            accepted: true,
            external_order_id: Some(external_order_id),
            external_status: status,
            failure: None,
            message: None,
        }
    }

    pub fn rejected(failure: FailureKind, message: impl Into<String>) -> Self {
        // For a plain transient failure nothing reached the provider, so the
        // order stays NotSent. A timeout that may have landed must use
        // `ambiguous` instead.
        let external_status = match failure {
            FailureKind::Transient => ExternalStatus::NotSent,
            _ => ExternalStatus::Failed,
        };
        Self {
            accepted: false,
            external_order_id: None,
            external_status,
            failure: Some(failure),
            message: Some(message.into()),
        }
    }

    pub fn ambiguous(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            external_order_id: None,
            external_status: ExternalStatus::Unknown,
            failure: Some(FailureKind::Transient),
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
    pub external_status: ExternalStatus,
    pub external_order_id: Option<String>,
    pub message: Option<String>,
}

/// Uniform contract every provider adapter implements. Expected failure modes
/// come back as structured results, never as `Err`: the engine applies one
/// classification policy regardless of which provider raised the condition,
/// and batch jobs can skip a broken provider without losing the rest.
#[async_trait]
pub trait ProviderDriver: Send + Sync {
    /// Fetch the account balance at the provider.
    async fn get_balance(&self, config: &IntegrationConfig) -> BalanceResult;

    /// List the provider's purchasable products. Empty on failure by
    /// contract; callers consult the sync snapshot's error field to tell
    /// "no products" from "fetch failed".
    async fn list_products(&self, config: &IntegrationConfig) -> Vec<NormalizedProduct>;

    /// Submit one order. Must be safe to call again with the same
    /// `order_uuid` on providers that deduplicate; the engine still guards
    /// with its own idempotency check first.
    async fn submit_order(&self, config: &IntegrationConfig, order: &OrderPayload) -> SubmitResult;

    /// Look up an order. `reference` is the external order id when one is
    /// known, otherwise the client order uuid; a driver that cannot resolve
    /// a client reference reports `Unknown`.
    async fn check_order_status(&self, config: &IntegrationConfig, reference: &str) -> StatusResult;
}

/// Lookup seam between components that need a driver and the registry that
/// owns the instances. Implemented by the provider registry; test harnesses
/// substitute scripted drivers.
pub trait DriverLookup: Send + Sync {
    fn driver_for(&self, kind: crate::integration::ProviderKind) -> Option<std::sync::Arc<dyn ProviderDriver>>;
}

/// One provider product in the platform's canonical shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedProduct {
    pub external_id: String,
    pub name: String,
    pub price: f64,
    pub currency: Option<String>,
    pub available: bool,
}
