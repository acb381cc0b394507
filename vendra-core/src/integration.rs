use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vendra_shared::Masked;

/// Closed set of external provider families. Adding a provider means adding a
/// variant here and a driver implementation; kinds are never matched by string
/// in the dispatch path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderKind {
    /// Another tenant's public storefront API on this platform.
    Internal,
    PinDeck,
    TopupBox,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Internal => "INTERNAL",
            ProviderKind::PinDeck => "PIN_DECK",
            ProviderKind::TopupBox => "TOPUP_BOX",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INTERNAL" => Some(ProviderKind::Internal),
            "PIN_DECK" => Some(ProviderKind::PinDeck),
            "TOPUP_BOX" => Some(ProviderKind::TopupBox),
            _ => None,
        }
    }
}

/// Credential material for one integration. The shape must match the provider
/// kind; drivers verify at call time and report a config failure instead of
/// guessing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Credential {
    Token { token: Masked<String> },
    KeyPair { api_id: String, api_secret: Masked<String> },
}

/// One tenant-provider pairing. Owned by admin tooling; the dispatch core and
/// sync jobs only ever read it, and re-read it on every attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub kind: ProviderKind,
    pub base_url: String,
    pub credential: Credential,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntegrationConfig {
    pub fn new(
        tenant_id: Uuid,
        kind: ProviderKind,
        base_url: String,
        credential: Credential,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            kind,
            base_url,
            credential,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Token credential if present, regardless of prefix decoration.
    pub fn token(&self) -> Option<&str> {
        match &self.credential {
            Credential::Token { token } => Some(token.expose()),
            Credential::KeyPair { .. } => None,
        }
    }

    pub fn key_pair(&self) -> Option<(&str, &str)> {
        match &self.credential {
            Credential::KeyPair { api_id, api_secret } => {
                Some((api_id.as_str(), api_secret.expose()))
            }
            Credential::Token { .. } => None,
        }
    }
}
