//! Token endpoint payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Token endpoint response as handed back to callers of the authorization-code grant.
///
/// `refresh_token` is only present on first authorization or when the provider rotates it.
/// Identity claims (`email`, `sub`) may be lifted from `id_token` into `extra`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    #[serde(flatten)]
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let refresh_token = self.refresh_token.as_ref().map(|_| "<redacted>");
        let id_token = self.id_token.as_ref().map(|_| "<redacted>");
        let extra_keys: Vec<&String> = self.extra.keys().collect();

        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &refresh_token)
            .field("scope", &self.scope)
            .field("id_token", &id_token)
            .field("extra_keys", &extra_keys)
            .finish()
    }
}

/// Access token served by the compute metadata server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetadataToken {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}
