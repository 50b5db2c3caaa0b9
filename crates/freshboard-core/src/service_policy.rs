use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Rate budget and credential requirements of one external service.
///
/// Every dependency naming the same `serviceName` shares this policy and its
/// rate limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePolicy {
    pub service_name: String,
    #[serde(default = "default_quota_window_ms")]
    pub quota_window_ms: u64,
    #[serde(default = "default_quota_limit")]
    pub quota_limit: u32,
    #[serde(default)]
    pub requires_auth: bool,
    /// Env var holding the credential, checked before the
    /// `FRESHBOARD_<SERVICE>_TOKEN` convention.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_ms: Option<u64>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_quota_window_ms() -> u64 {
    60_000
}

fn default_quota_limit() -> u32 {
    60
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl ServicePolicy {
    /// Policy used for services that have no explicit entry: 60 calls per
    /// minute, no credential.
    pub fn default_for(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            quota_window_ms: default_quota_window_ms(),
            quota_limit: default_quota_limit(),
            requires_auth: false,
            credential_env: None,
            estimated_duration_ms: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    pub fn with_quota(mut self, window: Duration, limit: u32) -> Self {
        self.quota_window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self.quota_limit = limit;
        self
    }

    pub fn requiring_auth(mut self, credential_env: impl Into<String>) -> Self {
        self.requires_auth = true;
        self.credential_env = Some(credential_env.into());
        self
    }

    pub fn quota_window(&self) -> Duration {
        Duration::from_millis(self.quota_window_ms)
    }

    /// Conventional env var name, e.g. `FRESHBOARD_BILLING_API_TOKEN`.
    pub fn conventional_env(&self) -> String {
        let normalized = self
            .service_name
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() {
                    ch.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect::<String>();
        format!("FRESHBOARD_{normalized}_TOKEN")
    }
}

/// Source of service credentials: explicit values first, then env vars.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    explicit: HashMap<String, String>,
    read_env: bool,
}

impl CredentialStore {
    /// Reads credentials from the environment.
    pub fn from_env() -> Self {
        Self {
            explicit: HashMap::new(),
            read_env: true,
        }
    }

    /// Only explicitly inserted credentials are visible.
    pub fn isolated() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, service_name: impl Into<String>, token: impl Into<String>) -> Self {
        self.explicit.insert(service_name.into(), token.into());
        self
    }

    pub fn token_for(&self, policy: &ServicePolicy) -> Option<String> {
        if let Some(token) = self.explicit.get(&policy.service_name) {
            return Some(token.clone());
        }
        if !self.read_env {
            return None;
        }

        policy
            .credential_env
            .as_deref()
            .and_then(|name| env::var(name).ok())
            .or_else(|| env::var(policy.conventional_env()).ok())
            .filter(|token| !token.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_documented_budget() {
        let policy = ServicePolicy::default_for("billing");

        assert_eq!(policy.quota_window(), Duration::from_secs(60));
        assert_eq!(policy.quota_limit, 60);
        assert!(!policy.requires_auth);
    }

    #[test]
    fn conventional_env_is_uppercased_and_sanitized() {
        let policy = ServicePolicy::default_for("billing-api.v2");
        assert_eq!(policy.conventional_env(), "FRESHBOARD_BILLING_API_V2_TOKEN");
    }

    #[test]
    fn explicit_tokens_win_and_isolated_store_ignores_env() {
        let policy = ServicePolicy::default_for("billing").requiring_auth("PATH");

        let isolated = CredentialStore::isolated();
        assert_eq!(isolated.token_for(&policy), None);

        let explicit = CredentialStore::isolated().with_token("billing", "secret");
        assert_eq!(explicit.token_for(&policy).as_deref(), Some("secret"));
    }

    #[test]
    fn policy_deserializes_with_defaults() {
        let policy: ServicePolicy =
            serde_json::from_str(r#"{ "serviceName": "usage", "quotaLimit": 5 }"#).expect("parses");

        assert_eq!(policy.quota_limit, 5);
        assert_eq!(policy.quota_window_ms, 60_000);
        assert_eq!(policy.request_timeout_ms, 10_000);
    }
}
