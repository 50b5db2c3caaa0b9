use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::adapters::records_from_json;
use crate::data_source::{
    AdapterCapabilities, AdapterFuture, FetchRequest, FetchedData, Record, SourceAdapter,
    SourceCheck, SourceError,
};
use crate::refresh::ProgressStage;
use crate::service_client::{ServiceClient, ServiceError, ServiceRequest};
use crate::service_policy::{CredentialStore, ServicePolicy};
use crate::throttling::ServiceRateLimiters;
use crate::validation::validate_records;
use crate::{DataSourceConfig, RefreshMethod, UtcDateTime};

/// Adapter for data polled from external services.
///
/// Every request spends one token of the service's bucket. Services without
/// a configured policy get [`ServicePolicy::default_for`].
pub struct PollingServiceAdapter {
    client: Arc<dyn ServiceClient>,
    policies: HashMap<String, ServicePolicy>,
    limiters: ServiceRateLimiters,
    credentials: CredentialStore,
    last_success: Mutex<HashMap<String, UtcDateTime>>,
}

impl PollingServiceAdapter {
    pub fn new(client: Arc<dyn ServiceClient>) -> Self {
        Self {
            client,
            policies: HashMap::new(),
            limiters: ServiceRateLimiters::new(),
            credentials: CredentialStore::from_env(),
            last_success: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: ServicePolicy) -> Self {
        self.policies.insert(policy.service_name.clone(), policy);
        self
    }

    pub fn with_policies(mut self, policies: impl IntoIterator<Item = ServicePolicy>) -> Self {
        for policy in policies {
            self.policies.insert(policy.service_name.clone(), policy);
        }
        self
    }

    pub fn with_credentials(mut self, credentials: CredentialStore) -> Self {
        self.credentials = credentials;
        self
    }

    /// Shares buckets with another adapter or a host-side caller.
    pub fn with_rate_limiters(mut self, limiters: ServiceRateLimiters) -> Self {
        self.limiters = limiters;
        self
    }

    pub fn policy_for(&self, service_name: &str) -> ServicePolicy {
        self.policies
            .get(service_name)
            .cloned()
            .unwrap_or_else(|| ServicePolicy::default_for(service_name))
    }

    fn service_name(source: &DataSourceConfig) -> Result<&str, SourceError> {
        source
            .service_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| SourceError::invalid_request("polled source has no serviceName"))
    }

    fn lock_last_success(&self) -> std::sync::MutexGuard<'_, HashMap<String, UtcDateTime>> {
        self.last_success
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn poll_endpoint(
        &self,
        request: &FetchRequest<'_>,
        policy: &ServicePolicy,
        token: Option<String>,
        endpoint: &str,
    ) -> Result<Vec<Record>, SourceError> {
        request
            .progress
            .report(ProgressStage::Connecting, format!("requesting {endpoint}"));
        self.limiters.acquire(policy).map_err(|wait| {
            SourceError::rate_limited(format!(
                "rate budget of service '{}' exhausted; next slot in {}ms",
                policy.service_name,
                wait.as_millis()
            ))
        })?;

        let call = ServiceRequest::new(endpoint)
            .with_params(request.source.params.clone())
            .with_auth_token(token)
            .with_timeout_ms(policy.request_timeout_ms);
        let response = self.client.call(call).await.map_err(|error| {
            tracing::debug!(
                event = "core.adapter.polling.call_failed",
                service = %policy.service_name,
                endpoint,
                code = error.code(),
                retryable = error.retryable()
            );
            classify(&error)
        })?;

        request
            .progress
            .report(ProgressStage::Downloading, format!("received {endpoint}"));
        request.progress.report(ProgressStage::Parsing, "json");
        records_from_json(response.data).map_err(|message| {
            SourceError::validation(format!("unexpected payload from {endpoint}: {message}"))
        })
    }
}

/// Maps a provider failure onto the adapter error taxonomy.
fn classify(error: &ServiceError) -> SourceError {
    let message = error.message().to_owned();
    match error.status() {
        Some(401 | 403) => SourceError::unauthorized(message),
        Some(408) => SourceError::timeout(message),
        Some(429) => SourceError::rate_limited(message),
        Some(404) => SourceError::not_found(message),
        Some(500..=599) => SourceError::unavailable(message),
        Some(400..=499) => SourceError::invalid_request(message),
        _ if error.code() == "timeout" => SourceError::timeout(message),
        _ if error.retryable() => SourceError::unavailable(message),
        _ => SourceError::invalid_request(message),
    }
}

impl SourceAdapter for PollingServiceAdapter {
    fn name(&self) -> &'static str {
        "polling"
    }

    fn check<'a>(&'a self, source: &'a DataSourceConfig) -> AdapterFuture<'a, SourceCheck> {
        Box::pin(async move {
            let last_success = self.lock_last_success();
            let polled = source
                .location
                .iter()
                .map(|endpoint| last_success.get(endpoint).copied())
                .collect::<Option<Vec<_>>>();

            Ok(match polled.and_then(|times| times.into_iter().min()) {
                Some(oldest) => SourceCheck::available_at(oldest, None),
                None => SourceCheck::unavailable(),
            })
        })
    }

    fn fetch<'a>(&'a self, request: FetchRequest<'a>) -> AdapterFuture<'a, FetchedData> {
        Box::pin(async move {
            let service_name = Self::service_name(request.source)?;
            let policy = self.policy_for(service_name);
            let token = self.credentials.token_for(&policy);
            if policy.requires_auth && token.is_none() {
                return Err(SourceError::unauthorized(format!(
                    "no credential configured for service '{service_name}'"
                )));
            }

            let mut records = Vec::new();
            let mut polled = Vec::new();
            for endpoint in request.source.location.iter() {
                records.extend(
                    self.poll_endpoint(&request, &policy, token.clone(), endpoint)
                        .await?,
                );
                polled.push(endpoint.to_owned());
            }

            request.progress.report(
                ProgressStage::Validating,
                format!("{} records", records.len()),
            );
            validate_records(request.validation, &records, request.validators)?;

            let now = UtcDateTime::now();
            let mut last_success = self.lock_last_success();
            for endpoint in polled {
                last_success.insert(endpoint, now);
            }

            Ok(FetchedData {
                records,
                last_updated_at: now,
            })
        })
    }

    fn capabilities(&self, source: &DataSourceConfig) -> AdapterCapabilities {
        let Some(service_name) = source.service_name.as_deref() else {
            return AdapterCapabilities {
                available_methods: Vec::new(),
                requires_auth: false,
                estimated_duration_ms: None,
            };
        };

        let policy = self.policy_for(service_name);
        let available_methods = if source.refresh_method == RefreshMethod::Never {
            Vec::new()
        } else {
            vec![RefreshMethod::ApiPoll, RefreshMethod::UserTrigger]
        };

        AdapterCapabilities {
            available_methods,
            requires_auth: policy.requires_auth && self.credentials.token_for(&policy).is_none(),
            estimated_duration_ms: policy.estimated_duration_ms,
        }
    }
}
