use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::DispatchConfig;
use crate::discovery::DiscoveryCache;
use crate::dispatch::policy::ProtocolPolicy;
use crate::error::{CancelReason, DispatchError, ServiceError};
use crate::observability::metrics;
use crate::resilience::{BreakerError, BreakerRegistry, LimiterRegistry, RateLimiter, RetryPolicy, Retrying};
use crate::transport::{CallContext, MessageRequest, MessageResponse, Protocol, Transport};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Routes messages to transports under breaker, limiter and discovery policy.
///
/// Safe to share between tasks; every piece of mutable state lives behind
/// the per-resource locks in the registries and the discovery cache.
pub struct Dispatcher {
    transports: HashMap<Protocol, Arc<dyn Transport>>,
    breakers: BreakerRegistry,
    limiters: Option<LimiterRegistry>,
    discovery: Option<DiscoveryCache>,
    fallback_order: Vec<Protocol>,
    default_timeout: Duration,
    wait_for_token: bool,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn discovery(&self) -> Option<&DiscoveryCache> {
        self.discovery.as_ref()
    }

    pub fn has_transport(&self, protocol: Protocol) -> bool {
        self.transports.contains_key(&protocol)
    }

    pub fn fallback_order(&self) -> &[Protocol] {
        &self.fallback_order
    }

    /// Send `request` according to `policy`.
    pub async fn send(
        &self,
        request: &MessageRequest,
        policy: ProtocolPolicy,
    ) -> Result<MessageResponse, DispatchError> {
        self.send_with_cancel(request, policy, &CancellationToken::new())
            .await
    }

    /// Like [`send`](Self::send), abandoning the call when `cancel` fires.
    ///
    /// One deadline, taken from the request timeout or the dispatcher
    /// default, covers every attempt of a fallback chain.
    pub async fn send_with_cancel(
        &self,
        request: &MessageRequest,
        policy: ProtocolPolicy,
        cancel: &CancellationToken,
    ) -> Result<MessageResponse, DispatchError> {
        let span = tracing::info_span!(
            "dispatch",
            request_id = %request.request_id(),
            target = %request.target(),
            %policy
        );
        self.dispatch(request, policy, cancel).instrument(span).await
    }

    async fn dispatch(
        &self,
        request: &MessageRequest,
        policy: ProtocolPolicy,
        cancel: &CancellationToken,
    ) -> Result<MessageResponse, DispatchError> {
        let timeout = if request.timeout().is_zero() {
            self.default_timeout
        } else {
            request.timeout()
        };
        // A timeout too large for the clock, such as `Duration::MAX`, means no deadline.
        let deadline = Instant::now().checked_add(timeout);
        let chained = policy == ProtocolPolicy::Fallback;

        let mut last_error = None;
        for protocol in policy.candidates(request.target(), &self.fallback_order) {
            let Some(transport) = self.transports.get(&protocol) else {
                if chained {
                    tracing::debug!(%protocol, "No transport registered, skipping");
                    continue;
                }
                return Err(DispatchError::ProtocolUnsupported(protocol.to_string()));
            };

            let start = Instant::now();
            let result = self
                .attempt(protocol, transport.as_ref(), request, deadline, cancel)
                .await;
            metrics::record_dispatch(protocol, outcome_label(&result), start);

            match result {
                Ok(response) => return Ok(response),
                Err(err @ DispatchError::Cancelled(_)) => return Err(err),
                Err(err) => {
                    if chained {
                        tracing::debug!(%protocol, error = %err, "Attempt failed, trying next protocol");
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DispatchError::ProtocolUnsupported(format!("no transport registered for policy {}", policy))
        }))
    }

    async fn attempt(
        &self,
        protocol: Protocol,
        transport: &dyn Transport,
        request: &MessageRequest,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<MessageResponse, DispatchError> {
        let endpoint = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DispatchError::Cancelled(CancelReason::Cancelled)),
            _ = expired(deadline) => {
                return Err(DispatchError::Cancelled(CancelReason::DeadlineExceeded))
            }
            resolved = self.resolve(protocol, request.target()) => resolved?,
        };

        if let Some(limiters) = &self.limiters {
            let limiter = limiters.get(protocol);
            if !self.admit(&limiter, deadline, cancel).await? {
                tracing::warn!(resource = protocol.as_str(), "Rate limited");
                metrics::record_rate_limited(protocol.as_str());
                return Err(DispatchError::RateLimited {
                    resource: protocol.as_str().to_string(),
                });
            }
        }

        let breaker = self.breakers.get(protocol);
        let ctx = CallContext::new(endpoint, deadline, cancel.clone());
        tracing::debug!(%protocol, endpoint = %ctx.endpoint(), "Sending");

        match breaker
            .execute_with(cancel, deadline, transport.send(&ctx, request))
            .await
        {
            Ok(raw) => Ok(MessageResponse::from_transport(raw, protocol)),
            Err(BreakerError::Open { name }) => Err(DispatchError::CircuitOpen { resource: name }),
            Err(BreakerError::Cancelled(reason)) => Err(DispatchError::Cancelled(reason)),
            Err(BreakerError::Operation(e)) => Err(DispatchError::Service(
                ServiceError::from_transport(request.target(), protocol, e),
            )),
        }
    }

    /// Take a token, waiting for one when configured to. A wait that runs
    /// into the deadline is a denial.
    async fn admit(
        &self,
        limiter: &RateLimiter,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<bool, DispatchError> {
        if !self.wait_for_token {
            return Ok(limiter.allow());
        }

        tokio::select! {
            admitted = limiter.wait_and_allow(cancel) => {
                if admitted {
                    Ok(true)
                } else {
                    Err(DispatchError::Cancelled(CancelReason::Cancelled))
                }
            }
            _ = expired(deadline) => Ok(false),
        }
    }

    async fn resolve(&self, protocol: Protocol, target: &str) -> Result<String, DispatchError> {
        if !protocol.uses_discovery() || is_concrete(target) {
            return Ok(target.to_string());
        }
        let Some(discovery) = &self.discovery else {
            return Ok(target.to_string());
        };

        let (service, path) = split_service(target);
        let instance = discovery.find_service(service).await?;
        tracing::debug!(service, instance = %instance, "Resolved");

        Ok(match protocol {
            Protocol::Http => format!("{}{}", instance.http_url(), path),
            _ => instance.authority(),
        })
    }
}

/// Completes at `deadline`, or never when there is none.
async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

/// A target is concrete when it has a scheme or is `host:port`.
pub(crate) fn is_concrete(target: &str) -> bool {
    if target.contains("://") {
        return true;
    }
    match target.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// `billing/v1/charge` splits into `("billing", "/v1/charge")`.
fn split_service(target: &str) -> (&str, &str) {
    match target.find('/') {
        Some(i) => target.split_at(i),
        None => (target, ""),
    }
}

fn outcome_label(result: &Result<MessageResponse, DispatchError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(DispatchError::CircuitOpen { .. }) => "circuit_open",
        Err(DispatchError::RateLimited { .. }) => "rate_limited",
        Err(DispatchError::Discovery(_)) => "discovery_error",
        Err(DispatchError::Cancelled(_)) => "cancelled",
        Err(DispatchError::ProtocolUnsupported(_)) => "unsupported",
        Err(DispatchError::Service(_)) => "service_error",
    }
}

/// Assembles a [`Dispatcher`].
pub struct DispatcherBuilder {
    transports: Vec<(Protocol, Arc<dyn Transport>)>,
    breakers: Option<BreakerRegistry>,
    limiters: Option<LimiterRegistry>,
    discovery: Option<DiscoveryCache>,
    fallback_order: Vec<Protocol>,
    default_timeout: Duration,
    wait_for_token: bool,
    retry: Option<RetryPolicy>,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherBuilder {
    /// Default breakers, no limiter, no discovery, no retries.
    pub fn new() -> Self {
        Self {
            transports: Vec::new(),
            breakers: None,
            limiters: None,
            discovery: None,
            fallback_order: Protocol::ALL.to_vec(),
            default_timeout: DEFAULT_TIMEOUT,
            wait_for_token: false,
            retry: None,
        }
    }

    /// Everything the config describes except transports and discovery,
    /// which need runtime objects.
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            breakers: Some(BreakerRegistry::from_config(config)),
            limiters: LimiterRegistry::from_config(config),
            fallback_order: config.fallback_protocols(),
            default_timeout: config.transport.timeout(),
            wait_for_token: config.rate_limit.wait_for_token,
            retry: Some(config.transport.retry_policy()),
            ..Self::new()
        }
    }

    /// Register the transport for `protocol`, replacing any earlier one.
    pub fn transport(mut self, protocol: Protocol, transport: impl Transport + 'static) -> Self {
        self.transports.retain(|(p, _)| *p != protocol);
        self.transports.push((protocol, Arc::new(transport)));
        self
    }

    pub fn discovery(mut self, cache: DiscoveryCache) -> Self {
        self.discovery = Some(cache);
        self
    }

    pub fn breakers(mut self, breakers: BreakerRegistry) -> Self {
        self.breakers = Some(breakers);
        self
    }

    pub fn limiters(mut self, limiters: LimiterRegistry) -> Self {
        self.limiters = Some(limiters);
        self
    }

    pub fn fallback_order(mut self, order: Vec<Protocol>) -> Self {
        self.fallback_order = order;
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn wait_for_token(mut self, wait: bool) -> Self {
        self.wait_for_token = wait;
        self
    }

    /// Wrap every transport in [`Retrying`]. A single attempt disables it.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn build(self) -> Dispatcher {
        let retry = self.retry.filter(|p| p.max_attempts > 1);
        let transports = self
            .transports
            .into_iter()
            .map(|(protocol, transport)| {
                let transport = match &retry {
                    Some(policy) => Arc::new(Retrying::new(transport, policy.clone())) as Arc<dyn Transport>,
                    None => transport,
                };
                (protocol, transport)
            })
            .collect();

        Dispatcher {
            transports,
            breakers: self
                .breakers
                .unwrap_or_else(|| BreakerRegistry::from_config(&DispatchConfig::default())),
            limiters: self.limiters,
            discovery: self.discovery,
            fallback_order: self.fallback_order,
            default_timeout: self.default_timeout,
            wait_for_token: self.wait_for_token,
        }
    }
}
