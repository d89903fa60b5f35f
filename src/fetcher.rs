use std::{sync::Arc, time::Duration};

use futures::future::{self, AbortHandle, AbortRegistration, Abortable, Either};
use serde::{Deserialize, de::DeserializeOwned};

use crate::{relay::Relay, transport::Transport};

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FailureReason {
    #[error("HTTP {0}")]
    Status(u16),
    #[error("{0}")]
    Transport(String),
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("invalid JSON: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{relay} failed: {reason}")]
pub struct AttemptFailure {
    pub relay: String,
    pub reason: FailureReason,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("all {} relays failed", .0.len())]
    Exhausted(Vec<AttemptFailure>),
    #[error("{relay} reached the issuer, which answered {status}: {message}")]
    Rejected {
        relay: String,
        status: u16,
        message: String,
    },
    #[error("fetch cancelled")]
    Cancelled,
}

#[derive(Clone)]
pub struct FetchOptions {
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    /// Stop on a 401/403 that carries the issuer's own error body instead of
    /// treating it as a relay failure.
    pub honor_rejections: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            timeout: DEFAULT_ATTEMPT_TIMEOUT,
            honor_rejections: false,
        }
    }
}

#[derive(Clone)]
pub struct CancelHandle(AbortHandle);

pub struct CancelRegistration(AbortRegistration);

impl CancelHandle {
    pub fn pair() -> (CancelHandle, CancelRegistration) {
        let (handle, registration) = AbortHandle::new_pair();
        (CancelHandle(handle), CancelRegistration(registration))
    }

    pub fn cancel(&self) {
        self.0.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_aborted()
    }
}

#[derive(Deserialize)]
struct IssuerErrorEnvelope {
    errors: IssuerError,
}

#[derive(Deserialize)]
struct IssuerError {
    #[serde(default)]
    message: String,
}

enum AttemptOutcome<T> {
    Success(T),
    Rejected { status: u16, message: String },
    Failed(FailureReason),
}

#[derive(Clone)]
pub struct RelayFetcher {
    transport: Arc<dyn Transport>,
}

impl RelayFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn fetch<T: DeserializeOwned>(
        &self,
        target: &str,
        relays: &[Relay],
        options: &FetchOptions,
    ) -> Result<T, FetchError> {
        let mut failures = Vec::with_capacity(relays.len());

        for relay in relays {
            log::debug!("[fetcher] trying {} for {target}", relay.name);
            match self.attempt::<T>(relay, target, options).await {
                AttemptOutcome::Success(data) => {
                    log::info!("[fetcher] {} succeeded for {target}", relay.name);
                    return Ok(data);
                }
                AttemptOutcome::Rejected { status, message } => {
                    log::warn!(
                        "[fetcher] {} reached the issuer, rejected with {status}: {message}",
                        relay.name
                    );
                    return Err(FetchError::Rejected {
                        relay: relay.name.clone(),
                        status,
                        message,
                    });
                }
                AttemptOutcome::Failed(reason) => {
                    log::debug!("[fetcher] {} failed: {reason}", relay.name);
                    failures.push(AttemptFailure {
                        relay: relay.name.clone(),
                        reason,
                    });
                }
            }
        }

        log::warn!(
            "[fetcher] all {} relays failed for {target}",
            failures.len()
        );
        Err(FetchError::Exhausted(failures))
    }

    pub async fn fetch_cancellable<T: DeserializeOwned>(
        &self,
        target: &str,
        relays: &[Relay],
        options: &FetchOptions,
        registration: CancelRegistration,
    ) -> Result<T, FetchError> {
        match Abortable::new(self.fetch(target, relays, options), registration.0).await {
            Ok(result) => result,
            Err(_) => {
                log::info!("[fetcher] fetch of {target} cancelled");
                Err(FetchError::Cancelled)
            }
        }
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        relay: &Relay,
        target: &str,
        options: &FetchOptions,
    ) -> AttemptOutcome<T> {
        let url = relay.effective_url(target);
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        headers.extend(options.headers.iter().cloned());
        headers.extend(relay.headers.iter().cloned());

        let request = self.transport.get(&url, &headers);
        let timer = smol::Timer::after(options.timeout);
        let response = match future::select(request, timer).await {
            Either::Left((Ok(response), _)) => response,
            Either::Left((Err(error), _)) => {
                return AttemptOutcome::Failed(FailureReason::Transport(error));
            }
            Either::Right(_) => return AttemptOutcome::Failed(FailureReason::Timeout(options.timeout)),
        };

        if !response.is_success() {
            if options.honor_rejections
                && matches!(response.status, 401 | 403)
                && let Ok(envelope) = serde_json::from_slice::<IssuerErrorEnvelope>(&response.body)
            {
                return AttemptOutcome::Rejected {
                    status: response.status,
                    message: envelope.errors.message,
                };
            }
            log::debug!(
                "[fetcher] {} returned {}: {}",
                relay.name,
                response.status,
                response.body_excerpt()
            );
            return AttemptOutcome::Failed(FailureReason::Status(response.status));
        }

        match serde_json::from_slice(&response.body) {
            Ok(data) => AttemptOutcome::Success(data),
            Err(error) => AttemptOutcome::Failed(FailureReason::Parse(error.to_string())),
        }
    }
}
