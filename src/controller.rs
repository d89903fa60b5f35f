use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};

use crate::{
    credentials::{CredentialRetriever, Credentials, RetrieveError},
    directory::Server,
    fetcher::CancelRegistration,
    state::ConnectionState,
    store::{ConnectionRecord, ConnectionStore},
};

pub const MINIMUM_TOKEN_LENGTH: usize = 10;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectError {
    #[error("{0}")]
    Validation(String),
    #[error("Invalid access token.")]
    Unauthorized,
    #[error("Access denied. Check your subscription.")]
    Forbidden,
    #[error("Network error. Please try again.")]
    Network(String),
    #[error("Failed to save connection state: {0}")]
    Storage(String),
    #[error("A connection change is already in progress.")]
    Busy,
    #[error("Please connect to a server first.")]
    NotConnected,
}

impl ConnectError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(_) | Self::Busy | Self::NotConnected => self.to_string(),
            _ => format!("Connection failed. {self}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    Connected(ConnectionRecord),
    /// Connect on the server that was already connected toggles it off.
    Disconnected { server_name: String },
}

pub fn validate_token(input: &str) -> Result<String, ConnectError> {
    let token = input.trim();
    if token.is_empty() {
        return Err(ConnectError::Validation(
            "Please enter an access token".into(),
        ));
    }
    if token.chars().count() < MINIMUM_TOKEN_LENGTH {
        return Err(ConnectError::Validation(
            "Access token seems too short".into(),
        ));
    }
    Ok(token.to_string())
}

pub fn record_for(server: &Server, credentials: Credentials, now: DateTime<Utc>) -> ConnectionRecord {
    ConnectionRecord {
        server_id: server.id,
        server_name: if server.name.is_empty() {
            "Unknown Server".into()
        } else {
            server.name.clone()
        },
        server_ip: if server.station.is_empty() {
            "N/A".into()
        } else {
            server.station.clone()
        },
        server_load: server.load,
        credentials,
        connected_at: Some(now),
    }
}

struct Inner {
    store: ConnectionStore,
    state: ConnectionState,
}

impl Inner {
    fn connected_to(&self, server_id: u64) -> bool {
        self.store.token().is_some()
            && self
                .store
                .get()
                .is_some_and(|record| record.server_id == server_id)
    }

    fn resolve_token(&mut self, token_input: Option<&str>) -> Result<String, ConnectError> {
        if let Some(token) = self.store.token() {
            return Ok(token.to_string());
        }
        let token = validate_token(token_input.unwrap_or_default())?;
        self.store.set_token(&token).map_err(ConnectError::Storage)?;
        log::info!("[controller] stored new access token");
        Ok(token)
    }

    fn settle_after_failure(&self, message: String) -> ConnectionState {
        if self.store.get().is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Error(message)
        }
    }
}

/// An in-flight transition. Dropping it unfinished (the future was
/// abandoned) restores the state it replaced.
struct Transition<'a> {
    inner: &'a Mutex<Inner>,
    previous: Option<ConnectionState>,
}

impl Transition<'_> {
    fn finish(mut self, inner: &mut Inner, next: ConnectionState) {
        inner.state = next;
        self.previous = None;
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            let mut inner = match self.inner.lock() {
                Ok(inner) => inner,
                Err(poisoned) => poisoned.into_inner(),
            };
            log::warn!("[controller] transition abandoned, restoring {}", previous.label());
            inner.state = previous;
        }
    }
}

pub struct ConnectionController {
    inner: Mutex<Inner>,
    retriever: CredentialRetriever,
    disconnect_delay: Duration,
}

impl ConnectionController {
    pub fn new(
        store: ConnectionStore,
        retriever: CredentialRetriever,
        disconnect_delay: Duration,
    ) -> Self {
        let state = if store.get().is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        Self {
            inner: Mutex::new(Inner { store, state }),
            retriever,
            disconnect_delay,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn begin(&self, inner: &mut Inner, next: ConnectionState) -> Transition<'_> {
        let previous = std::mem::replace(&mut inner.state, next);
        Transition {
            inner: &self.inner,
            previous: Some(previous),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state.clone()
    }

    pub fn record(&self) -> Option<ConnectionRecord> {
        self.lock().store.get()
    }

    pub fn has_token(&self) -> bool {
        self.lock().store.token().is_some()
    }

    pub fn with_store<R>(&self, operation: impl FnOnce(&mut ConnectionStore) -> R) -> R {
        operation(&mut self.lock().store)
    }

    pub async fn connect(
        &self,
        server: &Server,
        token_input: Option<&str>,
    ) -> Result<ConnectOutcome, ConnectError> {
        self.connect_with(server, token_input, None).await
    }

    pub async fn connect_cancellable(
        &self,
        server: &Server,
        token_input: Option<&str>,
        registration: CancelRegistration,
    ) -> Result<ConnectOutcome, ConnectError> {
        self.connect_with(server, token_input, Some(registration))
            .await
    }

    async fn connect_with(
        &self,
        server: &Server,
        token_input: Option<&str>,
        registration: Option<CancelRegistration>,
    ) -> Result<ConnectOutcome, ConnectError> {
        let prepared = {
            let mut inner = self.lock();
            if inner.state.is_busy() {
                log::info!("[controller] ignoring connect while {}", inner.state.label());
                return Err(ConnectError::Busy);
            }
            if inner.connected_to(server.id) {
                None
            } else {
                let token = inner.resolve_token(token_input)?;
                let transition = self.begin(&mut inner, ConnectionState::Connecting);
                Some((token, transition))
            }
        };

        let Some((token, transition)) = prepared else {
            log::info!(
                "[controller] already connected to {}, disconnecting",
                server.name
            );
            let server_name = self.disconnect().await?;
            return Ok(ConnectOutcome::Disconnected { server_name });
        };

        log::info!("━━━ CONNECT (server={}, id={}) ━━━", server.name, server.id);

        let retrieved = match registration {
            Some(registration) => {
                self.retriever
                    .retrieve_cancellable(&token, registration)
                    .await
            }
            None => self.retriever.retrieve(&token).await,
        };

        let mut inner = self.lock();
        match retrieved {
            Ok(credentials) => {
                if credentials.is_synthesized() {
                    log::warn!("[controller] connected with simulated credentials");
                }
                let record = record_for(server, credentials, Utc::now());
                if let Err(error) = inner.store.put(&record) {
                    log::error!("[controller] {error}");
                    let next = inner.settle_after_failure("Failed to save connection".into());
                    transition.finish(&mut inner, next);
                    return Err(ConnectError::Storage(error));
                }
                log::info!("[controller] connected to {}", record.server_name);
                transition.finish(&mut inner, ConnectionState::Connected);
                Ok(ConnectOutcome::Connected(record))
            }
            Err(RetrieveError::Unauthorized) => {
                log::warn!("[controller] issuer rejected the token, clearing stored data");
                if let Err(error) = inner.store.clear_token() {
                    log::error!("[controller] {error}");
                }
                transition.finish(&mut inner, ConnectionState::Error("Invalid access token".into()));
                Err(ConnectError::Unauthorized)
            }
            Err(RetrieveError::Forbidden) => {
                log::warn!("[controller] issuer denied access for this subscription");
                let next = inner.settle_after_failure("Access denied".into());
                transition.finish(&mut inner, next);
                Err(ConnectError::Forbidden)
            }
            Err(RetrieveError::Cancelled) => {
                log::info!("[controller] connect cancelled");
                let next = inner.settle_after_failure("Connection cancelled".into());
                transition.finish(&mut inner, next);
                Err(ConnectError::Network("cancelled".into()))
            }
        }
    }

    /// Removes the connection record after the pacing delay. The access
    /// token and the theme survive.
    pub async fn disconnect(&self) -> Result<String, ConnectError> {
        let (transition, server_name) = {
            let mut inner = self.lock();
            if inner.state.is_busy() {
                log::info!("[controller] ignoring disconnect while {}", inner.state.label());
                return Err(ConnectError::Busy);
            }
            let Some(record) = inner.store.get() else {
                return Err(ConnectError::NotConnected);
            };
            (
                self.begin(&mut inner, ConnectionState::Disconnecting),
                record.server_name,
            )
        };

        log::info!("━━━ DISCONNECT ({server_name}) ━━━");
        if !self.disconnect_delay.is_zero() {
            smol::Timer::after(self.disconnect_delay).await;
        }

        let mut inner = self.lock();
        match inner.store.clear_connection() {
            Ok(()) => {
                transition.finish(&mut inner, ConnectionState::Disconnected);
                log::info!("[controller] disconnected from {server_name}");
                Ok(server_name)
            }
            Err(error) => {
                log::error!("[controller] {error}");
                transition.finish(&mut inner, ConnectionState::Connected);
                Err(ConnectError::Storage(error))
            }
        }
    }

    pub fn clear_token(&self) -> Result<(), ConnectError> {
        let mut inner = self.lock();
        if inner.state.is_busy() {
            return Err(ConnectError::Busy);
        }
        inner.store.clear_token().map_err(ConnectError::Storage)?;
        inner.state = ConnectionState::Disconnected;
        Ok(())
    }
}
