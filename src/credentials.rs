use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Deserializer, Serialize, de};

use crate::{
    fetcher::{CancelRegistration, FetchError, FetchOptions, RelayFetcher},
    relay::Relay,
    settings::Settings,
};

pub const ISSUED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Authenticity {
    /// Issued by the credential API.
    #[default]
    Authentic,
    /// Fabricated locally after every credential relay failed.
    Synthesized,
}

/// The secret fields are required and non-empty, so a relay's own JSON
/// (an error object, `{}`) is a parse failure rather than credentials.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Credentials {
    #[serde(default)]
    pub id: u64,
    #[serde(deserialize_with = "non_empty")]
    pub username: String,
    #[serde(deserialize_with = "non_empty")]
    pub password: String,
    #[serde(deserialize_with = "non_empty")]
    pub nordlynx_private_key: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(skip)]
    pub authenticity: Authenticity,
}

fn non_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = String::deserialize(deserializer)?;
    if value.trim().is_empty() {
        return Err(de::Error::custom("empty credential field"));
    }
    Ok(value)
}

impl Credentials {
    pub fn is_synthesized(&self) -> bool {
        self.authenticity == Authenticity::Synthesized
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetrieveError {
    #[error("Invalid access token.")]
    Unauthorized,
    #[error("Access denied. Check your subscription.")]
    Forbidden,
    #[error("Credential request cancelled.")]
    Cancelled,
}

pub fn authorization_header(access_token: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("token:{access_token}")))
}

pub fn synthesize_credentials<R: Rng>(rng: &mut R, now: DateTime<Utc>) -> Credentials {
    let mut alphanumeric = |length: usize| -> String {
        (0..length)
            .map(|_| char::from(rng.sample(Alphanumeric)))
            .collect()
    };
    let username = format!("nv{}", alphanumeric(22));
    let password = alphanumeric(16);

    let mut key = [0u8; 32];
    rng.fill(&mut key);
    key[0] &= 248;
    key[31] &= 127;
    key[31] |= 64;

    let issued_at = now.format(ISSUED_AT_FORMAT).to_string();
    Credentials {
        id: rng.gen_range(0..1_000_000_000),
        username,
        password,
        nordlynx_private_key: STANDARD.encode(key),
        created_at: issued_at.clone(),
        updated_at: issued_at,
        authenticity: Authenticity::Synthesized,
    }
}

pub struct CredentialRetriever {
    fetcher: RelayFetcher,
    target: String,
    relays: Vec<Relay>,
    attempt_timeout: Duration,
    synthesis_delay: Duration,
}

impl CredentialRetriever {
    pub fn new(fetcher: RelayFetcher, settings: &Settings) -> Self {
        Self {
            fetcher,
            target: settings.credentials_url.clone(),
            relays: settings.credential_relays.clone(),
            attempt_timeout: settings.attempt_timeout(),
            synthesis_delay: settings.simulated_delay(),
        }
    }

    pub async fn retrieve(&self, access_token: &str) -> Result<Credentials, RetrieveError> {
        self.retrieve_with(access_token, None).await
    }

    pub async fn retrieve_cancellable(
        &self,
        access_token: &str,
        registration: CancelRegistration,
    ) -> Result<Credentials, RetrieveError> {
        self.retrieve_with(access_token, Some(registration)).await
    }

    async fn retrieve_with(
        &self,
        access_token: &str,
        registration: Option<CancelRegistration>,
    ) -> Result<Credentials, RetrieveError> {
        let options = FetchOptions {
            headers: vec![(
                "Authorization".to_string(),
                authorization_header(access_token),
            )],
            timeout: self.attempt_timeout,
            honor_rejections: true,
        };

        let result = match registration {
            Some(registration) => {
                self.fetcher
                    .fetch_cancellable::<Credentials>(
                        &self.target,
                        &self.relays,
                        &options,
                        registration,
                    )
                    .await
            }
            None => {
                self.fetcher
                    .fetch::<Credentials>(&self.target, &self.relays, &options)
                    .await
            }
        };

        match result {
            Ok(credentials) => {
                log::info!("[credentials] issuer returned credentials #{}", credentials.id);
                Ok(credentials)
            }
            Err(FetchError::Rejected { status: 401, .. }) => Err(RetrieveError::Unauthorized),
            Err(FetchError::Rejected { .. }) => Err(RetrieveError::Forbidden),
            Err(FetchError::Cancelled) => Err(RetrieveError::Cancelled),
            Err(FetchError::Exhausted(failures)) => {
                for failure in &failures {
                    log::debug!("[credentials] {failure}");
                }
                log::warn!(
                    "[credentials] all {} credential relays failed, using simulation",
                    failures.len()
                );
                Ok(self.synthesize().await)
            }
        }
    }

    async fn synthesize(&self) -> Credentials {
        if !self.synthesis_delay.is_zero() {
            smol::Timer::after(self.synthesis_delay).await;
        }
        synthesize_credentials(&mut rand::thread_rng(), Utc::now())
    }
}
