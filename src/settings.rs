use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    fetcher::DEFAULT_ATTEMPT_TIMEOUT,
    relay::{Relay, default_credential_relays, default_directory_relays},
};

pub const SETTINGS_FILE: &str = "settings.toml";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub servers_url: String,
    pub server_limit: u32,
    pub credentials_url: String,
    pub directory_relays: Vec<Relay>,
    pub credential_relays: Vec<Relay>,
    pub attempt_timeout_ms: u64,
    pub simulated_delay_ms: u64,
    pub disconnect_delay_ms: u64,
    pub page_size: usize,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            servers_url: "https://api.nordvpn.com/v1/servers".into(),
            server_limit: 20000,
            credentials_url: "https://api.nordvpn.com/v1/users/services/credentials".into(),
            directory_relays: default_directory_relays(),
            credential_relays: default_credential_relays(),
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT.as_millis() as u64,
            simulated_delay_ms: 1500,
            disconnect_delay_ms: 1000,
            page_size: 6,
            user_agent: format!("nordvpn-directory/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Settings {
    pub fn load(directory: &Path) -> Self {
        let path = directory.join(SETTINGS_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(settings) => {
                    log::info!("[settings] loaded from {}", path.display());
                    settings
                }
                Err(error) => {
                    log::warn!("[settings] failed to parse {}: {error}", path.display());
                    Self::default()
                }
            },
            Err(_) => {
                log::info!(
                    "[settings] no settings file at {}, using defaults",
                    path.display()
                );
                Self::default()
            }
        }
    }

    pub fn servers_target(&self) -> String {
        format!("{}?limit={}", self.servers_url, self.server_limit)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn simulated_delay(&self) -> Duration {
        Duration::from_millis(self.simulated_delay_ms)
    }

    pub fn disconnect_delay(&self) -> Duration {
        Duration::from_millis(self.disconnect_delay_ms)
    }

    pub fn page_size(&self) -> usize {
        self.page_size.max(1)
    }
}

pub fn application_directory(override_directory: Option<PathBuf>) -> PathBuf {
    let directory = override_directory.unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nordvpn-directory")
    });
    if let Err(error) = std::fs::create_dir_all(&directory) {
        log::warn!(
            "[settings] failed to create application directory {}: {error}",
            directory.display()
        );
    }
    directory
}
