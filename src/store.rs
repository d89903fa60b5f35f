use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};

use crate::credentials::{Authenticity, Credentials};

pub const STATE_FILE: &str = "state.toml";

pub const ACCESS_TOKEN_KEY: &str = "nordvpn_access_token";
pub const SERVER_ID_KEY: &str = "nordvpn_connected_server_id";
pub const SERVER_NAME_KEY: &str = "nordvpn_connected_server_name";
pub const SERVER_IP_KEY: &str = "nordvpn_connected_server_ip";
pub const SERVER_LOAD_KEY: &str = "nordvpn_connected_server_load";
pub const CREDENTIALS_ID_KEY: &str = "nordvpn_credentials_id";
pub const CREDENTIALS_USERNAME_KEY: &str = "nordvpn_credentials_username";
pub const CREDENTIALS_PASSWORD_KEY: &str = "nordvpn_credentials_password";
pub const CREDENTIALS_KEY_KEY: &str = "nordvpn_credentials_nordlynx_key";
pub const CREDENTIALS_CREATED_AT_KEY: &str = "nordvpn_credentials_created_at";
pub const CREDENTIALS_UPDATED_AT_KEY: &str = "nordvpn_credentials_updated_at";
pub const CONNECTED_AT_KEY: &str = "nordvpn_connected_at";
pub const SIMULATED_KEY: &str = "nordvpn_connection_simulated";
pub const THEME_KEY: &str = "nordvpn_theme";

/// Every key that belongs to the active connection. The token and the theme
/// are deliberately absent.
pub const CONNECTION_KEYS: [&str; 12] = [
    SERVER_ID_KEY,
    SERVER_NAME_KEY,
    SERVER_IP_KEY,
    SERVER_LOAD_KEY,
    CREDENTIALS_ID_KEY,
    CREDENTIALS_USERNAME_KEY,
    CREDENTIALS_PASSWORD_KEY,
    CREDENTIALS_KEY_KEY,
    CREDENTIALS_CREATED_AT_KEY,
    CREDENTIALS_UPDATED_AT_KEY,
    CONNECTED_AT_KEY,
    SIMULATED_KEY,
];

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRecord {
    pub server_id: u64,
    pub server_name: String,
    pub server_ip: String,
    pub server_load: u32,
    pub credentials: Credentials,
    pub connected_at: Option<DateTime<Utc>>,
}

/// Flat key-value state: one optional connection record, the access token
/// and the theme preference. Every mutation is written through to disk
/// before it becomes visible.
pub struct ConnectionStore {
    path: Option<PathBuf>,
    entries: BTreeMap<String, String>,
}

impl ConnectionStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
        }
    }

    pub fn open(directory: &Path) -> Self {
        let path = directory.join(STATE_FILE);
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(entries) => {
                    log::info!("[store] loaded from {}", path.display());
                    entries
                }
                Err(error) => {
                    log::warn!("[store] failed to parse {}: {error}", path.display());
                    BTreeMap::new()
                }
            },
            Err(_) => {
                log::info!("[store] no state file at {}, starting empty", path.display());
                BTreeMap::new()
            }
        };
        Self {
            path: Some(path),
            entries,
        }
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), String> {
        let mut entries = self.entries.clone();
        entries.insert(key.to_string(), value.to_string());
        self.commit(entries)
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self) -> Option<ConnectionRecord> {
        let raw_id = self.value(SERVER_ID_KEY)?;
        let server_id = match raw_id.parse() {
            Ok(server_id) => server_id,
            Err(error) => {
                log::warn!("[store] ignoring connection with invalid server id {raw_id:?}: {error}");
                return None;
            }
        };

        let text = |key: &str, fallback: &str| self.value(key).unwrap_or(fallback).to_string();
        let authenticity = if self.value(SIMULATED_KEY) == Some("true") {
            Authenticity::Synthesized
        } else {
            Authenticity::Authentic
        };
        let connected_at = self
            .value(CONNECTED_AT_KEY)
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|value| value.with_timezone(&Utc));

        Some(ConnectionRecord {
            server_id,
            server_name: text(SERVER_NAME_KEY, "Unknown Server"),
            server_ip: text(SERVER_IP_KEY, "N/A"),
            server_load: self
                .value(SERVER_LOAD_KEY)
                .and_then(|value| value.parse().ok())
                .unwrap_or(0),
            credentials: Credentials {
                id: self
                    .value(CREDENTIALS_ID_KEY)
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(0),
                username: text(CREDENTIALS_USERNAME_KEY, "N/A"),
                password: text(CREDENTIALS_PASSWORD_KEY, "N/A"),
                nordlynx_private_key: text(CREDENTIALS_KEY_KEY, "N/A"),
                created_at: text(CREDENTIALS_CREATED_AT_KEY, "N/A"),
                updated_at: text(CREDENTIALS_UPDATED_AT_KEY, "N/A"),
                authenticity,
            },
            connected_at,
        })
    }

    /// Replaces any previous record in one write.
    pub fn put(&mut self, record: &ConnectionRecord) -> Result<(), String> {
        let credentials = &record.credentials;
        let or_placeholder = |value: &str| {
            if value.is_empty() {
                "N/A".to_string()
            } else {
                value.to_string()
            }
        };

        let mut entries = self.entries.clone();
        for key in CONNECTION_KEYS {
            entries.remove(key);
        }
        let fields = [
            (SERVER_ID_KEY, record.server_id.to_string()),
            (SERVER_NAME_KEY, or_placeholder(&record.server_name)),
            (SERVER_IP_KEY, or_placeholder(&record.server_ip)),
            (SERVER_LOAD_KEY, record.server_load.to_string()),
            (CREDENTIALS_ID_KEY, credentials.id.to_string()),
            (CREDENTIALS_USERNAME_KEY, or_placeholder(&credentials.username)),
            (CREDENTIALS_PASSWORD_KEY, or_placeholder(&credentials.password)),
            (CREDENTIALS_KEY_KEY, or_placeholder(&credentials.nordlynx_private_key)),
            (CREDENTIALS_CREATED_AT_KEY, or_placeholder(&credentials.created_at)),
            (CREDENTIALS_UPDATED_AT_KEY, or_placeholder(&credentials.updated_at)),
            (
                CONNECTED_AT_KEY,
                record
                    .connected_at
                    .map(|time| time.to_rfc3339())
                    .unwrap_or_default(),
            ),
            (SIMULATED_KEY, credentials.is_synthesized().to_string()),
        ];
        for (key, value) in fields {
            if !value.is_empty() {
                entries.insert(key.to_string(), value);
            }
        }

        self.commit(entries)?;
        log::info!(
            "[store] connection record saved for server #{} ({})",
            record.server_id,
            record.server_name
        );
        Ok(())
    }

    pub fn clear(&mut self, keys: &[&str]) -> Result<(), String> {
        let mut entries = self.entries.clone();
        for key in keys {
            entries.remove(*key);
        }
        self.commit(entries)
    }

    pub fn clear_connection(&mut self) -> Result<(), String> {
        self.clear(&CONNECTION_KEYS)
    }

    pub fn token(&self) -> Option<&str> {
        self.value(ACCESS_TOKEN_KEY)
    }

    pub fn set_token(&mut self, token: &str) -> Result<(), String> {
        self.set_value(ACCESS_TOKEN_KEY, token)
    }

    /// Removes the token together with the connection it authorized.
    pub fn clear_token(&mut self) -> Result<(), String> {
        let mut keys = vec![ACCESS_TOKEN_KEY];
        keys.extend(CONNECTION_KEYS);
        self.clear(&keys)?;
        log::info!("[store] cleared stored access token and connection");
        Ok(())
    }

    fn commit(&mut self, entries: BTreeMap<String, String>) -> Result<(), String> {
        if let Some(path) = &self.path {
            write_atomically(path, &entries)?;
        }
        self.entries = entries;
        Ok(())
    }
}

fn write_atomically(path: &Path, entries: &BTreeMap<String, String>) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| {
            format!("Failed to create state directory {}: {error}", parent.display())
        })?;
    }
    let content = toml::to_string_pretty(entries)
        .map_err(|error| format!("Failed to serialize state: {error}"))?;
    let staging = path.with_extension("toml.tmp");
    std::fs::write(&staging, content)
        .map_err(|error| format!("Failed to write {}: {error}", staging.display()))?;
    std::fs::rename(&staging, path)
        .map_err(|error| format!("Failed to replace {}: {error}", path.display()))
}
