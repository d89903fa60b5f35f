use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::directory::{Filter, Server, reconcile_filter, total_pages};

pub const SESSION_FILE: &str = "session.toml";
pub const SERVER_CACHE_FILE: &str = "servers.json";

/// Browsing context shared by consecutive invocations: which server is
/// open, which page is shown and which filters apply.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Session {
    pub selected_server: Option<u64>,
    pub page: usize,
    pub country: Option<String>,
    pub city: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            selected_server: None,
            page: 1,
            country: None,
            city: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageTarget {
    First,
    Previous,
    Next,
    Last,
    Number(usize),
}

impl Session {
    pub fn load(directory: &Path) -> Self {
        let path = directory.join(SESSION_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(session) => session,
                Err(error) => {
                    log::warn!("[session] failed to parse {}: {error}", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, directory: &Path) -> Result<(), String> {
        let path = directory.join(SESSION_FILE);
        let content = toml::to_string_pretty(self)
            .map_err(|error| format!("Failed to serialize session: {error}"))?;
        std::fs::write(&path, content)
            .map_err(|error| format!("Failed to write {}: {error}", path.display()))
    }

    pub fn filter(&self) -> Filter {
        Filter {
            country: self.country.clone(),
            city: self.city.clone(),
        }
    }

    /// Changing filters always returns to the first page.
    pub fn apply_filter(&mut self, servers: &[Server], country: Option<String>, city: Option<String>) {
        let requested = Filter {
            country: country.filter(|value| !value.is_empty()),
            city: city.filter(|value| !value.is_empty()),
        };
        let reconciled = reconcile_filter(servers, &requested);
        if reconciled.city != requested.city {
            log::info!(
                "[session] dropping city filter {:?}, not in {:?}",
                requested.city,
                requested.country
            );
        }
        self.country = reconciled.country;
        self.city = reconciled.city;
        self.page = 1;
    }

    /// Moves to `target` when it names an existing page; returns whether the
    /// page changed.
    pub fn go_to(&mut self, target: PageTarget, matching: usize, page_size: usize) -> bool {
        let last = total_pages(matching, page_size);
        let current = self.page.clamp(1, last.max(1));
        let wanted = match target {
            PageTarget::First => 1,
            PageTarget::Previous => current.saturating_sub(1),
            PageTarget::Next => current + 1,
            PageTarget::Last => last,
            PageTarget::Number(number) => number,
        };
        if wanted >= 1 && wanted <= last && wanted != self.page {
            self.page = wanted;
            true
        } else {
            false
        }
    }
}

pub fn load_cached_servers(directory: &Path) -> Option<Vec<Server>> {
    let path = directory.join(SERVER_CACHE_FILE);
    let content = std::fs::read(&path).ok()?;
    match serde_json::from_slice(&content) {
        Ok(servers) => Some(servers),
        Err(error) => {
            log::warn!("[session] ignoring unreadable cache {}: {error}", path.display());
            None
        }
    }
}

pub fn save_cached_servers(directory: &Path, servers: &[Server]) -> Result<(), String> {
    let path = directory.join(SERVER_CACHE_FILE);
    let content = serde_json::to_vec(servers)
        .map_err(|error| format!("Failed to serialize server list: {error}"))?;
    std::fs::write(&path, content)
        .map_err(|error| format!("Failed to write {}: {error}", path.display()))?;
    log::debug!("[session] cached {} servers in {}", servers.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::fixtures::server;

    #[test]
    fn session_round_trips_through_disk() {
        let directory = tempfile::tempdir().unwrap();
        let session = Session {
            selected_server: Some(12),
            page: 3,
            country: Some("Germany".into()),
            city: None,
        };

        session.save(directory.path()).unwrap();

        assert_eq!(Session::load(directory.path()), session);
    }

    #[test]
    fn filter_change_resets_page_and_drops_foreign_city() {
        let servers = vec![
            server(1, "Germany", "Berlin", 10, "online"),
            server(2, "France", "Paris", 10, "online"),
        ];
        let mut session = Session {
            page: 4,
            ..Session::default()
        };

        session.apply_filter(&servers, Some("Germany".into()), Some("Paris".into()));

        assert_eq!(session.page, 1);
        assert_eq!(session.country.as_deref(), Some("Germany"));
        assert_eq!(session.city, None);
    }

    #[test]
    fn page_navigation_stays_in_range() {
        let mut session = Session::default();

        assert!(!session.go_to(PageTarget::Previous, 20, 6));
        assert!(session.go_to(PageTarget::Last, 20, 6));
        assert_eq!(session.page, 4);
        assert!(!session.go_to(PageTarget::Next, 20, 6));
        assert!(!session.go_to(PageTarget::Number(9), 20, 6));
        assert!(session.go_to(PageTarget::Previous, 20, 6));
        assert_eq!(session.page, 3);
        assert!(session.go_to(PageTarget::First, 20, 6));
        assert_eq!(session.page, 1);
    }

    #[test]
    fn stale_page_beyond_a_shrunken_list_steps_back_from_the_last_page() {
        let mut session = Session {
            page: 9,
            ..Session::default()
        };

        assert!(session.go_to(PageTarget::Previous, 20, 6));
        assert_eq!(session.page, 3);

        let mut session = Session {
            page: 9,
            ..Session::default()
        };
        assert!(session.go_to(PageTarget::Last, 20, 6));
        assert_eq!(session.page, 4);
    }

    #[test]
    fn server_cache_round_trips() {
        let directory = tempfile::tempdir().unwrap();
        let servers = vec![server(1, "Germany", "Berlin", 10, "online")];

        save_cached_servers(directory.path(), &servers).unwrap();

        assert_eq!(load_cached_servers(directory.path()), Some(servers));
    }
}
