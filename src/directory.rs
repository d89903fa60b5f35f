use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    fetcher::{FetchError, FetchOptions, RelayFetcher},
    settings::Settings,
};

pub const WIREGUARD_TECHNOLOGY: &str = "wireguard_udp";
pub const PUBLIC_KEY_METADATA: &str = "public_key";
const MISSING_LOAD_RANK: u32 = 999;
pub const LOAD_FAILURE_MESSAGE: &str = "Failed to load servers. Please try again later.";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Server {
    pub id: u64,
    pub name: String,
    pub hostname: String,
    pub station: String,
    pub ipv6_station: String,
    pub load: u32,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub locations: Vec<Location>,
    pub ips: Vec<ServerIp>,
    pub technologies: Vec<Technology>,
    pub services: Vec<Service>,
    pub groups: Vec<Group>,
    pub specifications: Vec<Specification>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Location {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub country: Country,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Country {
    pub name: String,
    pub code: String,
    pub city: City,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct City {
    pub name: String,
    pub dns_name: String,
    pub hub_score: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ServerIp {
    pub ip: IpAddress,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct IpAddress {
    pub ip: String,
    pub version: Option<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Technology {
    pub id: u64,
    pub identifier: String,
    pub name: String,
    pub metadata: Vec<Metadata>,
    pub pivot: Option<TechnologyPivot>,
}

impl Technology {
    pub fn status(&self) -> &str {
        self.pivot
            .as_ref()
            .map(|pivot| pivot.status.as_str())
            .filter(|status| !status.is_empty())
            .unwrap_or("unknown")
    }

    pub fn metadata_value(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.value.as_str())
            .filter(|value| !value.is_empty())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct TechnologyPivot {
    pub status: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Metadata {
    pub name: String,
    pub value: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Service {
    pub identifier: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Group {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: Option<GroupType>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct GroupType {
    pub title: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Specification {
    pub identifier: String,
    pub title: String,
    pub values: Vec<SpecificationValue>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SpecificationValue {
    pub value: String,
}

impl Server {
    pub fn primary_location(&self) -> Option<&Location> {
        self.locations.first()
    }

    pub fn country_name(&self) -> Option<&str> {
        self.primary_location()
            .map(|location| location.country.name.as_str())
            .filter(|name| !name.is_empty())
    }

    pub fn city_name(&self) -> Option<&str> {
        self.primary_location()
            .map(|location| location.country.city.name.as_str())
            .filter(|name| !name.is_empty())
    }

    pub fn is_online(&self) -> bool {
        self.status == "online"
    }

    pub fn wireguard_public_key(&self) -> Option<&str> {
        self.technologies
            .iter()
            .find(|technology| technology.identifier == WIREGUARD_TECHNOLOGY)
            .and_then(|technology| technology.metadata_value(PUBLIC_KEY_METADATA))
    }

    fn load_rank(&self) -> u32 {
        if self.load == 0 {
            MISSING_LOAD_RANK
        } else {
            self.load
        }
    }
}

pub async fn fetch_servers(
    fetcher: &RelayFetcher,
    settings: &Settings,
) -> Result<Vec<Server>, FetchError> {
    let target = settings.servers_target();
    let options = FetchOptions {
        timeout: settings.attempt_timeout(),
        ..FetchOptions::default()
    };
    let servers: Vec<Server> = fetcher
        .fetch(&target, &settings.directory_relays, &options)
        .await?;
    log::info!("[directory] loaded {} servers", servers.len());
    Ok(servers)
}

/// `fetch_servers` with every failure collapsed into the one message shown
/// to the user. There is no retry.
pub async fn load_servers(fetcher: &RelayFetcher, settings: &Settings) -> Result<Vec<Server>, String> {
    fetch_servers(fetcher, settings).await.map_err(|error| {
        log::error!("[directory] {error}");
        LOAD_FAILURE_MESSAGE.to_string()
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub country: Option<String>,
    pub city: Option<String>,
}

impl Filter {
    pub fn matches(&self, server: &Server) -> bool {
        let country_matches = self
            .country
            .as_deref()
            .is_none_or(|country| server.country_name().unwrap_or("") == country);
        let city_matches = self
            .city
            .as_deref()
            .is_none_or(|city| server.city_name().unwrap_or("") == city);
        country_matches && city_matches
    }
}

pub fn country_options(servers: &[Server]) -> Vec<String> {
    servers
        .iter()
        .filter_map(Server::country_name)
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn city_options(servers: &[Server], country: Option<&str>) -> Vec<String> {
    servers
        .iter()
        .filter(|server| country.is_none_or(|country| server.country_name() == Some(country)))
        .filter_map(Server::city_name)
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Drops a selected city that does not exist in the selected country.
pub fn reconcile_filter(servers: &[Server], filter: &Filter) -> Filter {
    let city = filter.city.clone().filter(|city| {
        city_options(servers, filter.country.as_deref()).contains(city)
    });
    Filter {
        country: filter.country.clone(),
        city,
    }
}

/// Online servers first, then by ascending load.
pub fn sort_servers(servers: &mut [&Server]) {
    servers.sort_by(|a, b| {
        b.is_online()
            .cmp(&a.is_online())
            .then_with(|| a.load_rank().cmp(&b.load_rank()))
    });
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<'a> {
    pub servers: Vec<&'a Server>,
    pub page: usize,
    pub total_pages: usize,
    pub total: usize,
    pub first_index: usize,
    pub last_index: usize,
}

impl Page<'_> {
    pub fn summary(&self) -> String {
        format!(
            "Showing {}-{} of {} servers (Page {} of {})",
            self.first_index, self.last_index, self.total, self.page, self.total_pages
        )
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }
}

pub fn total_pages(count: usize, page_size: usize) -> usize {
    count.div_ceil(page_size.max(1))
}

pub fn paginate<'a>(
    servers: &'a [Server],
    filter: &Filter,
    page: usize,
    page_size: usize,
) -> Page<'a> {
    let page_size = page_size.max(1);
    let mut matching: Vec<&Server> = servers.iter().filter(|server| filter.matches(server)).collect();
    sort_servers(&mut matching);

    let total = matching.len();
    let total_pages = total_pages(total, page_size);
    let page = page.clamp(1, total_pages.max(1));
    let start = ((page - 1) * page_size).min(total);
    let end = (start + page_size).min(total);

    Page {
        servers: matching[start..end].to_vec(),
        page,
        total_pages,
        total,
        first_index: if total > 0 { start + 1 } else { 0 },
        last_index: end,
    }
}

pub fn find_server(servers: &[Server], id: u64) -> Option<&Server> {
    servers.iter().find(|server| server.id == id)
}

#[cfg(test)]
pub mod fixtures {
    use super::*;

    pub fn server(id: u64, country: &str, city: &str, load: u32, status: &str) -> Server {
        Server {
            id,
            name: format!("{country} #{id}"),
            hostname: format!("{}{id}.nordvpn.com", country.to_lowercase()),
            station: format!("10.0.0.{id}"),
            load,
            status: status.into(),
            locations: vec![Location {
                latitude: Some(1.5),
                longitude: Some(2.5),
                country: Country {
                    name: country.into(),
                    code: country[..2].to_uppercase(),
                    city: City {
                        name: city.into(),
                        ..City::default()
                    },
                },
            }],
            ..Server::default()
        }
    }

    pub fn with_wireguard_key(mut server: Server, key: &str) -> Server {
        server.technologies.push(Technology {
            id: 35,
            identifier: WIREGUARD_TECHNOLOGY.into(),
            name: "Wireguard".into(),
            metadata: vec![Metadata {
                name: PUBLIC_KEY_METADATA.into(),
                value: key.into(),
            }],
            pivot: Some(TechnologyPivot {
                status: "online".into(),
            }),
        });
        server
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::executor::block_on;

    use super::{fixtures::server, *};
    use crate::transport::fake::{FakeReply, FakeTransport};

    fn inventory() -> Vec<Server> {
        vec![
            server(1, "Germany", "Berlin", 40, "online"),
            server(2, "Germany", "Frankfurt", 10, "online"),
            server(3, "France", "Paris", 5, "offline"),
            server(4, "France", "Paris", 0, "online"),
            server(5, "Japan", "Tokyo", 25, "online"),
        ]
    }

    #[test]
    fn parses_api_shape_with_missing_fields() {
        let json = r#"[{
            "id": 929912,
            "name": "Germany #1",
            "hostname": "de1.nordvpn.com",
            "station": "185.1.2.3",
            "load": 12,
            "status": "online",
            "locations": [{"latitude": 52.5, "longitude": 13.4,
                "country": {"name": "Germany", "code": "DE",
                    "city": {"name": "Berlin", "dns_name": "berlin", "hub_score": 0}}}],
            "technologies": [{"id": 35, "identifier": "wireguard_udp", "name": "Wireguard",
                "metadata": [{"name": "public_key", "value": "PUBKEY="}],
                "pivot": {"status": "online"}}],
            "ips": [{"ip": {"ip": "185.1.2.3", "version": 4}, "type": "entry"}],
            "groups": [{"title": "P2P", "type": {"title": "Legacy category"}}]
        }]"#;

        let servers: Vec<Server> = serde_json::from_str(json).unwrap();

        let server = &servers[0];
        assert_eq!(server.country_name(), Some("Germany"));
        assert_eq!(server.city_name(), Some("Berlin"));
        assert_eq!(server.wireguard_public_key(), Some("PUBKEY="));
        assert_eq!(server.technologies[0].status(), "online");
        assert_eq!(server.ips[0].kind, "entry");
        assert!(server.services.is_empty());
    }

    #[test]
    fn option_lists_are_sorted_and_deduplicated() {
        let servers = inventory();
        assert_eq!(country_options(&servers), vec!["France", "Germany", "Japan"]);
        assert_eq!(city_options(&servers, Some("Germany")), vec!["Berlin", "Frankfurt"]);
        assert_eq!(city_options(&servers, None).len(), 4);
    }

    #[test]
    fn filter_by_country_and_city() {
        let servers = inventory();
        let filter = Filter {
            country: Some("France".into()),
            city: Some("Paris".into()),
        };
        let page = paginate(&servers, &filter, 1, 6);
        let ids: Vec<u64> = page.servers.iter().map(|server| server.id).collect();
        assert_eq!(ids, vec![4, 3]);
    }

    #[test]
    fn stale_city_is_dropped_when_country_changes() {
        let servers = inventory();
        let filter = Filter {
            country: Some("Japan".into()),
            city: Some("Paris".into()),
        };
        assert_eq!(
            reconcile_filter(&servers, &filter),
            Filter {
                country: Some("Japan".into()),
                city: None,
            }
        );
    }

    #[test]
    fn online_first_then_lowest_load_with_missing_load_last() {
        let servers = inventory();
        let page = paginate(&servers, &Filter::default(), 1, 6);
        let ids: Vec<u64> = page.servers.iter().map(|server| server.id).collect();
        assert_eq!(ids, vec![2, 5, 1, 4, 3]);
    }

    #[test]
    fn pagination_arithmetic_and_clamping() {
        let servers = inventory();

        let second = paginate(&servers, &Filter::default(), 2, 2);
        assert_eq!(second.summary(), "Showing 3-4 of 5 servers (Page 2 of 3)");
        assert!(second.has_previous() && second.has_next());

        let beyond = paginate(&servers, &Filter::default(), 10, 2);
        assert_eq!(beyond.page, 3);
        assert_eq!(beyond.servers.len(), 1);
        assert!(!beyond.has_next());

        let none = paginate(
            &servers,
            &Filter {
                country: Some("Spain".into()),
                city: None,
            },
            1,
            6,
        );
        assert_eq!(none.summary(), "Showing 0-0 of 0 servers (Page 1 of 0)");
        assert!(none.servers.is_empty());
    }

    fn fetcher_for(transport: FakeTransport) -> (RelayFetcher, Arc<FakeTransport>) {
        let transport = Arc::new(transport);
        (RelayFetcher::new(transport.clone()), transport)
    }

    #[test]
    fn fetch_walks_directory_relays_in_order() {
        let (fetcher, transport) = fetcher_for(FakeTransport::new());
        let settings = Settings::default();

        let error = block_on(fetch_servers(&fetcher, &settings)).unwrap_err();

        assert!(matches!(error, FetchError::Exhausted(ref failures) if failures.len() == 3));
        assert_eq!(
            transport.calls(),
            [
                "https://thingproxy.freeboard.io/fetch/https://api.nordvpn.com/v1/servers?limit=20000",
                "https://cors-anywhere.herokuapp.com/https://api.nordvpn.com/v1/servers?limit=20000",
                "https://api.codetabs.com/v1/proxy?quest=https%3A%2F%2Fapi.nordvpn.com%2Fv1%2Fservers%3Flimit%3D20000",
            ]
        );
    }

    #[test]
    fn fetch_returns_servers_from_a_later_relay() {
        let (fetcher, transport) = fetcher_for(
            FakeTransport::new()
                .route("https://thingproxy.freeboard.io/", FakeReply::Status(503, "busy".into()))
                .route(
                    "https://cors-anywhere.herokuapp.com/",
                    FakeReply::Status(200, r#"[{"id": 7, "name": "Germany #7"}]"#.into()),
                ),
        );

        let servers = block_on(load_servers(&fetcher, &Settings::default())).unwrap();

        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "Germany #7");
        assert_eq!(transport.calls().len(), 2);
    }

    #[test]
    fn exhaustion_is_reported_with_the_load_failure_message() {
        let (fetcher, _) = fetcher_for(FakeTransport::new());

        assert_eq!(
            block_on(load_servers(&fetcher, &Settings::default())),
            Err(LOAD_FAILURE_MESSAGE.to_string())
        );
    }
}
