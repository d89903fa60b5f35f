use chrono::Local;

use crate::{
    directory::Server,
    state::ConnectionState,
    store::ConnectionRecord,
};

const UNKNOWN: &str = "Unknown";
const NOT_AVAILABLE: &str = "N/A";
const MASK_LIMIT: usize = 20;
const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq)]
pub struct DetailItem {
    pub label: String,
    pub value: String,
}

impl DetailItem {
    fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetailSection {
    pub heading: &'static str,
    pub items: Vec<DetailItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerTile {
    pub id: u64,
    pub name: String,
    pub country: String,
    pub city: String,
    pub load: String,
    pub status: String,
    pub hostname: String,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerDetails {
    pub title: String,
    pub sections: Vec<DetailSection>,
}

/// What the connect panel shows for one server given the stored token and
/// connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionPanel {
    pub token_label: &'static str,
    pub token_display: String,
    pub button_label: &'static str,
    pub button_enabled: bool,
    pub can_clear_token: bool,
    pub can_download: bool,
    pub message: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSummary {
    pub headline: String,
    pub demo_notice: Option<&'static str>,
    pub sections: Vec<DetailSection>,
}

fn or_default<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

fn load_text(load: u32) -> String {
    if load == 0 {
        UNKNOWN.to_string()
    } else {
        format!("{load}%")
    }
}

fn optional_number(value: Option<f64>) -> String {
    value
        .filter(|value| *value != 0.0)
        .map(|value| value.to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

pub fn masked_token(token: &str) -> String {
    "•".repeat(token.chars().count().min(MASK_LIMIT))
}

pub fn server_tile(server: &Server) -> ServerTile {
    ServerTile {
        id: server.id,
        name: or_default(&server.name, "Unknown Server").to_string(),
        country: server.country_name().unwrap_or(UNKNOWN).to_string(),
        city: server.city_name().unwrap_or(UNKNOWN).to_string(),
        load: load_text(server.load),
        status: or_default(&server.status, UNKNOWN).to_string(),
        hostname: or_default(&server.hostname, UNKNOWN).to_string(),
        online: server.is_online(),
    }
}

/// Sections appear in a fixed order; optional sections are omitted when the
/// server has no data for them.
pub fn server_details(server: &Server) -> ServerDetails {
    let mut sections = vec![DetailSection {
        heading: "Basic Information",
        items: vec![
            DetailItem::new("Server ID", server.id.to_string()),
            DetailItem::new("Hostname", or_default(&server.hostname, NOT_AVAILABLE)),
            DetailItem::new("Station IP", or_default(&server.station, NOT_AVAILABLE)),
            DetailItem::new("Status", or_default(&server.status, UNKNOWN)),
            DetailItem::new("Load", load_text(server.load)),
            DetailItem::new("Created", or_default(&server.created_at, NOT_AVAILABLE)),
            DetailItem::new("Updated", or_default(&server.updated_at, NOT_AVAILABLE)),
        ],
    }];

    if let Some(location) = server.primary_location() {
        let country = &location.country;
        sections.push(DetailSection {
            heading: "Location",
            items: vec![
                DetailItem::new(
                    "Country",
                    format!(
                        "{} ({})",
                        or_default(&country.name, NOT_AVAILABLE),
                        or_default(&country.code, NOT_AVAILABLE)
                    ),
                ),
                DetailItem::new("City", or_default(&country.city.name, NOT_AVAILABLE)),
                DetailItem::new("DNS Name", or_default(&country.city.dns_name, NOT_AVAILABLE)),
                DetailItem::new(
                    "Coordinates",
                    format!(
                        "{}, {}",
                        optional_number(location.latitude),
                        optional_number(location.longitude)
                    ),
                ),
                DetailItem::new("Hub Score", optional_number(country.city.hub_score)),
            ],
        });
    }

    if !server.ips.is_empty() {
        sections.push(DetailSection {
            heading: "IP Addresses",
            items: server
                .ips
                .iter()
                .map(|entry| {
                    let version = entry
                        .ip
                        .version
                        .map(|version| version.to_string())
                        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
                    DetailItem::new(
                        "IP",
                        format!(
                            "{} (IPv{version}, {})",
                            or_default(&entry.ip.ip, NOT_AVAILABLE),
                            or_default(&entry.kind, NOT_AVAILABLE)
                        ),
                    )
                })
                .collect(),
        });
    }

    if !server.ipv6_station.is_empty() {
        sections.push(DetailSection {
            heading: "IPv6 Information",
            items: vec![DetailItem::new("IPv6 Station", server.ipv6_station.clone())],
        });
    }

    if !server.technologies.is_empty() {
        sections.push(DetailSection {
            heading: "Supported Technologies",
            items: server
                .technologies
                .iter()
                .map(|technology| {
                    let name = or_default(
                        &technology.name,
                        or_default(&technology.identifier, UNKNOWN),
                    );
                    DetailItem::new(name, technology.status())
                })
                .collect(),
        });
    }

    if !server.services.is_empty() {
        sections.push(DetailSection {
            heading: "Services",
            items: server
                .services
                .iter()
                .map(|service| {
                    DetailItem::new(
                        "Service",
                        or_default(&service.name, or_default(&service.identifier, UNKNOWN)),
                    )
                })
                .collect(),
        });
    }

    if !server.groups.is_empty() {
        sections.push(DetailSection {
            heading: "Server Groups",
            items: server
                .groups
                .iter()
                .map(|group| {
                    let kind = group
                        .kind
                        .as_ref()
                        .map(|kind| kind.title.as_str())
                        .filter(|title| !title.is_empty())
                        .unwrap_or("Unknown Type");
                    DetailItem::new(or_default(&group.title, UNKNOWN), kind)
                })
                .collect(),
        });
    }

    if !server.specifications.is_empty() {
        sections.push(DetailSection {
            heading: "Specifications",
            items: server
                .specifications
                .iter()
                .map(|specification| {
                    let values = specification
                        .values
                        .iter()
                        .map(|value| or_default(&value.value, NOT_AVAILABLE))
                        .collect::<Vec<_>>()
                        .join(" ");
                    DetailItem::new(
                        or_default(
                            &specification.title,
                            or_default(&specification.identifier, UNKNOWN),
                        ),
                        values,
                    )
                })
                .collect(),
        });
    }

    let metadata: Vec<DetailItem> = server
        .technologies
        .iter()
        .flat_map(|technology| {
            technology.metadata.iter().map(move |entry| {
                DetailItem::new(
                    format!("{} {}", or_default(&technology.name, UNKNOWN), entry.name),
                    entry.value.clone(),
                )
            })
        })
        .collect();
    if !metadata.is_empty() {
        sections.push(DetailSection {
            heading: "Technology Details",
            items: metadata,
        });
    }

    ServerDetails {
        title: or_default(&server.name, "Unknown Server").to_string(),
        sections,
    }
}

pub fn connection_panel(
    server: &Server,
    token: Option<&str>,
    record: Option<&ConnectionRecord>,
    state: &ConnectionState,
) -> ConnectionPanel {
    let Some(token) = token else {
        return ConnectionPanel {
            token_label: "Access Token:",
            token_display: String::new(),
            button_label: state.button_label(false),
            button_enabled: !state.is_busy(),
            can_clear_token: false,
            can_download: false,
            message: Vec::new(),
        };
    };

    let viewing_connected = record.is_some_and(|record| record.server_id == server.id);
    let message = match record {
        Some(record) if viewing_connected => {
            let since = record
                .connected_at
                .map(|time| time.with_timezone(&Local).format(DISPLAY_TIME_FORMAT).to_string())
                .unwrap_or_else(|| UNKNOWN.to_string());
            vec![
                format!("Currently connected to {}", record.server_name),
                format!("Connected since: {since}"),
                "Run `config` to get the WireGuard configuration file".to_string(),
            ]
        }
        Some(record) => vec![
            format!("Currently connected to {}", record.server_name),
            format!(
                "Click Connect to switch to {}",
                or_default(&server.name, "Unknown Server")
            ),
        ],
        None => Vec::new(),
    };

    ConnectionPanel {
        token_label: "Stored Access Token:",
        token_display: masked_token(token),
        button_label: if viewing_connected && !state.is_busy() {
            "Disconnect"
        } else {
            state.button_label(false)
        },
        button_enabled: !state.is_busy(),
        can_clear_token: true,
        can_download: record.is_some(),
        message,
    }
}

pub fn connection_summary(record: &ConnectionRecord) -> ConnectionSummary {
    let credentials = &record.credentials;
    let mut credential_items = vec![
        DetailItem::new("Credentials ID", credentials.id.to_string()),
        DetailItem::new("Username", or_default(&credentials.username, NOT_AVAILABLE)),
        DetailItem::new("Password", or_default(&credentials.password, NOT_AVAILABLE)),
    ];
    let private_key = credentials.nordlynx_private_key.as_str();
    if !private_key.is_empty() && private_key != NOT_AVAILABLE {
        credential_items.push(DetailItem::new("NordLynx Private Key", private_key));
    }

    let connected_at = record
        .connected_at
        .map(|time| time.with_timezone(&Local).format(DISPLAY_TIME_FORMAT).to_string())
        .unwrap_or_else(|| UNKNOWN.to_string());
    let mut sections = vec![
        DetailSection {
            heading: "VPN Credentials",
            items: credential_items,
        },
        DetailSection {
            heading: "Connection",
            items: vec![
                DetailItem::new("Server IP", record.server_ip.clone()),
                DetailItem::new("Server Load", load_text(record.server_load)),
                DetailItem::new("Connected At", connected_at),
            ],
        },
    ];
    if !credentials.created_at.is_empty() {
        sections.push(DetailSection {
            heading: "Credential History",
            items: vec![
                DetailItem::new("Credentials Created", credentials.created_at.clone()),
                DetailItem::new(
                    "Credentials Updated",
                    or_default(&credentials.updated_at, NOT_AVAILABLE),
                ),
            ],
        });
    }

    ConnectionSummary {
        headline: format!("Successfully connected to {}!", record.server_name),
        demo_notice: credentials
            .is_synthesized()
            .then_some("Demo Mode: Simulated credentials because no credential relay answered"),
        sections,
    }
}
