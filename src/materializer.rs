use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::{directory::Server, store::ConnectionRecord};

pub const PUBLIC_KEY_PLACEHOLDER: &str = "PublicKeyNotAvailable";
pub const INTERFACE_ADDRESS: &str = "10.5.0.2/32";
pub const DNS_SERVERS: &str = "103.86.96.100,103.86.99.100";
pub const ALLOWED_IPS: &str = "0.0.0.0/0, ::/0";
pub const WIREGUARD_PORT: u16 = 51820;
pub const PERSISTENT_KEEPALIVE: u32 = 25;
const GENERATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Renders the WireGuard configuration for the stored connection. The only
/// clock input is `now`, used when the record carries no connection time.
pub fn materialize(record: &ConnectionRecord, server: &Server, now: DateTime<Utc>) -> String {
    let hostname = non_empty(&server.hostname).unwrap_or("unknown.nordvpn.com");
    let city = server.city_name().unwrap_or("Unknown");
    let country = server.country_name().unwrap_or("Unknown");
    let public_key = server.wireguard_public_key().unwrap_or_else(|| {
        log::warn!("[materializer] {hostname} has no WireGuard public key");
        PUBLIC_KEY_PLACEHOLDER
    });
    let private_key = non_empty(&record.credentials.nordlynx_private_key).unwrap_or("N/A");
    let generated = record.connected_at.unwrap_or(now).format(GENERATED_FORMAT);

    let warning = if record.credentials.is_synthesized() {
        "# WARNING: This configuration uses simulated credentials for demo purposes\n"
    } else {
        ""
    };

    format!(
        "# NordVPN WireGuard Configuration
# Server: {hostname}
# Location: {city}, {country}
# Server Load: {load}%
# Generated: {generated}
{warning}
[Interface]
PrivateKey = {private_key}
Address = {INTERFACE_ADDRESS}
DNS = {DNS_SERVERS}

[Peer]
PublicKey = {public_key}
AllowedIPs = {ALLOWED_IPS}
Endpoint = {endpoint}:{WIREGUARD_PORT}
PersistentKeepalive = {PERSISTENT_KEEPALIVE}
",
        load = record.server_load,
        endpoint = record.server_ip,
    )
}

pub fn config_file_name(hostname: &str) -> String {
    let hostname = non_empty(hostname).unwrap_or("unknown-server");
    format!("{}.conf", hostname.replace('.', "_"))
}

pub fn write_config(
    record: &ConnectionRecord,
    server: &Server,
    directory: &Path,
    now: DateTime<Utc>,
) -> Result<PathBuf, String> {
    let path = directory.join(config_file_name(&server.hostname));
    std::fs::write(&path, materialize(record, server, now))
        .map_err(|error| format!("Failed to write {}: {error}", path.display()))?;
    log::info!("[materializer] wrote {}", path.display());
    Ok(path)
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{
        credentials::{Authenticity, Credentials},
        directory::fixtures::{server, with_wireguard_key},
    };

    fn record(authenticity: Authenticity) -> ConnectionRecord {
        ConnectionRecord {
            server_id: 7,
            server_name: "Germany #7".into(),
            server_ip: "185.10.20.30".into(),
            server_load: 23,
            credentials: Credentials {
                id: 1,
                username: "user".into(),
                password: "pass".into(),
                nordlynx_private_key: "cHJpdmF0ZS1rZXk=".into(),
                created_at: "2024-01-01 00:00:00".into(),
                updated_at: "2024-01-01 00:00:00".into(),
                authenticity,
            },
            connected_at: Some(Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap()),
        }
    }

    #[test]
    fn renders_the_full_document() {
        let server = with_wireguard_key(server(7, "Germany", "Berlin", 23, "online"), "PUB=");
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();

        let text = materialize(&record(Authenticity::Authentic), &server, now);

        assert_eq!(
            text,
            "# NordVPN WireGuard Configuration\n\
             # Server: germany7.nordvpn.com\n\
             # Location: Berlin, Germany\n\
             # Server Load: 23%\n\
             # Generated: 2024-06-01 12:30:00 UTC\n\
             \n\
             [Interface]\n\
             PrivateKey = cHJpdmF0ZS1rZXk=\n\
             Address = 10.5.0.2/32\n\
             DNS = 103.86.96.100,103.86.99.100\n\
             \n\
             [Peer]\n\
             PublicKey = PUB=\n\
             AllowedIPs = 0.0.0.0/0, ::/0\n\
             Endpoint = 185.10.20.30:51820\n\
             PersistentKeepalive = 25\n"
        );
    }

    #[test]
    fn identical_inputs_give_identical_bytes() {
        let server = with_wireguard_key(server(7, "Germany", "Berlin", 23, "online"), "PUB=");
        let mut record = record(Authenticity::Authentic);
        record.connected_at = None;
        let now = Utc.with_ymd_and_hms(2025, 2, 2, 2, 2, 2).unwrap();

        let first = materialize(&record, &server, now);
        let second = materialize(&record, &server, now);

        assert_eq!(first, second);
        assert!(first.contains("# Generated: 2025-02-02 02:02:02 UTC"));
    }

    #[test]
    fn missing_wireguard_metadata_uses_placeholder() {
        let server = server(7, "Germany", "Berlin", 23, "online");

        let text = materialize(&record(Authenticity::Authentic), &server, Utc::now());

        assert!(text.contains("PublicKey = PublicKeyNotAvailable\n"));
    }

    #[test]
    fn synthesized_credentials_add_a_warning() {
        let server = server(7, "Germany", "Berlin", 23, "online");

        let text = materialize(&record(Authenticity::Synthesized), &server, Utc::now());

        assert!(text.contains(
            "# WARNING: This configuration uses simulated credentials for demo purposes\n\n[Interface]"
        ));
    }

    #[test]
    fn file_name_replaces_dots() {
        assert_eq!(config_file_name("de1234.nordvpn.com"), "de1234_nordvpn_com.conf");
        assert_eq!(config_file_name(""), "unknown-server.conf");
    }

    #[test]
    fn writes_the_artifact_to_disk() {
        let directory = tempfile::tempdir().unwrap();
        let server = server(7, "Germany", "Berlin", 23, "online");

        let path = write_config(
            &record(Authenticity::Authentic),
            &server,
            directory.path(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(path.file_name().unwrap(), "germany7_nordvpn_com.conf");
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.starts_with("# NordVPN WireGuard Configuration\n"));
    }
}
