use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelayEncoding {
    /// `base + target`, the target URL appended as-is.
    #[default]
    Direct,
    /// `base + percent_encode(target)`, the target embedded as a query value.
    PercentEncoded,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Relay {
    pub name: String,
    pub base: String,
    #[serde(default)]
    pub encoding: RelayEncoding,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl Relay {
    pub fn new(name: &str, base: &str, encoding: RelayEncoding) -> Self {
        Self {
            name: name.into(),
            base: base.into(),
            encoding,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn effective_url(&self, target: &str) -> String {
        match self.encoding {
            RelayEncoding::Direct => format!("{}{}", self.base, target),
            RelayEncoding::PercentEncoded => {
                let encoded: String =
                    url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
                format!("{}{}", self.base, encoded)
            }
        }
    }
}

pub const RELAY_ORIGIN: &str = "https://nordvpn-directory.local";

pub fn default_directory_relays() -> Vec<Relay> {
    vec![
        Relay::new(
            "ThingProxy",
            "https://thingproxy.freeboard.io/fetch/",
            RelayEncoding::Direct,
        ),
        Relay::new(
            "CORS-Anywhere",
            "https://cors-anywhere.herokuapp.com/",
            RelayEncoding::Direct,
        ),
        Relay::new(
            "Proxy6",
            "https://api.codetabs.com/v1/proxy?quest=",
            RelayEncoding::PercentEncoded,
        ),
    ]
}

pub fn default_credential_relays() -> Vec<Relay> {
    vec![
        Relay::new(
            "CORS.LOL",
            "https://api.cors.lol/?url=",
            RelayEncoding::PercentEncoded,
        ),
        Relay::new("CORS.SH", "https://proxy.cors.sh/", RelayEncoding::Direct)
            .with_header("Origin", RELAY_ORIGIN)
            .with_header("X-Requested-With", "XMLHttpRequest"),
        Relay::new(
            "CorsProxy.io",
            "https://corsproxy.io/?url=",
            RelayEncoding::PercentEncoded,
        ),
    ]
}
