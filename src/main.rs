mod controller;
mod credentials;
mod directory;
mod fetcher;
mod materializer;
mod relay;
mod session;
mod settings;
mod state;
mod store;
mod theme;
mod transport;
mod view;

use std::{
    io::{BufRead, IsTerminal, Write},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use clap::{Parser, Subcommand, ValueEnum};
use futures::executor::block_on;

use crate::{
    controller::{ConnectOutcome, ConnectionController},
    credentials::CredentialRetriever,
    directory::{
        Server, city_options, country_options, find_server, load_servers, paginate,
    },
    fetcher::{CancelHandle, RelayFetcher},
    session::{PageTarget, Session, load_cached_servers, save_cached_servers},
    settings::{Settings, application_directory},
    store::{ConnectionRecord, ConnectionStore},
    theme::{Palette, Theme},
    transport::HttpTransport,
    view::{DetailSection, connection_panel, connection_summary, server_details, server_tile},
};

#[derive(Parser, Debug)]
#[command(
    name = "nordvpn-directory",
    version,
    about = "Browse NordVPN servers and generate WireGuard configurations"
)]
struct Arguments {
    /// Directory holding settings, state and the server cache.
    #[arg(long, global = true, env = "NORDVPN_DIRECTORY_HOME")]
    config_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List servers, optionally narrowing the country and city filters.
    Servers {
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        city: Option<String>,
        /// Clear both filters.
        #[arg(long, conflicts_with_all = ["country", "city"])]
        all: bool,
        #[arg(long)]
        page: Option<usize>,
        /// Fetch a fresh server list instead of the cached one.
        #[arg(long)]
        refresh: bool,
    },
    /// Move through the filtered list: first, prev, next, last or a number.
    Page { target: String },
    Countries,
    Cities {
        #[arg(long)]
        country: Option<String>,
    },
    /// Show details and connection options for one server.
    Show { id: u64 },
    /// Connect to a server, or disconnect if it is the connected one.
    Connect {
        /// Defaults to the server last opened with `show`.
        id: Option<u64>,
        #[arg(long, env = "NORDVPN_ACCESS_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// Give up on the credential request after this many seconds.
        #[arg(long)]
        deadline: Option<u64>,
    },
    Disconnect,
    ClearToken {
        #[arg(long, short)]
        yes: bool,
    },
    Status,
    /// Write the WireGuard configuration for the current connection.
    Config {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Theme { mode: Option<ThemeChoice> },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ThemeChoice {
    Light,
    Dark,
    Toggle,
}

struct Client {
    directory: PathBuf,
    settings: Settings,
    fetcher: RelayFetcher,
    controller: ConnectionController,
    session: Session,
    palette: Palette,
    color: bool,
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("nordvpn_directory=warn"),
    )
    .init();

    log::info!(
        "nordvpn-directory v{} starting (RUST_LOG={})",
        env!("CARGO_PKG_VERSION"),
        std::env::var("RUST_LOG").unwrap_or_else(|_| "<default: warn>".into()),
    );

    let arguments = Arguments::parse();
    if let Err(message) = run(arguments) {
        eprintln!("{message}");
        std::process::exit(1);
    }
}

fn run(arguments: Arguments) -> Result<(), String> {
    let mut client = Client::open(arguments.config_dir)?;

    match arguments.command {
        Command::Servers {
            country,
            city,
            all,
            page,
            refresh,
        } => {
            let servers = client.servers(refresh)?;
            if all {
                client.session.apply_filter(&servers, None, None);
            } else if country.is_some() || city.is_some() {
                let country = country.or_else(|| client.session.country.clone());
                client.session.apply_filter(&servers, country, city);
            }
            if let Some(page) = page {
                client.session.page = page;
            }
            client.print_page(&servers);
            client.save_session()
        }
        Command::Page { target } => {
            let target = parse_page_target(&target)?;
            let servers = client.servers(false)?;
            let filter = client.session.filter();
            let matching = servers.iter().filter(|server| filter.matches(server)).count();
            if !client
                .session
                .go_to(target, matching, client.settings.page_size())
            {
                log::info!("[session] page unchanged");
            }
            client.print_page(&servers);
            client.save_session()
        }
        Command::Countries => {
            for country in country_options(&client.servers(false)?) {
                println!("{country}");
            }
            Ok(())
        }
        Command::Cities { country } => {
            let servers = client.servers(false)?;
            let country = country.or_else(|| client.session.country.clone());
            for city in city_options(&servers, country.as_deref()) {
                println!("{city}");
            }
            Ok(())
        }
        Command::Show { id } => {
            let servers = client.servers(false)?;
            let server = find_server(&servers, id)
                .ok_or_else(|| format!("No server with id {id}"))?;
            client.print_details(server);
            client.session.selected_server = Some(id);
            client.save_session()
        }
        Command::Connect {
            id,
            token,
            deadline,
        } => {
            let id = id
                .or(client.session.selected_server)
                .ok_or("Select a server with `show <id>` or pass its id")?;
            let cached = load_cached_servers(&client.directory);
            let record = client.controller.record();
            let server = connect_target(id, record.as_ref(), cached.as_deref(), || {
                client.servers(true)
            })?;
            let token = match token {
                Some(token) => Some(token),
                None if client.controller.has_token() => None,
                None => Some(prompt("Access token: ")?),
            };
            client.session.selected_server = Some(id);
            client.save_session()?;
            client.connect(&server, token.as_deref(), deadline.map(Duration::from_secs))
        }
        Command::Disconnect => {
            let server_name =
                block_on(client.controller.disconnect()).map_err(|error| error.user_message())?;
            println!("Disconnected from {server_name}");
            Ok(())
        }
        Command::ClearToken { yes } => {
            if !yes {
                let answer = prompt(
                    "Are you sure you want to clear the stored access token? \
                     This will also disconnect from any connected server. [y/N] ",
                )?;
                if !answer.eq_ignore_ascii_case("y") && !answer.eq_ignore_ascii_case("yes") {
                    return Ok(());
                }
            }
            client
                .controller
                .clear_token()
                .map_err(|error| error.user_message())?;
            println!("Access token cleared");
            Ok(())
        }
        Command::Status => {
            client.print_status();
            Ok(())
        }
        Command::Config { output } => {
            let record = client
                .controller
                .record()
                .ok_or("Please connect to a server first")?;
            let server = client.connected_server(&record);
            let output = output.unwrap_or_else(|| PathBuf::from("."));
            let path = materializer::write_config(&record, &server, &output, chrono::Utc::now())?;
            println!("WireGuard configuration written to {}", path.display());
            if record.credentials.is_synthesized() {
                println!("Note: this configuration uses simulated credentials");
            }
            Ok(())
        }
        Command::Theme { mode } => {
            let current = client.controller.with_store(|store| Theme::load(store));
            let next = match mode {
                None => {
                    println!("{}", current.as_str());
                    return Ok(());
                }
                Some(ThemeChoice::Light) => Theme::Light,
                Some(ThemeChoice::Dark) => Theme::Dark,
                Some(ThemeChoice::Toggle) => current.toggled(),
            };
            client.controller.with_store(|store| next.save(store))?;
            println!("{}", next.as_str());
            Ok(())
        }
    }
}

impl Client {
    fn open(config_dir: Option<PathBuf>) -> Result<Self, String> {
        let directory = application_directory(config_dir);
        log::info!("[startup] application directory: {}", directory.display());

        let settings = Settings::load(&directory);
        let transport = HttpTransport::with_user_agent(&settings.user_agent)?;
        let fetcher = RelayFetcher::new(Arc::new(transport));
        let retriever = CredentialRetriever::new(fetcher.clone(), &settings);
        let store = ConnectionStore::open(&directory);
        let theme = Theme::load(&store);
        let controller = ConnectionController::new(store, retriever, settings.disconnect_delay());
        let session = Session::load(&directory);

        Ok(Self {
            directory,
            settings,
            fetcher,
            controller,
            session,
            palette: theme.palette(),
            color: std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
        })
    }

    /// Cached list unless `refresh` is set or nothing is cached yet.
    fn servers(&self, refresh: bool) -> Result<Vec<Server>, String> {
        if !refresh && let Some(servers) = load_cached_servers(&self.directory) {
            return Ok(servers);
        }
        println!("Loading servers...");
        let servers = block_on(load_servers(&self.fetcher, &self.settings))?;
        if let Err(error) = save_cached_servers(&self.directory, &servers) {
            log::warn!("[directory] {error}");
        }
        Ok(servers)
    }

    /// The connected server from the cache, or a stand-in built from the
    /// stored record.
    fn connected_server(&self, record: &ConnectionRecord) -> Server {
        load_cached_servers(&self.directory)
            .and_then(|servers| find_server(&servers, record.server_id).cloned())
            .unwrap_or_else(|| {
                log::warn!("[startup] server {} is not in the cache", record.server_id);
                server_from_record(record)
            })
    }

    fn save_session(&self) -> Result<(), String> {
        self.session.save(&self.directory)
    }

    fn paint(&self, text: &str, color: u32) -> String {
        self.palette.paint(text, color, self.color)
    }

    fn print_page(&mut self, servers: &[Server]) {
        let page = paginate(
            servers,
            &self.session.filter(),
            self.session.page,
            self.settings.page_size(),
        );
        self.session.page = page.page;

        if page.total == 0 {
            println!("No servers match the current filters");
            return;
        }
        for server in &page.servers {
            let tile = server_tile(server);
            println!(
                "{} {}",
                self.paint(&format!("[{}]", tile.id), self.palette.text_dim),
                self.paint(&tile.name, self.palette.accent)
            );
            println!("    Country:  {}", tile.country);
            println!("    City:     {}", tile.city);
            println!("    Load:     {}", tile.load);
            println!(
                "    Status:   {}",
                self.paint(&tile.status, self.palette.status_color(tile.online))
            );
            println!("    Hostname: {}", tile.hostname);
        }
        println!();
        println!("{}", page.summary());
        let mut navigation = Vec::new();
        if page.has_previous() {
            navigation.extend(["first", "prev"]);
        }
        if page.has_next() {
            navigation.extend(["next", "last"]);
        }
        if !navigation.is_empty() {
            println!(
                "{}",
                self.paint(
                    &format!("page {}", navigation.join(" | ")),
                    self.palette.text_dim
                )
            );
        }
    }

    fn print_sections(&self, sections: &[DetailSection]) {
        for section in sections {
            println!();
            println!("{}", self.paint(section.heading, self.palette.accent));
            for item in &section.items {
                println!("  {}: {}", item.label, item.value);
            }
        }
    }

    fn print_details(&self, server: &Server) {
        let details = server_details(server);
        println!("{}", self.paint(&details.title, self.palette.text_primary));
        self.print_sections(&details.sections);

        let token = self
            .controller
            .with_store(|store| store.token().map(str::to_string));
        let record = self.controller.record();
        let panel = connection_panel(
            server,
            token.as_deref(),
            record.as_ref(),
            &self.controller.state(),
        );
        println!();
        println!("{} {}", panel.token_label, panel.token_display);
        if panel.button_enabled {
            println!("Action: {}", panel.button_label);
        } else {
            println!("Action: {} (unavailable)", panel.button_label);
        }
        for line in &panel.message {
            println!("{}", self.paint(line, self.palette.online));
        }
        if panel.can_download {
            println!("Run `config` to download the WireGuard configuration");
        }
        if panel.can_clear_token {
            println!("Run `clear-token` to forget the stored access token");
        }
    }

    fn connect(
        &self,
        server: &Server,
        token: Option<&str>,
        deadline: Option<Duration>,
    ) -> Result<(), String> {
        println!("Connecting...");
        let outcome = match deadline {
            Some(deadline) => {
                let (handle, registration) = CancelHandle::pair();
                let timer = handle.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(deadline);
                    timer.cancel();
                });
                let result = block_on(
                    self.controller
                        .connect_cancellable(server, token, registration),
                );
                if result.is_err() && handle.is_cancelled() {
                    log::warn!("[controller] gave up after {}s", deadline.as_secs());
                }
                result
            }
            None => block_on(self.controller.connect(server, token)),
        }
        .map_err(|error| error.user_message())?;

        match outcome {
            ConnectOutcome::Connected(record) => {
                let summary = connection_summary(&record);
                println!("{}", self.paint(&summary.headline, self.palette.online));
                if let Some(notice) = summary.demo_notice {
                    println!("{}", self.paint(notice, self.palette.warning));
                }
                self.print_sections(&summary.sections);
            }
            ConnectOutcome::Disconnected { server_name } => {
                println!("Disconnected from {server_name}");
            }
        }
        Ok(())
    }

    fn print_status(&self) {
        let state = self.controller.state();
        println!(
            "Status: {}",
            self.paint(&state.label(), state.color(&self.palette))
        );
        println!(
            "Access token: {}",
            if self.controller.has_token() {
                "stored"
            } else {
                "not set"
            }
        );
        if let Some(record) = self.controller.record() {
            println!("Connected to {} (server {})", record.server_name, record.server_id);
            self.print_sections(&connection_summary(&record).sections);
        }
    }
}

fn parse_page_target(value: &str) -> Result<PageTarget, String> {
    match value {
        "first" => Ok(PageTarget::First),
        "prev" | "previous" => Ok(PageTarget::Previous),
        "next" => Ok(PageTarget::Next),
        "last" => Ok(PageTarget::Last),
        number => number
            .parse()
            .map(PageTarget::Number)
            .map_err(|_| format!("Unknown page {number:?}: use first, prev, next, last or a number")),
    }
}

fn server_from_record(record: &ConnectionRecord) -> Server {
    Server {
        id: record.server_id,
        name: record.server_name.clone(),
        station: record.server_ip.clone(),
        load: record.server_load,
        ..Server::default()
    }
}

/// The server `connect <id>` acts on. The connected server resolves from the
/// stored record when the cache no longer lists it, so it can always be
/// toggled off. Anything else needs a fresh list.
fn connect_target(
    id: u64,
    record: Option<&ConnectionRecord>,
    cached: Option<&[Server]>,
    fetch: impl FnOnce() -> Result<Vec<Server>, String>,
) -> Result<Server, String> {
    if let Some(server) = cached.and_then(|servers| find_server(servers, id)) {
        return Ok(server.clone());
    }
    if let Some(record) = record.filter(|record| record.server_id == id) {
        return Ok(server_from_record(record));
    }
    let servers = fetch()?;
    find_server(&servers, id)
        .cloned()
        .ok_or_else(|| format!("No server with id {id}"))
}

fn prompt(message: &str) -> Result<String, String> {
    print!("{message}");
    std::io::stdout()
        .flush()
        .map_err(|error| format!("Failed to write prompt: {error}"))?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|error| format!("Failed to read input: {error}"))?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        credentials::{Authenticity, Credentials},
        directory::fixtures::server,
    };

    fn record(server_id: u64) -> ConnectionRecord {
        ConnectionRecord {
            server_id,
            server_name: "Germany #7".into(),
            server_ip: "10.0.0.7".into(),
            server_load: 30,
            credentials: Credentials {
                id: 1,
                username: "user".into(),
                password: "pass".into(),
                nordlynx_private_key: "a2V5".into(),
                created_at: "N/A".into(),
                updated_at: "N/A".into(),
                authenticity: Authenticity::Authentic,
            },
            connected_at: None,
        }
    }

    #[test]
    fn connected_server_resolves_without_any_list() {
        let server = connect_target(7, Some(&record(7)), None, || {
            Err("list should not be loaded".into())
        })
        .unwrap();

        assert_eq!(server.id, 7);
        assert_eq!(server.name, "Germany #7");
        assert_eq!(server.station, "10.0.0.7");
    }

    #[test]
    fn connected_server_missing_from_refreshed_cache_still_resolves() {
        let cached = vec![server(1, "France", "Paris", 10, "online")];

        let server = connect_target(7, Some(&record(7)), Some(&cached), || {
            Err("list should not be loaded".into())
        })
        .unwrap();

        assert_eq!(server.id, 7);
    }

    #[test]
    fn other_servers_come_from_the_cache_or_a_fresh_list() {
        let cached = vec![server(1, "France", "Paris", 10, "online")];
        let from_cache =
            connect_target(1, Some(&record(7)), Some(&cached), || Err("unused".into())).unwrap();
        assert_eq!(from_cache.name, "France #1");

        let fetched = connect_target(2, None, Some(&cached), || {
            Ok(vec![server(2, "Japan", "Tokyo", 5, "online")])
        })
        .unwrap();
        assert_eq!(fetched.name, "Japan #2");

        assert_eq!(
            connect_target(3, None, None, || Ok(Vec::new())),
            Err("No server with id 3".to_string())
        );
    }
}
