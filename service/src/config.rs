use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default Cursor-Poll endpoint used when `REALTIME_URL` is not set.
pub const DEFAULT_REALTIME_URL: &str = "http://localhost:4000/realtime/events";

const MIN_POLL_INTERVAL_MS: u64 = 1000;
const MAX_POLL_INTERVAL_MS: u64 = 5000;

/// Which strategy obtains new events from the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// Periodic HTTP fetch keyed by an opaque cursor.
    Poll,
    /// Persistent server-sent events connection.
    Push,
}

#[derive(Debug, PartialEq, Eq)]
pub struct TransportKindParseError;

impl FromStr for TransportKind {
    type Err = TransportKindParseError;
    fn from_str(kind: &str) -> Result<TransportKind, Self::Err> {
        match kind.to_lowercase().as_str() {
            "poll" => Ok(TransportKind::Poll),
            "push" => Ok(TransportKind::Push),
            _ => Err(TransportKindParseError),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportKind::Poll => write!(f, "poll"),
            TransportKind::Push => write!(f, "push"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// The Cursor-Poll events endpoint (queried with `after_id` and `limit`)
    #[arg(long, env, default_value = DEFAULT_REALTIME_URL)]
    realtime_url: String,

    /// The server-push (SSE) endpoint. Required when the push transport is selected.
    #[arg(long, env)]
    push_url: Option<String>,

    /// Select the transport strategy used to obtain events.
    #[arg(
        short,
        long,
        env,
        default_value_t = TransportKind::Poll,
        value_parser = clap::builder::PossibleValuesParser::new(["poll", "push", "POLL", "PUSH"])
            .map(|s| s.parse::<TransportKind>().unwrap_or(TransportKind::Poll)),
        )]
    pub transport: TransportKind,

    /// Delay in milliseconds between two successful polls (clamped to 1000..=5000)
    #[arg(long, env, default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Maximum number of events requested per poll
    #[arg(long, env, default_value_t = 50)]
    pub batch_limit: u32,

    /// Prefix for the session storage keys holding the resume cursor
    #[arg(long, env, default_value = "realtime")]
    client_name: String,

    /// JSON file used as session storage. Cursor state is kept in memory when unset.
    #[arg(long, env)]
    session_file: Option<PathBuf>,

    /// Bearer token sent with every poll request and push connection.
    #[arg(long, env)]
    auth_token: Option<String>,

    /// Channels to subscribe to (event types, or `all` for every event)
    #[arg(
        short,
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "all"
    )]
    pub channels: Vec<String>,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap_or(LevelFilter::Info)),
        )]
    pub log_level_filter: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn realtime_url(&self) -> &str {
        &self.realtime_url
    }

    pub fn set_realtime_url(mut self, realtime_url: String) -> Self {
        self.realtime_url = realtime_url;
        self
    }

    pub fn push_url(&self) -> Option<&str> {
        self.push_url.as_deref()
    }

    pub fn set_push_url(mut self, push_url: String) -> Self {
        self.push_url = Some(push_url);
        self
    }

    /// Returns the poll interval clamped to the supported range.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.poll_interval_ms
                .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS),
        )
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn session_file(&self) -> Option<&Path> {
        self.session_file.as_deref()
    }

    pub fn set_session_file(mut self, session_file: PathBuf) -> Self {
        self.session_file = Some(session_file);
        self
    }

    /// Returns the bearer token, if configured.
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }
}
