use broker::BrokerSettings;
use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full CORS origin URLs that allowed to receive server responses.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "http://localhost:3000,https://localhost:3000"
    )]
    pub allowed_origins: Vec<String>,

    /// Hostname or IP address of the MQTT broker to connect to
    #[arg(long, env, default_value = "127.0.0.1")]
    pub mqtt_host: String,

    /// TCP port of the MQTT broker
    #[arg(long, env, default_value_t = 1883)]
    pub mqtt_port: u16,

    /// The client identifier this gateway connects to the broker with. Also
    /// the originating-client segment of every topic this gateway subscribes.
    /// Generated at startup when not provided.
    #[arg(long, env)]
    mqtt_client_id: Option<Uuid>,

    /// Username for broker authentication
    #[arg(long, env)]
    mqtt_username: Option<String>,

    /// Password for broker authentication
    #[arg(long, env)]
    mqtt_password: Option<String>,

    /// When true, connect over TLS without credentials; when false, use
    /// credentials over plain TCP. Unset falls back to credentials only if
    /// a username is configured.
    #[arg(long, env)]
    pub mqtt_trusted_connection: Option<bool>,

    /// Ask the broker to discard session state from previous connections
    #[arg(long, env, default_value_t = false)]
    pub mqtt_clean_session: bool,

    /// Interval in milliseconds between polls for a session's context while
    /// preparing the initial replay for a new connection
    #[arg(long, env, default_value_t = 250)]
    pub context_replay_poll_ms: u64,

    /// Maximum time in milliseconds to wait for a session's context before
    /// replaying an empty context to a new connection
    #[arg(long, env, default_value_t = 10_000)]
    pub context_replay_timeout_ms: u64,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,
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

    /// The gateway's broker client identifier, generating one when the
    /// config left it unset. Call once at startup and reuse the result:
    /// the identifier is embedded in every subscribed topic path.
    pub fn resolve_mqtt_client_id(&mut self) -> Uuid {
        let client_id = self.mqtt_client_id.unwrap_or_else(Uuid::new_v4);
        self.mqtt_client_id = Some(client_id);
        client_id
    }

    /// The broker connection settings resolved from this config.
    pub fn broker_settings(&mut self) -> BrokerSettings {
        BrokerSettings {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            client_id: self.resolve_mqtt_client_id(),
            username: self.mqtt_username.clone(),
            password: self.mqtt_password.clone(),
            trusted_connection: self.mqtt_trusted_connection,
            clean_session: self.mqtt_clean_session,
        }
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}
