//! Process configuration.
//!
//! Every recognized environment variable is also a command-line flag; the
//! flat [`Cli`] is validated into the typed [`ServiceConfig`] the rest of
//! the process consumes.

use anyhow::Result;
use clap::{ArgAction, Parser};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use whatsgate_gateway::SupervisorConfig;
use whatsgate_model::{EventKind, EventTypeFlags};
use whatsgate_webhook::{Filter, SinkAuth, SinkConfig};

#[derive(Debug, Parser)]
#[command(
    name = "whatsgate-service",
    author,
    version,
    about = "Multi-tenant gateway fronting a chat-network transport"
)]
pub struct Cli {
    /// HTTP listen port.
    #[arg(long, env = "PORT", default_value_t = 3001)]
    pub port: u16,

    /// Sink URL for webhook deliveries; empty disables delivery.
    #[arg(long, env = "WEBHOOK_URL", default_value = "")]
    pub webhook_url: String,

    /// Outbound authentication scheme: basic, token, bearer, or empty.
    #[arg(long, env = "WEBHOOK_AUTH_TYPE", default_value = "")]
    pub webhook_auth_type: String,

    #[arg(long, env = "WEBHOOK_AUTH_USER")]
    pub webhook_auth_user: Option<String>,

    #[arg(long, env = "WEBHOOK_AUTH_PASSWORD")]
    pub webhook_auth_password: Option<String>,

    #[arg(long, env = "WEBHOOK_AUTH_TOKEN")]
    pub webhook_auth_token: Option<String>,

    /// Drop messages from broadcast lists and the status feed.
    #[arg(long, env = "WEBHOOK_SKIP_STATUS", default_value_t = true, action = ArgAction::Set)]
    pub webhook_skip_status: bool,

    /// Drop messages from group chats.
    #[arg(long, env = "WEBHOOK_SKIP_GROUPS", default_value_t = false, action = ArgAction::Set)]
    pub webhook_skip_groups: bool,

    /// Drop messages from broadcast channels.
    #[arg(long, env = "WEBHOOK_SKIP_CHANNELS", default_value_t = true, action = ArgAction::Set)]
    pub webhook_skip_channels: bool,

    /// Reserved; blocked-contact filtering is not implemented.
    #[arg(long, env = "WEBHOOK_SKIP_BLOCKED", default_value_t = false, action = ArgAction::Set)]
    pub webhook_skip_blocked: bool,

    /// Comma-separated event names; empty admits every event.
    #[arg(long, env = "WEBHOOK_ALLOWED_EVENTS", default_value = "")]
    pub webhook_allowed_events: String,

    /// Comma-separated event names that are never delivered.
    #[arg(long, env = "WEBHOOK_DENIED_EVENTS", default_value = "")]
    pub webhook_denied_events: String,

    /// Reserved for file-backed credential storage; unused.
    #[arg(long, env = "AUTH_BASE_DIR")]
    pub auth_base_dir: Option<String>,

    /// Render pairing strings to stdout.
    #[arg(long, env = "SHOW_QR_IN_TERMINAL", default_value_t = false, action = ArgAction::Set)]
    pub show_qr_in_terminal: bool,

    /// Full connection URL for the key-value service; overrides the
    /// host/port/db/password parts below.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "REDIS_HOST", default_value = "127.0.0.1")]
    pub redis_host: String,

    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,

    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    pub redis_db: u32,

    #[arg(long, env = "REDIS_PASSWORD")]
    pub redis_password: Option<String>,

    /// Keep-alive ping interval in milliseconds.
    #[arg(long, env = "KEEP_ALIVE_PING_INTERVAL", default_value_t = 30000)]
    pub keep_alive_ping_interval: u64,

    /// Keep-alive pong window in milliseconds.
    #[arg(long, env = "KEEP_ALIVE_PONG_TIMEOUT", default_value_t = 10000)]
    pub keep_alive_pong_timeout: u64,

    /// Missed pongs before a connection is declared dead.
    #[arg(long, env = "KEEP_ALIVE_MAX_MISSED_PONGS", default_value_t = 3)]
    pub keep_alive_max_missed_pongs: u32,

    /// Health-check interval in milliseconds.
    #[arg(long, env = "HEALTH_CHECK_INTERVAL", default_value_t = 60000)]
    pub health_check_interval: u64,

    /// Idle time in milliseconds before the health prober round-trips.
    #[arg(long, env = "MAX_IDLE_TIME", default_value_t = 300000)]
    pub max_idle_time: u64,

    /// Reconnect automatically after recoverable disconnects.
    #[arg(long, env = "AUTO_RECONNECT", default_value_t = true, action = ArgAction::Set)]
    pub auto_reconnect: bool,

    /// Reconnect attempts before a session gives up.
    #[arg(long, env = "MAX_RECONNECT_ATTEMPTS", default_value_t = 10)]
    pub max_reconnect_attempts: u32,
}

/// Validated process configuration.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub listen: SocketAddr,
    pub redis_url: String,
    pub sink: Option<SinkConfig>,
    pub filter: Filter,
    pub supervisor: SupervisorConfig,
    pub auth_base_dir: Option<String>,
}

impl TryFrom<Cli> for ServiceConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self> {
        let listen = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), cli.port);

        let redis_url = match &cli.redis_url {
            Some(url) if !url.is_empty() => url.clone(),
            _ => compose_redis_url(
                &cli.redis_host,
                cli.redis_port,
                cli.redis_db,
                cli.redis_password.as_deref(),
            ),
        };

        let sink = if cli.webhook_url.is_empty() {
            None
        } else {
            Some(SinkConfig {
                url: cli.webhook_url.clone(),
                auth: SinkAuth::from_parts(
                    &cli.webhook_auth_type,
                    cli.webhook_auth_user.as_deref(),
                    cli.webhook_auth_password.as_deref(),
                    cli.webhook_auth_token.as_deref(),
                ),
            })
        };

        if !cli.webhook_auth_type.is_empty()
            && !matches!(cli.webhook_auth_type.as_str(), "basic" | "token" | "bearer")
        {
            anyhow::bail!("unknown WEBHOOK_AUTH_TYPE `{}`", cli.webhook_auth_type);
        }

        let (allowed, unknown_allowed) = parse_event_list(&cli.webhook_allowed_events);
        let (denied, unknown_denied) = parse_event_list(&cli.webhook_denied_events);

        for name in unknown_allowed.iter().chain(&unknown_denied) {
            tracing::warn!(event = %name, "ignoring unknown event name in filter configuration");
        }

        let filter = Filter {
            skip_status: cli.webhook_skip_status,
            skip_groups: cli.webhook_skip_groups,
            skip_channels: cli.webhook_skip_channels,
            skip_blocked: cli.webhook_skip_blocked,
            allowed,
            denied,
        };

        let supervisor = SupervisorConfig {
            ping_interval: Duration::from_millis(cli.keep_alive_ping_interval.max(1)),
            pong_timeout: Duration::from_millis(cli.keep_alive_pong_timeout.max(1)),
            max_missed_pongs: cli.keep_alive_max_missed_pongs.max(1),
            health_check_interval: Duration::from_millis(cli.health_check_interval.max(1)),
            max_idle_time: Duration::from_millis(cli.max_idle_time),
            auto_reconnect: cli.auto_reconnect,
            max_reconnect_attempts: cli.max_reconnect_attempts,
            show_qr: cli.show_qr_in_terminal,
            ..SupervisorConfig::default()
        };

        Ok(Self {
            listen,
            redis_url,
            sink,
            filter,
            supervisor,
            auth_base_dir: cli.auth_base_dir,
        })
    }
}

fn compose_redis_url(host: &str, port: u16, db: u32, password: Option<&str>) -> String {
    match password {
        Some(password) if !password.is_empty() => {
            format!("redis://:{password}@{host}:{port}/{db}")
        }
        _ => format!("redis://{host}:{port}/{db}"),
    }
}

/// Parse a comma-separated list of event names into filter flags,
/// returning names that match nothing for the caller to report.
fn parse_event_list(raw: &str) -> (EventTypeFlags, Vec<String>) {
    let mut flags = EventTypeFlags::empty();
    let mut unknown = Vec::new();

    for name in raw.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        match EventKind::from_name(name) {
            Some(kind) => flags |= EventTypeFlags::from(kind),
            None => unknown.push(name.to_owned()),
        }
    }

    (flags, unknown)
}
