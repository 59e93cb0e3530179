use core::time::Duration;

use anyhow::bail;
use clap::{Parser, ValueEnum};
use flakeguard::{GeneratorOptions, NodeConfig, WatermarkPolicy};

/// Runtime configuration for the `flakeguard-server` binary.
///
/// Every value can come from a CLI flag or its environment variable (a `.env`
/// file is loaded first), falling back to the defaults below.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "flakeguard-server",
    version,
    about = "A Redis-protocol service for cluster-unique, time-ordered 64-bit IDs"
)]
pub struct CliArgs {
    /// TCP port to listen on.
    ///
    /// Environment variable: `PORT`
    #[arg(long, env = "PORT", default_value_t = 6379)]
    pub port: u16,

    /// Interface to bind.
    ///
    /// Environment variable: `HOST`
    #[arg(long, env = "HOST", default_value_t = String::from("0.0.0.0"))]
    pub host: String,

    /// Machine ID embedded in every ID (0-63). The Consul watermark is kept
    /// per machine ID, so no two running processes may share one.
    ///
    /// Environment variable: `MACHINE_ID`
    #[arg(long = "machine", env = "MACHINE_ID", default_value_t = 0)]
    pub machine_id: u64,

    /// Node ID embedded in every ID (0-63).
    ///
    /// Environment variable: `NODE_ID`
    #[arg(long = "node", env = "NODE_ID", default_value_t = 0)]
    pub node_id: u64,

    /// Where the clock watermark is persisted. `memory` keeps it in process
    /// and offers no protection across restarts.
    ///
    /// Environment variable: `STORE`
    #[arg(long, env = "STORE", value_enum, default_value_t = StoreKind::Consul)]
    pub store: StoreKind,

    /// Consul HTTP address. `http://` is assumed when no scheme is given.
    ///
    /// Environment variable: `CONSUL_ADDR`
    #[arg(long, env = "CONSUL_ADDR", default_value_t = String::from("127.0.0.1:8500"))]
    pub consul_addr: String,

    /// Consul ACL token sent as `X-Consul-Token`.
    ///
    /// Environment variable: `CONSUL_HTTP_TOKEN`
    #[arg(long, env = "CONSUL_HTTP_TOKEN", hide_env_values = true)]
    pub consul_token: Option<String>,

    /// What to do with an ID whose watermark write failed.
    ///
    /// Environment variable: `WATERMARK_POLICY`
    #[arg(long, env = "WATERMARK_POLICY", value_enum, default_value_t = PolicyArg::Durable)]
    pub watermark_policy: PolicyArg,

    /// Upper bound for a single Consul call, in milliseconds.
    ///
    /// Environment variable: `STORE_TIMEOUT_MS`
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value_t = 3_000)]
    pub store_timeout_ms: u64,

    /// Maximum number of concurrently served clients. Further connections
    /// wait in the accept backlog.
    ///
    /// Environment variable: `MAX_CONNECTIONS`
    #[arg(long, env = "MAX_CONNECTIONS", default_value_t = 10_000)]
    pub max_connections: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Consul,
    Memory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    /// Discard the ID and reply with an error.
    Durable,
    /// Log the failure and hand out the ID anyway.
    BestEffort,
}

impl From<PolicyArg> for WatermarkPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Durable => Self::Durable,
            PolicyArg::BestEffort => Self::BestEffort,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub node: NodeConfig,
    pub port: u16,
    pub listen_addr: String,
    pub store: StoreKind,
    pub consul_addr: String,
    pub consul_token: Option<String>,
    pub options: GeneratorOptions,
    pub max_connections: usize,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let node = NodeConfig::try_new(args.machine_id, args.node_id)?;

        if args.store_timeout_ms == 0 {
            bail!("STORE_TIMEOUT_MS must be greater than 0");
        }

        if args.max_connections == 0 {
            bail!("MAX_CONNECTIONS must be greater than 0");
        }

        if args.store == StoreKind::Consul && args.consul_addr.trim().is_empty() {
            bail!("CONSUL_ADDR must not be empty when STORE=consul");
        }

        Ok(Self {
            node,
            port: args.port,
            listen_addr: format!("{}:{}", args.host, args.port),
            store: args.store,
            consul_addr: args.consul_addr,
            consul_token: args.consul_token.filter(|t| !t.is_empty()),
            options: GeneratorOptions {
                policy: args.watermark_policy.into(),
                store_timeout: Duration::from_millis(args.store_timeout_ms),
            },
            max_connections: args.max_connections,
        })
    }
}
