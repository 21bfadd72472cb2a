//! Command-line flags. Every flag falls back to a `FLEET_*` environment
//! variable.

use anyhow::{Context, bail};
use clap::{ArgAction, Args, Parser, ValueEnum};
use fleet_core::maps::parse_key_values;
use fleet_core::{LabelFilter, PoolConfig, UserDataTemplate};
use fleet_providers::{DigitalOceanConfig, HetznerConfig, ProviderConfig};
use fleet_trace::{OtlpConfig, TracingConfig};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "fleet-autoscaler")]
#[command(author, version, about = "Scale Woodpecker CI agents on cloud providers", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(flatten)]
    pub server: ServerArgs,

    #[command(flatten)]
    pub pool: PoolArgs,

    /// Cloud provider hosting the agents
    #[arg(long, env = "FLEET_PROVIDER", value_enum)]
    pub provider: ProviderKind,

    /// User-data template replacing the built-in cloud-init
    #[arg(long, env = "FLEET_USER_DATA_FILE")]
    pub user_data_file: Option<PathBuf>,

    #[command(flatten)]
    pub hetzner: HetznerArgs,

    #[command(flatten)]
    pub digitalocean: DigitalOceanArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    #[value(name = "hetznercloud")]
    HetznerCloud,
    #[value(name = "digitalocean")]
    DigitalOcean,
}

#[derive(Debug, Args)]
pub struct LoggingArgs {
    /// Log level or filter directive (RUST_LOG takes precedence)
    #[arg(long, env = "FLEET_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "FLEET_LOG_JSON")]
    pub log_json: bool,

    /// OTLP collector endpoint; traces are exported when set
    #[arg(long, env = "FLEET_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Fraction of traces to sample
    #[arg(long, env = "FLEET_OTLP_SAMPLE_RATE", default_value_t = 1.0)]
    pub otlp_sample_rate: f64,
}

#[derive(Debug, Args)]
pub struct ServerArgs {
    /// CI server address
    #[arg(long, env = "FLEET_SERVER_URL", default_value = "http://localhost:8000")]
    pub server_url: String,

    /// CI server API token
    #[arg(long, env = "FLEET_SERVER_TOKEN", hide_env_values = true)]
    pub server_token: Option<String>,

    /// File holding the CI server API token
    #[arg(long, env = "FLEET_SERVER_TOKEN_FILE", conflicts_with = "server_token")]
    pub server_token_file: Option<PathBuf>,

    /// Timeout for a single CI server request
    #[arg(long, env = "FLEET_SERVER_TIMEOUT", default_value = "30s")]
    pub server_timeout: humantime::Duration,
}

#[derive(Debug, Args)]
pub struct PoolArgs {
    /// Interval between reconciliations
    #[arg(long, env = "FLEET_RECONCILIATION_INTERVAL", default_value = "1m")]
    pub reconciliation_interval: humantime::Duration,

    /// Pool id, part of every agent name
    #[arg(long, env = "FLEET_POOL_ID", default_value = "1")]
    pub pool_id: String,

    #[arg(long, env = "FLEET_MIN_AGENTS", default_value_t = 1)]
    pub min_agents: usize,

    #[arg(long, env = "FLEET_MAX_AGENTS", default_value_t = 10)]
    pub max_agents: usize,

    /// Workflows one agent runs in parallel
    #[arg(long, env = "FLEET_WORKFLOWS_PER_AGENT", default_value_t = 2)]
    pub workflows_per_agent: usize,

    /// Time without contact before an agent is removed
    #[arg(long, env = "FLEET_AGENT_INACTIVITY_TIMEOUT", default_value = "10m")]
    pub agent_inactivity_timeout: humantime::Duration,

    /// Time since last work before an agent may be removed
    #[arg(long, env = "FLEET_AGENT_IDLE_TIMEOUT", default_value = "10m")]
    pub agent_idle_timeout: humantime::Duration,

    /// Only count tasks with this label (key=value)
    #[arg(long, env = "FLEET_FILTER_LABELS")]
    pub filter_labels: Option<LabelFilter>,

    /// Agent container image
    #[arg(long, env = "FLEET_AGENT_IMAGE", default_value = "woodpeckerci/woodpecker-agent:next")]
    pub agent_image: String,

    /// Extra agent environment (key=value, comma separated)
    #[arg(long, env = "FLEET_AGENT_ENV", value_delimiter = ',')]
    pub agent_env: Vec<String>,

    /// gRPC address agents connect to
    #[arg(long, env = "FLEET_GRPC_ADDR", default_value = "woodpecker-server:9000")]
    pub grpc_addr: String,

    /// Agents connect to the gRPC endpoint over TLS
    #[arg(long, env = "FLEET_GRPC_SECURE")]
    pub grpc_secure: bool,
}

#[derive(Debug, Args)]
pub struct HetznerArgs {
    #[arg(long, env = "FLEET_HETZNERCLOUD_API_TOKEN", hide_env_values = true)]
    pub hetznercloud_api_token: Option<String>,

    #[arg(long, env = "FLEET_HETZNERCLOUD_API_URL", default_value = "https://api.hetzner.cloud/v1")]
    pub hetznercloud_api_url: String,

    /// Server types in order of preference, each type[:location]
    #[arg(long, env = "FLEET_HETZNERCLOUD_SERVER_TYPE", value_delimiter = ',', default_value = "cx22")]
    pub hetznercloud_server_type: Vec<String>,

    /// Location for server types given without one
    #[arg(long, env = "FLEET_HETZNERCLOUD_LOCATION")]
    pub hetznercloud_location: Option<String>,

    #[arg(long, env = "FLEET_HETZNERCLOUD_IMAGE", default_value = "ubuntu-24.04")]
    pub hetznercloud_image: String,

    /// SSH key names
    #[arg(long, env = "FLEET_HETZNERCLOUD_SSH_KEYS", value_delimiter = ',')]
    pub hetznercloud_ssh_keys: Vec<String>,

    /// Network names
    #[arg(long, env = "FLEET_HETZNERCLOUD_NETWORKS", value_delimiter = ',')]
    pub hetznercloud_networks: Vec<String>,

    /// Firewall names
    #[arg(long, env = "FLEET_HETZNERCLOUD_FIREWALLS", value_delimiter = ',')]
    pub hetznercloud_firewalls: Vec<String>,

    /// Extra server labels (key=value)
    #[arg(long, env = "FLEET_HETZNERCLOUD_LABELS", value_delimiter = ',')]
    pub hetznercloud_labels: Vec<String>,

    #[arg(long, env = "FLEET_HETZNERCLOUD_PUBLIC_IPV4_ENABLE", default_value_t = true, action = ArgAction::Set)]
    pub hetznercloud_public_ipv4_enable: bool,

    #[arg(long, env = "FLEET_HETZNERCLOUD_PUBLIC_IPV6_ENABLE", default_value_t = true, action = ArgAction::Set)]
    pub hetznercloud_public_ipv6_enable: bool,
}

#[derive(Debug, Args)]
pub struct DigitalOceanArgs {
    #[arg(long, env = "FLEET_DIGITALOCEAN_API_TOKEN", hide_env_values = true)]
    pub digitalocean_api_token: Option<String>,

    #[arg(long, env = "FLEET_DIGITALOCEAN_API_URL", default_value = "https://api.digitalocean.com/v2")]
    pub digitalocean_api_url: String,

    #[arg(long, env = "FLEET_DIGITALOCEAN_REGION", default_value = "nyc1")]
    pub digitalocean_region: String,

    #[arg(long, env = "FLEET_DIGITALOCEAN_SIZE", default_value = "s-1vcpu-1gb")]
    pub digitalocean_size: String,

    #[arg(long, env = "FLEET_DIGITALOCEAN_IMAGE", default_value = "ubuntu-22-04-x64")]
    pub digitalocean_image: String,

    /// SSH key id or fingerprint; an account key is picked when unset
    #[arg(long, env = "FLEET_DIGITALOCEAN_SSH_KEY")]
    pub digitalocean_ssh_key: Option<String>,

    #[arg(long, env = "FLEET_DIGITALOCEAN_TAGS", value_delimiter = ',')]
    pub digitalocean_tags: Vec<String>,

    #[arg(long, env = "FLEET_DIGITALOCEAN_VPC_UUID")]
    pub digitalocean_vpc_uuid: Option<String>,

    #[arg(long, env = "FLEET_DIGITALOCEAN_IPV6")]
    pub digitalocean_ipv6: bool,

    #[arg(long, env = "FLEET_DIGITALOCEAN_MONITORING", default_value_t = true, action = ArgAction::Set)]
    pub digitalocean_monitoring: bool,

    #[arg(long, env = "FLEET_DIGITALOCEAN_FIREWALL_ID")]
    pub digitalocean_firewall_id: Option<String>,
}

impl Cli {
    pub fn tracing_config(&self) -> TracingConfig {
        TracingConfig {
            log_level: self.logging.log_level.clone(),
            json: self.logging.log_json,
            otlp: self.logging.otlp_endpoint.clone().map(|endpoint| OtlpConfig {
                endpoint,
                sample_rate: self.logging.otlp_sample_rate,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn pool_config(&self) -> anyhow::Result<PoolConfig> {
        let pool = &self.pool;
        let environment = parse_key_values(&pool.agent_env).context("invalid --agent-env")?;

        Ok(PoolConfig {
            min_agents: pool.min_agents,
            max_agents: pool.max_agents,
            workflows_per_agent: pool.workflows_per_agent,
            pool_id: pool.pool_id.clone(),
            agent_inactivity_timeout: pool.agent_inactivity_timeout.into(),
            agent_idle_timeout: pool.agent_idle_timeout.into(),
            filter_labels: pool.filter_labels.clone(),
            image: pool.agent_image.clone(),
            environment,
            grpc_address: pool.grpc_addr.clone(),
            grpc_secure: pool.grpc_secure,
        })
    }

    pub fn server_token(&self) -> anyhow::Result<String> {
        if let Some(token) = self.server.server_token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(token.to_string());
        }
        if let Some(path) = &self.server.server_token_file {
            let token = std::fs::read_to_string(path)
                .with_context(|| format!("reading server token from {}", path.display()))?;
            return Ok(token.trim().to_string());
        }
        bail!("please provide a CI server API token (--server-token or --server-token-file)")
    }

    pub fn user_data_template(&self) -> anyhow::Result<UserDataTemplate> {
        match &self.user_data_file {
            Some(path) => {
                let source = std::fs::read_to_string(path)
                    .with_context(|| format!("reading user data template {}", path.display()))?;
                Ok(UserDataTemplate::new(source))
            }
            None => Ok(UserDataTemplate::default()),
        }
    }

    pub fn provider_config(&self) -> anyhow::Result<ProviderConfig> {
        match self.provider {
            ProviderKind::HetznerCloud => {
                let args = &self.hetzner;
                let labels = parse_key_values(&args.hetznercloud_labels)
                    .context("invalid --hetznercloud-labels")?;
                Ok(ProviderConfig::HetznerCloud(HetznerConfig {
                    api_token: required(&args.hetznercloud_api_token, "--hetznercloud-api-token")?,
                    api_url: args.hetznercloud_api_url.clone(),
                    server_types: args.hetznercloud_server_type.clone(),
                    location: args.hetznercloud_location.clone(),
                    image: args.hetznercloud_image.clone(),
                    ssh_keys: args.hetznercloud_ssh_keys.clone(),
                    networks: args.hetznercloud_networks.clone(),
                    firewalls: args.hetznercloud_firewalls.clone(),
                    labels,
                    enable_ipv4: args.hetznercloud_public_ipv4_enable,
                    enable_ipv6: args.hetznercloud_public_ipv6_enable,
                }))
            }
            ProviderKind::DigitalOcean => {
                let args = &self.digitalocean;
                Ok(ProviderConfig::DigitalOcean(DigitalOceanConfig {
                    api_token: required(&args.digitalocean_api_token, "--digitalocean-api-token")?,
                    api_url: args.digitalocean_api_url.clone(),
                    region: args.digitalocean_region.clone(),
                    size: args.digitalocean_size.clone(),
                    image: args.digitalocean_image.clone(),
                    ssh_key: args.digitalocean_ssh_key.clone(),
                    tags: args.digitalocean_tags.clone(),
                    vpc_uuid: args.digitalocean_vpc_uuid.clone(),
                    ipv6: args.digitalocean_ipv6,
                    monitoring: args.digitalocean_monitoring,
                    firewall_id: args.digitalocean_firewall_id.clone(),
                }))
            }
        }
    }
}

fn required(value: &Option<String>, flag: &str) -> anyhow::Result<String> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => bail!("{} is required for the selected provider", flag),
    }
}
