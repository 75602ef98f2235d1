//! Command-line flags, `.env` loading, and logging bootstrap shared by the
//! agent and collector binaries.

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// `--loglevel` / `LOGLEVEL`: one of trace/debug/info/warn/error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[clap(rename_all = "lower")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

fn parse_duration(raw: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(raw)
}

/// Load `.env` from the current directory if present, the same way the
/// rest of the workspace loads it before reading flags.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(_) | Err(dotenvy::Error::Io(_)) => {}
        Err(err) => eprintln!("warning: failed to parse .env: {err}"),
    }
}

/// Initialize the process-wide tracing registry: an `EnvFilter` defaulting
/// to `default_directive`, overridable by `RUST_LOG`, layered with an `fmt`
/// layer. Call once, at process start.
pub fn init_tracing(default_directive: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Flags for the `vantage-agent` binary.
#[derive(Parser, Debug)]
#[command(name = "vantage-agent")]
#[command(about = "Per-node packet tracer, decoder, and flow streaming server")]
pub struct AgentArgs {
    /// Regular expression matching link names to attach the tracer to.
    #[arg(long, env = "TARGET_INTERFACES", default_value = "veth")]
    pub iface: String,

    /// Duration between identity-cache resyncs.
    #[arg(long, env = "SYNC_INTERVAL", default_value = "60s", value_parser = parse_duration)]
    pub sync_interval: Duration,

    /// Inter-read delay on the kernel ring.
    #[arg(long, env = "PERF_POLL_INTERVAL", default_value = "1ms", value_parser = parse_duration)]
    pub perf_poll_interval: Duration,

    /// This node's name, stamped into every flow.
    #[arg(long, env = "KUBERNETES_NODE")]
    pub k8s_node: String,

    /// Control-plane address.
    #[arg(long, env = "APISERVER_ADDRESS")]
    pub apiserver_address: String,

    /// gRPC listen port.
    #[arg(long, env = "LISTEN_PORT", default_value_t = 3000)]
    pub listen_port: u16,

    /// Announcement channel depth for each identity cache.
    #[arg(long, env = "CACHE_BUFFER_SIZE", default_value_t = 3000)]
    pub cache_buffer_size: usize,

    /// Flow ring capacity; must be a power of two.
    #[arg(long, env = "RING_CAPACITY", default_value_t = 2048)]
    pub ring_capacity: usize,

    #[arg(long, env = "LOGLEVEL", value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Path to an external kubeconfig; falls back to in-cluster config when unset.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,

    /// `/metrics` listen port.
    #[arg(long, env = "METRICS_PORT", default_value_t = 2112)]
    pub metrics_port: u16,
}

impl AgentArgs {
    pub fn parse_with_dotenv() -> Self {
        load_dotenv();
        Self::parse()
    }

    pub fn tracing_directive(&self) -> String {
        format!(
            "vantage_agent={level},vantage_core={level}",
            level = self.loglevel.as_str()
        )
    }
}

/// Flags for the `vantage-collector` binary.
#[derive(Parser, Debug)]
#[command(name = "vantage-collector")]
#[command(about = "Cluster-wide trace aggregator, identity resolver, and service graph")]
pub struct CollectorArgs {
    /// Agent(s) to dial; supports a DNS-based discovery scheme.
    #[arg(long, env = "TARGET_ADDR")]
    pub target: String,

    /// Collector gRPC listen port.
    #[arg(long, env = "LISTEN", default_value_t = 3001)]
    pub listen: u16,

    #[arg(long, env = "LOGLEVEL", value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// `/metrics` listen port.
    #[arg(long, env = "METRICS_PORT", default_value_t = 2112)]
    pub metrics_port: u16,

    /// Announcement channel depth for each identity cache.
    #[arg(long, env = "CACHE_BUFFER_SIZE", default_value_t = 3000)]
    pub cache_buffer_size: usize,

    /// Control-plane address.
    #[arg(long, env = "APISERVER_ADDRESS")]
    pub apiserver_address: String,

    /// Path to an external kubeconfig; falls back to in-cluster config when unset.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,
}

impl CollectorArgs {
    pub fn parse_with_dotenv() -> Self {
        load_dotenv();
        Self::parse()
    }

    pub fn tracing_directive(&self) -> String {
        format!(
            "vantage_collector={level},vantage_core={level}",
            level = self.loglevel.as_str()
        )
    }
}
