//! Prometheus exporter for Redis `INFO` statistics.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use infoscrape::{
    client::{ClientOptions, ClientSet},
    CollectorConfig, Format, InfoCollector,
};
use infoscrape_exporter::MetricsExporter;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Metrics text format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    /// Prometheus text format.
    Prometheus,
    /// OpenMetrics text format.
    OpenMetrics,
}

impl From<FormatArg> for Format {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Prometheus => Self::Prometheus,
            FormatArg::OpenMetrics => Self::OpenMetrics,
        }
    }
}

/// Exports statistics reported by Redis `INFO` as Prometheus metrics.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address to serve metrics on.
    #[arg(long, env = "INFOSCRAPE_LISTEN", default_value = "0.0.0.0:9121")]
    listen: SocketAddr,
    /// Redis address in the `host:port` form.
    #[arg(long, env = "INFOSCRAPE_REDIS_ADDRESS", default_value = "127.0.0.1:6379")]
    redis_address: String,
    /// Password sent with `AUTH` after connecting.
    #[arg(long, env = "INFOSCRAPE_REDIS_PASSWORD", hide_env_values = true)]
    redis_password: Option<String>,
    /// Database index to report keyspace metrics for. Can be specified multiple times;
    /// must list databases in the order Redis reports them in the keyspace section.
    #[arg(
        long = "database",
        env = "INFOSCRAPE_DATABASES",
        value_delimiter = ',',
        default_value = "0"
    )]
    databases: Vec<u32>,
    /// `INFO` section to collect. Can be specified multiple times; later sections override
    /// same-named fields of earlier ones.
    #[arg(
        long = "section",
        env = "INFOSCRAPE_SECTIONS",
        value_delimiter = ',',
        default_values = ["Clients", "Memory", "Keyspace"]
    )]
    sections: Vec<String>,
    /// Namespace prepended to all metric names.
    #[arg(long, env = "INFOSCRAPE_NAMESPACE", default_value = CollectorConfig::DEFAULT_NAMESPACE)]
    namespace: String,
    /// Metrics text format.
    #[arg(long, env = "INFOSCRAPE_FORMAT", value_enum, default_value_t = FormatArg::Prometheus)]
    format: FormatArg,
    /// Timeout for a single scrape in milliseconds.
    #[arg(long, env = "INFOSCRAPE_SCRAPE_TIMEOUT_MS", default_value_t = 10_000)]
    scrape_timeout_ms: u64,
    /// Timeout for a single Redis request in milliseconds.
    #[arg(long, env = "INFOSCRAPE_REQUEST_TIMEOUT_MS", default_value_t = 5_000)]
    request_timeout_ms: u64,
    /// Do not write a marker key into each configured database on startup. Empty databases
    /// are then missing from the keyspace section.
    #[arg(long, env = "INFOSCRAPE_NO_SEED_DATABASES")]
    no_seed_databases: bool,
}

impl Cli {
    fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::new(&self.redis_address)
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms));
        if let Some(password) = &self.redis_password {
            options = options.with_password(password);
        }
        options
    }

    async fn run(self) -> anyhow::Result<()> {
        let clients = ClientSet::new(self.client_options(), &self.databases)
            .context("invalid database configuration")?;
        tracing::info!(
            redis_address = self.redis_address.as_str(),
            databases = ?self.databases,
            sections = ?self.sections,
            "Configured Redis clients"
        );

        if self.no_seed_databases {
            tracing::info!("Seeding databases is disabled");
        } else {
            clients
                .seed()
                .await
                .context("failed seeding configured databases")?;
            tracing::info!("Seeded all configured databases");
        }

        let config = CollectorConfig::new(self.sections, clients.databases())
            .context("invalid database configuration")?
            .with_namespace(self.namespace);
        let collector = InfoCollector::new(clients.primary().clone(), config);

        let (stop_sender, mut stop_receiver) = watch::channel(());
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            stop_sender.send_replace(());
        });

        let server = MetricsExporter::new(Arc::new(collector))
            .with_format(self.format.into())
            .with_scrape_timeout(Duration::from_millis(self.scrape_timeout_ms))
            .with_graceful_shutdown(async move {
                stop_receiver.changed().await.ok();
            })
            .bind(self.listen)
            .await
            .with_context(|| format!("failed binding to `{}`", self.listen))?;
        tracing::info!(local_addr = %server.local_addr(), "Serving metrics");
        server.start().await.context("metrics server failed")
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    Cli::parse().run().await
}
