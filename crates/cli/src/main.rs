use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use nexlink_core::ResourceRecord;
use nexlink_informer::{Informer, InformerConfig};
use nexlink_kubehub::ServiceSource;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod link;

use link::{Endpoint, LinkHandler};

#[derive(Parser, Debug)]
#[command(name = "nexlink", version, about = "nexlink is a tool for linking services between kubernetes clusters")]
struct Cli {
    /// Absolute path to the kubeconfig file
    #[arg(long, env = "KUBECONFIG", global = true, default_value_os_t = default_kubeconfig())]
    kubeconfig: PathBuf,

    /// Namespace to watch
    #[arg(long, short = 'n', env = "NAMESPACE", global = true, default_value = "default")]
    namespace: String,

    /// Watch services in every namespace (listings still show --namespace)
    #[arg(long = "all-namespaces", short = 'A', global = true, action = ArgAction::SetTrue)]
    all_namespaces: bool,

    /// Enable debug logging
    #[arg(long, env = "NEXLINK_DEBUG", global = true, action = ArgAction::SetTrue)]
    debug: bool,

    /// Re-deliver every cached service this often; zero or negative disables
    #[arg(long = "resync-secs", global = true, allow_hyphen_values = true)]
    resync_secs: Option<i64>,

    /// Output format for service listings
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync, print the namespace's services, then link changes until stopped (default)
    Run,
    /// Sync, print the namespace's services and exit
    Ls {
        /// Give up waiting for the initial sync after this many seconds
        #[arg(long = "wait-secs", default_value_t = 30)]
        wait_secs: u64,
    },
}

fn default_kubeconfig() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default().join(".kube").join("config")
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let env = std::env::var("NEXLINK_LOG").unwrap_or_else(|_| fallback.to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
    if debug {
        info!("Debug logging enabled");
    }
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("NEXLINK_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid NEXLINK_METRICS_ADDR; expected host:port");
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut quit = signal(SignalKind::quit()).context("installing SIGQUIT handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("waiting for SIGINT")?,
        _ = term.recv() => {}
        _ = quit.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    init_metrics();

    let mut config = InformerConfig::from_env().context("reading informer configuration")?;
    if let Some(secs) = cli.resync_secs {
        config = config.with_resync_secs(secs);
    }

    let client = nexlink_kubehub::client_from_kubeconfig(Some(&cli.kubeconfig)).await?;
    let server = nexlink_kubehub::probe(&client).await?;
    let scope = (!cli.all_namespaces).then_some(cli.namespace.as_str());
    info!(server = %server, ns = %scope.unwrap_or("(all)"), "connected to API server");

    let informer = Informer::new(Arc::new(ServiceSource::new(client, scope)), config)?;
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match shutdown_signal().await {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => warn!(error = %e, "signal handling failed; shutting down"),
            }
            cancel.cancel();
        }
    });
    let tasks = informer.spawn(Arc::new(LinkHandler), cancel.clone())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            if informer.wait_for_sync(&cancel).await {
                print_services(&informer.store().list_namespace(&cli.namespace), cli.output)?;
                info!("linking services; waiting for shutdown signal");
            }
            cancel.cancelled().await;
        }
        Commands::Ls { wait_secs } => {
            let synced = tokio::time::timeout(Duration::from_secs(wait_secs), informer.wait_for_sync(&cancel)).await;
            cancel.cancel();
            match synced {
                Ok(true) => print_services(&informer.store().list_namespace(&cli.namespace), cli.output)?,
                Ok(false) => warn!("stopped before initial sync"),
                Err(_) => {
                    tasks.join().await;
                    bail!("timed out waiting for caches to sync");
                }
            }
        }
    }

    tasks.join().await;
    let health = informer.health();
    info!(phase = ?health.phase, failures = health.consecutive_failures, version = health.version, "nexlink stopped");
    Ok(())
}

fn print_services(services: &[Arc<ResourceRecord>], output: Output) -> Result<()> {
    #[derive(serde::Serialize)]
    struct Row<'a> {
        namespace: &'a str,
        name: &'a str,
        version: u64,
        #[serde(flatten)]
        endpoint: Option<Endpoint>,
    }
    let rows: Vec<_> = services
        .iter()
        .map(|r| Row { namespace: &r.key.namespace, name: &r.key.name, version: r.version, endpoint: Endpoint::from_record(r).ok() })
        .collect();
    match output {
        Output::Human => {
            println!("{:<11} {:<24} {:<12} {:<16} {:<20} AGE", "NAMESPACE", "NAME", "TYPE", "CLUSTER-IP", "PORTS");
            for (row, r) in rows.iter().zip(services) {
                let (kind, ip, ports) = match &row.endpoint {
                    Some(ep) => (ep.kind.as_str(), ep.cluster_ip.as_deref().unwrap_or("None"), ep.ports_label()),
                    None => ("-", "-", "-".to_string()),
                };
                println!("{:<11} {:<24} {:<12} {:<16} {:<20} {}", row.namespace, row.name, kind, ip, ports, render_age(r));
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
    }
    Ok(())
}

fn render_age(r: &ResourceRecord) -> String {
    let created = r.raw
        .get("metadata")
        .and_then(|m| m.get("creationTimestamp"))
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok());
    let Some(created) = created else { return "-".to_string() };
    let mut secs = (chrono::Utc::now().timestamp() - created.timestamp()).max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}
