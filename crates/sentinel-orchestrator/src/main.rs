//! CLI entry point for the Sentinel scan orchestrator.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use sentinel_connectors::cloud::azure::{AzureConnector, HttpAzureApi};
use sentinel_connectors::cloud::gcp::{GcpConnector, HttpGcpApi};
use sentinel_connectors::identity::entra::{EntraConnector, HttpEntraApi};
use sentinel_connectors::identity::okta::{HttpOktaApi, OktaConnector};
use sentinel_connectors::network::nmap::NmapConnector;
use sentinel_connectors::network::scanner::ProcessNmapRunner;
use sentinel_connectors::{
    ConnectorRegistry, ConnectorType, EnvSecretStore, SecretStore,
};
use sentinel_core::events::EventBus;
use sentinel_core::types::{TenantId, TenantPlan};
use sentinel_core::{ScanContext, SentinelError};
use sentinel_engram::store::FsEngramStore;
use sentinel_graph::{GraphClient, GraphConfig, GraphStore, Neo4jGraph};
use sentinel_intel::{
    CorrelationEngine, CpeDictionary, EpssClient, HttpEpssSource, HttpKevFeed, HttpNvdSource,
    KevClient, NvdClient, RateRegime,
};
use sentinel_orchestrator::history::{HistoryStore, MemoryHistory, PgHistory};
use sentinel_orchestrator::{Orchestrator, Settings};

#[derive(Parser)]
#[command(name = "sentinel-orchestrator")]
#[command(about = "Drives discovery connectors and vulnerability enrichment")]
struct Cli {
    /// Config file prefix (default: sentinel).
    #[arg(short, long, default_value = "sentinel")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one connector once and exit.
    Scan {
        #[arg(long)]
        tenant_id: Uuid,
        #[arg(long)]
        connector: String,
        /// Tenant plan: starter, professional, enterprise.
        #[arg(long, default_value = "professional")]
        plan: String,
    },
    /// Run the scheduler until interrupted.
    Daemon,
    /// Run one vulnerability enrichment sweep for a tenant.
    Enrich {
        #[arg(long)]
        tenant_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;

    let bus = EventBus::new();
    let graph = connect_graph(&settings, bus.clone()).await?;
    let engrams = Arc::new(FsEngramStore::new(&settings.engram_dir)?);
    let secrets = Arc::new(EnvSecretStore);

    match cli.command {
        Command::Scan {
            tenant_id,
            connector,
            plan,
        } => {
            let orchestrator =
                build_orchestrator(&settings, graph, engrams, secrets, bus).await?;
            orchestrator.recover().await?;
            let outcome = orchestrator
                .run_once(TenantId(tenant_id), parse_plan(&plan)?, &connector)
                .await?;
            tracing::info!(
                status = outcome.status.as_str(),
                nodes_found = outcome.nodes_found,
                nodes_updated = outcome.nodes_updated,
                "Scan finished"
            );
        }
        Command::Daemon => {
            let schedule = settings.schedule.clone();
            if schedule.is_empty() {
                anyhow::bail!("daemon mode requires at least one [[schedule]] entry");
            }
            let orchestrator =
                build_orchestrator(&settings, graph, engrams, secrets, bus).await?;
            orchestrator.recover().await?;

            let daemon = {
                let orchestrator = orchestrator.clone();
                tokio::spawn(orchestrator.run_daemon(schedule))
            };

            tokio::signal::ctrl_c().await?;
            tracing::info!("Signal received; draining in-flight runs");
            orchestrator.shutdown(Duration::from_secs(60)).await;
            daemon.abort();
        }
        Command::Enrich { tenant_id } => {
            let engine = build_enrichment(&settings, graph, engrams, bus)?;
            let ctx = ScanContext::new(TenantId(tenant_id), chrono::Utc::now());
            let outcome = engine.enrich_tenant(&ctx).await?;
            tracing::info!(
                services_scanned = outcome.services_scanned,
                vulnerabilities_found = outcome.vulnerabilities_found,
                kev = outcome.kev_count,
                "Enrichment sweep finished"
            );
        }
    }

    Ok(())
}

async fn connect_graph(
    settings: &Settings,
    bus: EventBus,
) -> anyhow::Result<Arc<dyn GraphStore>> {
    let config = GraphConfig {
        uri: settings.neo4j.uri.clone(),
        user: settings.neo4j.user.clone(),
        password: settings.neo4j.password.clone(),
        ..Default::default()
    };
    let client = GraphClient::connect(&config).await?;
    let graph = Neo4jGraph::new(client, bus);
    graph.ensure_schema().await?;
    Ok(Arc::new(graph))
}

async fn build_orchestrator(
    settings: &Settings,
    graph: Arc<dyn GraphStore>,
    engrams: Arc<FsEngramStore>,
    secrets: Arc<EnvSecretStore>,
    bus: EventBus,
) -> anyhow::Result<Arc<Orchestrator>> {
    let history: Arc<dyn HistoryStore> = match &settings.postgres_url {
        Some(url) => Arc::new(PgHistory::connect(url).await?),
        None => {
            tracing::warn!("No postgres_url configured; scan history is in-memory only");
            Arc::new(MemoryHistory::new())
        }
    };

    let registry = build_registry(settings, secrets.as_ref()).await?;
    Ok(Arc::new(Orchestrator::new(
        registry,
        graph,
        secrets,
        Some(engrams),
        history,
        bus,
        settings.staleness.clone(),
        settings.max_concurrent_runs,
    )))
}

/// Wire the configured connectors, binding HTTP transports from resolved
/// secrets. A connector that cannot be wired is skipped with a warning;
/// an empty registry is a startup failure.
async fn build_registry(
    settings: &Settings,
    secrets: &dyn SecretStore,
) -> anyhow::Result<ConnectorRegistry> {
    let mut registry = ConnectorRegistry::new();

    for entry in &settings.connectors {
        let wired: Result<(), SentinelError> = async {
            match entry.connector_type {
                ConnectorType::Okta => {
                    let secret = resolve(secrets, entry).await?;
                    let api = Arc::new(HttpOktaApi::from_secret(&secret)?);
                    registry.register(Arc::new(OktaConnector::new(
                        &entry.name,
                        entry.config.clone(),
                        api,
                    )));
                }
                ConnectorType::EntraId => {
                    let secret = resolve(secrets, entry).await?;
                    let api = Arc::new(HttpEntraApi::from_secret(&secret, false)?);
                    registry.register(Arc::new(EntraConnector::new(
                        &entry.name,
                        entry.config.clone(),
                        api,
                    )));
                }
                ConnectorType::Azure => {
                    let secret = resolve(secrets, entry).await?;
                    let api = Arc::new(HttpAzureApi::from_secret(&secret)?);
                    registry.register(Arc::new(AzureConnector::new(
                        &entry.name,
                        entry.config.clone(),
                        api,
                    )));
                }
                ConnectorType::Gcp => {
                    let secret = resolve(secrets, entry).await?;
                    let api = Arc::new(HttpGcpApi::from_secret(&secret)?);
                    registry.register(Arc::new(GcpConnector::new(
                        &entry.name,
                        entry.config.clone(),
                        api,
                    )));
                }
                ConnectorType::Nmap => {
                    let nmap_path = entry
                        .config
                        .extra_str("nmap_path")
                        .unwrap_or("nmap")
                        .to_string();
                    let runner = Arc::new(ProcessNmapRunner::new(&nmap_path));
                    registry.register(Arc::new(NmapConnector::new(
                        &entry.name,
                        entry.config.clone(),
                        runner,
                    )?));
                }
                ConnectorType::Aws | ConnectorType::Elastic => {
                    return Err(SentinelError::Config(format!(
                        "{} binds through an embedded Api implementation; \
                         register it from the host application",
                        entry.connector_type.as_str()
                    )));
                }
            }
            Ok(())
        }
        .await;

        if let Err(e) = wired {
            tracing::warn!(connector = %entry.name, error = %e, "Connector not wired; skipping");
        }
    }

    if registry.names().is_empty() {
        anyhow::bail!("no connectors could be wired from configuration");
    }
    Ok(registry)
}

async fn resolve(
    secrets: &dyn SecretStore,
    entry: &sentinel_orchestrator::settings::ConnectorEntry,
) -> Result<sentinel_connectors::Secret, SentinelError> {
    let reference = entry.config.credential_ref.as_deref().ok_or_else(|| {
        SentinelError::Config(format!("connector {} has no credential_ref", entry.name))
    })?;
    secrets.resolve(reference).await
}

fn build_enrichment(
    settings: &Settings,
    graph: Arc<dyn GraphStore>,
    engrams: Arc<FsEngramStore>,
    bus: EventBus,
) -> anyhow::Result<CorrelationEngine> {
    let dictionary = match &settings.intel.cpe_dictionary {
        Some(path) => CpeDictionary::from_path(std::path::Path::new(path))?,
        None => anyhow::bail!("enrichment requires intel.cpe_dictionary"),
    };

    let nvd_source = HttpNvdSource::new(
        settings.intel.nvd_base_url.as_deref(),
        settings.intel.nvd_api_key.clone(),
    )?;
    let regime = RateRegime::for_key(settings.intel.nvd_api_key.as_deref());
    let nvd = NvdClient::new(Arc::new(nvd_source), regime, Default::default());

    let epss = EpssClient::new(
        Arc::new(HttpEpssSource::new(settings.intel.epss_base_url.as_deref())?),
        &Default::default(),
    );
    let kev = KevClient::new(Arc::new(HttpKevFeed::new(
        settings.intel.kev_url.as_deref(),
    )?));

    Ok(CorrelationEngine::new(
        graph,
        nvd,
        epss,
        kev,
        dictionary,
        bus,
        Some(engrams),
    ))
}

fn parse_plan(raw: &str) -> anyhow::Result<TenantPlan> {
    match raw.to_lowercase().as_str() {
        "starter" => Ok(TenantPlan::Starter),
        "professional" => Ok(TenantPlan::Professional),
        "enterprise" => Ok(TenantPlan::Enterprise),
        other => anyhow::bail!("invalid plan: {other}. Choose: starter, professional, enterprise"),
    }
}
