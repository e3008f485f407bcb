//! Operator CLI for canon.

use anyhow::{Context, Result};
use canon_core::config::AppConfig;
use canon_core::inventory::HostReport;
use canon_core::listing::{CountScope, ListOptions, OrderDirection};
use canon_metadata::MetadataStore;
use canon_metadata::models::HostRow;
use canon_metadata::repos::{TitleListOptions, VulnerabilityListOptions};
use clap::{Args, Parser, Subcommand, ValueEnum};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "canonctl")]
#[command(about = "Operator CLI for canon inventory reconciliation")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "CANON_CONFIG",
        default_value = "config/canon.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile one host report (JSON) into the catalog
    Ingest {
        /// Host identifier
        #[arg(long)]
        host_id: i64,
        /// Report file; `-` reads stdin
        #[arg(long)]
        file: PathBuf,
    },
    /// Recompute every aggregate host count
    SyncCounts,
    /// List software titles with host counts
    Titles {
        #[command(flatten)]
        scope: ScopeArgs,
        /// Only titles with known vulnerabilities
        #[arg(long)]
        vulnerable: bool,
        /// Case-insensitive name or CVE substring
        #[arg(long)]
        search: Option<String>,
        #[command(flatten)]
        list: ListArgs,
    },
    /// List vulnerabilities, or show one with --cve
    Vulns {
        #[command(flatten)]
        scope: ScopeArgs,
        /// Show the software and operating systems affected by this CVE
        #[arg(long)]
        cve: Option<String>,
        /// Only CVEs on the CISA known-exploited list
        #[arg(long)]
        known_exploit: bool,
        /// Case-insensitive CVE substring
        #[arg(long)]
        search: Option<String>,
        #[command(flatten)]
        list: ListArgs,
    },
    /// List a host's current certificates
    Certs {
        /// Host identifier
        #[arg(long)]
        host_id: i64,
        #[command(flatten)]
        list: ListArgs,
    },
}

#[derive(Args, Clone)]
struct ScopeArgs {
    /// Team to count hosts for; 0 means hosts without a team
    #[arg(long)]
    team_id: Option<i64>,
}

#[derive(Args, Clone)]
struct ListArgs {
    /// Zero-based page number
    #[arg(long, default_value_t = 0)]
    page: u32,
    /// Results per page
    #[arg(long, default_value_t = canon_core::listing::DEFAULT_PER_PAGE)]
    per_page: u32,
    /// Column to order by
    #[arg(long)]
    order_key: Option<String>,
    /// Sort direction
    #[arg(long, value_enum)]
    order_direction: Option<Direction>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Direction {
    Asc,
    Desc,
}

impl From<ListArgs> for ListOptions {
    fn from(args: ListArgs) -> Self {
        ListOptions {
            page: args.page,
            per_page: args.per_page,
            order_key: args.order_key,
            order_direction: args.order_direction.map(|d| match d {
                Direction::Asc => OrderDirection::Asc,
                Direction::Desc => OrderDirection::Desc,
            }),
        }
    }
}

#[derive(Serialize)]
struct Page<T> {
    items: Vec<T>,
    /// Matching rows across all pages, when the listing counts them.
    #[serde(skip_serializing_if = "Option::is_none")]
    total: Option<i64>,
    #[serde(flatten)]
    meta: canon_core::listing::PaginationMetadata,
}

#[derive(Serialize)]
struct IngestSummary {
    host_id: i64,
    software: canon_metadata::models::HostSoftwareUpdate,
    certificates: Option<canon_metadata::models::CertificateSyncResult>,
    operating_system: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;

    let store = canon_metadata::from_config(&config.metadata, &config.reconcile)
        .await
        .context("failed to open metadata store")?;

    match cli.command {
        Commands::Ingest { host_id, file } => {
            let report = read_report(&file).await?;
            let summary = ingest(store, host_id, report).await?;
            print_json(&summary)
        }
        Commands::SyncCounts => {
            let stats = store
                .sync_all_counts(OffsetDateTime::now_utc())
                .await
                .context("failed to sync counts")?;
            print_json(&stats)
        }
        Commands::Titles {
            scope,
            vulnerable,
            search,
            list,
        } => {
            let opts = TitleListOptions {
                scope: CountScope::from_team_filter(scope.team_id),
                vulnerable_only: vulnerable,
                search,
                list: list.into(),
            };
            let (items, total, meta) = store
                .list_software_titles(&opts)
                .await
                .context("failed to list titles")?;
            print_json(&Page {
                items,
                total: Some(total),
                meta,
            })
        }
        Commands::Vulns {
            scope,
            cve,
            known_exploit,
            search,
            list,
        } => {
            let scope = CountScope::from_team_filter(scope.team_id);
            if let Some(cve) = cve {
                let detail = store
                    .get_vulnerability(&cve, scope)
                    .await
                    .with_context(|| format!("failed to load {cve}"))?;
                return print_json(&detail);
            }
            let opts = VulnerabilityListOptions {
                scope,
                known_exploit,
                search,
                list: list.into(),
            };
            let (items, total, meta) = store
                .list_vulnerabilities(&opts)
                .await
                .context("failed to list vulnerabilities")?;
            print_json(&Page {
                items,
                total: Some(total),
                meta,
            })
        }
        Commands::Certs { host_id, list } => {
            let (items, meta) = store
                .list_host_certificates(host_id, &list.into())
                .await
                .context("failed to list certificates")?;
            print_json(&Page {
                items,
                total: None,
                meta,
            })
        }
    }
}

/// Load configuration from an optional TOML file and `CANON_` env vars.
fn load_config(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if path.exists() {
        tracing::debug!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path.display());
    }

    figment
        .merge(Env::prefixed("CANON_").ignore(&["CONFIG"]).split("__"))
        .extract()
        .context("failed to load configuration")
}

async fn read_report(path: &Path) -> Result<HostReport> {
    let bytes = if path == Path::new("-") {
        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("failed to read report from stdin")?;
        buf
    } else {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?
    };
    serde_json::from_slice(&bytes).context("failed to parse host report")
}

async fn ingest(
    store: Arc<dyn MetadataStore>,
    host_id: i64,
    report: HostReport,
) -> Result<IngestSummary> {
    let now = OffsetDateTime::now_utc();
    let hostname = if report.hostname.trim().is_empty() {
        format!("host-{host_id}")
    } else {
        report.hostname.trim().to_string()
    };
    store
        .upsert_host(&HostRow {
            host_id,
            hostname,
            team_id: report.team_id,
            created_at: now,
            updated_at: now,
        })
        .await
        .context("failed to record host")?;

    let operating_system = match &report.operating_system {
        Some(os) => Some(
            store
                .set_host_operating_system(host_id, os)
                .await
                .context("failed to record operating system")?
                .to_string(),
        ),
        None => None,
    };

    let software = store
        .update_host_software(host_id, &report.software)
        .await
        .context("failed to reconcile host software")?;

    let certificates = match &report.certificates {
        Some(certs) => Some(
            store
                .update_host_certificates(host_id, certs)
                .await
                .context("failed to reconcile host certificates")?,
        ),
        None => {
            tracing::debug!(host_id, "report has no certificates; leaving stored set alone");
            None
        }
    };

    Ok(IngestSummary {
        host_id,
        software,
        certificates,
        operating_system,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{out}");
    Ok(())
}
