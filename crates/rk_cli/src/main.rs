use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rk_core::{Credential, Error, Result};
use rk_notify::{DeliveryFanout, NotifyClient};
use rk_pdf::{ImageFormat, PdfConverter};
use rk_scraper::{BrowserPortal, OrchestratorConfig, PortalConfig, ScrapeOrchestrator};
use rk_storage::LocalFileStorage;
use tracing::{error, info};
use url::Url;

const PORTAL_ID_ENV: &str = "RENRAKU_PORTAL_ID";
const PORTAL_PASSWORD_ENV: &str = "RENRAKU_PORTAL_PASSWORD";
const API_KEY_ENV: &str = "RENRAKU_API_KEY";

#[derive(Debug, Clone)]
struct HumanDuration(Duration);

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut total_seconds = 0u64;
        let mut current_number = String::new();
        let mut has_unit = false;

        for c in s.chars() {
            if c.is_ascii_digit() {
                current_number.push(c);
            } else if let Ok(num) = current_number.parse::<u64>() {
                match c {
                    's' => total_seconds += num,
                    'm' => total_seconds += num * 60,
                    'h' => total_seconds += num * 3600,
                    'd' => total_seconds += num * 86400,
                    _ => return Err(format!("Invalid duration unit: {}", c)),
                }
                current_number.clear();
                has_unit = true;
            } else if !c.is_whitespace() {
                return Err(format!("Invalid character in duration: {}", c));
            }
        }

        // a trailing bare number means seconds
        if !current_number.is_empty() {
            match current_number.parse::<u64>() {
                Ok(num) => {
                    total_seconds += num;
                    has_unit = true;
                }
                Err(_) => return Err("Invalid number in duration".to_string()),
            }
        }

        if !has_unit {
            return Err("Duration must include a number".to_string());
        }

        Ok(HumanDuration(Duration::from_secs(total_seconds)))
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(long, default_value = "memory")]
    storage: String,
    /// Connection URL for the storage backend (e.g. sqlite:renraku.db).
    #[arg(long)]
    storage_url: Option<String>,
    /// Root of the announcement portal.
    #[arg(long, default_value = "https://www.ra9.jp")]
    portal_url: String,
    #[arg(long, default_value = "/user")]
    login_path: String,
    #[arg(long, default_value = "/mypage/topics")]
    list_path: String,
    #[arg(long, default_value = "./downloads")]
    download_dir: String,
    /// Directory attachments are archived into after delivery.
    #[arg(long, default_value = "./files")]
    files_dir: String,
    /// Base URL of the notification provider API.
    #[arg(long, default_value = "https://notify-api.line.me")]
    provider_url: String,
    /// Portal login id; falls back to RENRAKU_PORTAL_ID.
    #[arg(long)]
    portal_id: Option<String>,
    /// Portal login password; falls back to RENRAKU_PORTAL_PASSWORD.
    #[arg(long)]
    portal_password: Option<String>,
    /// Keep going when one article fails instead of aborting the run.
    #[arg(long)]
    continue_on_error: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Scrape the portal once and deliver anything new.
    Run {
        /// Run in periodic mode with the specified interval (e.g. 24h, 30m, 1h15m30s)
        #[arg(long)]
        interval: Option<HumanDuration>,
    },
    /// Serve the HTTP trigger and token-management endpoints.
    Serve {
        #[arg(long, default_value = "0.0.0.0:3000")]
        addr: String,
        /// Shared secret for the revoke endpoint; falls back to RENRAKU_API_KEY.
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Convert a PDF to per-page images without scraping anything.
    Pdf2img {
        path: String,
        #[arg(long, default_value = "jpeg")]
        format: ImageFormat,
        #[arg(long, default_value = "./output")]
        out_dir: String,
    },
}

fn resolve(flag: Option<String>, env_var: &str, what: &str) -> Result<String> {
    flag.or_else(|| std::env::var(env_var).ok())
        .ok_or_else(|| Error::External(anyhow::anyhow!("{} not set (flag or {})", what, env_var)))
}

fn credential(cli: &Cli) -> Result<Credential> {
    Ok(Credential {
        id: resolve(cli.portal_id.clone(), PORTAL_ID_ENV, "portal id")?,
        password: resolve(cli.portal_password.clone(), PORTAL_PASSWORD_ENV, "portal password")?,
    })
}

async fn build_orchestrator(
    cli: &Cli,
) -> Result<(Arc<ScrapeOrchestrator>, Arc<DeliveryFanout>, Arc<dyn rk_core::CredentialStore>)> {
    let (articles, credentials) =
        rk_storage::create_stores(&cli.storage, cli.storage_url.as_deref()).await?;
    info!("storage initialized (using {})", cli.storage);

    let fanout = Arc::new(DeliveryFanout::new(
        NotifyClient::new(cli.provider_url.clone()),
        credentials.clone(),
    ));
    let files = Arc::new(LocalFileStorage::new(cli.files_dir.clone()));

    let base_url =
        Url::parse(&cli.portal_url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
    let portal_config = PortalConfig::new(base_url, &cli.login_path, &cli.list_path)
        .with_download_dir(cli.download_dir.clone());
    let portal = Arc::new(BrowserPortal::new(portal_config));

    let mut config = OrchestratorConfig::new(credential(cli)?);
    config.abort_on_article_error = !cli.continue_on_error;

    let orchestrator = Arc::new(ScrapeOrchestrator::new(
        portal,
        fanout.clone(),
        articles,
        files,
        config,
    ));
    Ok((orchestrator, fanout, credentials))
}

async fn run_once(orchestrator: &ScrapeOrchestrator) -> Result<()> {
    let status = orchestrator.run().await?;
    info!("run finished: {}", status);
    println!("{}", status);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { interval } => {
            let (orchestrator, _, _) = build_orchestrator(&cli).await?;
            match interval {
                Some(interval) => {
                    info!("running every {}s", interval.0.as_secs());
                    loop {
                        if let Err(e) = run_once(&orchestrator).await {
                            error!("scrape run failed: {}", e);
                        }
                        info!("waiting {}s before next run", interval.0.as_secs());
                        tokio::time::sleep(interval.0).await;
                    }
                }
                None => run_once(&orchestrator).await?,
            }
        }
        Commands::Serve { addr, api_key } => {
            let (orchestrator, fanout, credentials) = build_orchestrator(&cli).await?;
            let api_key = resolve(api_key.clone(), API_KEY_ENV, "api key")?;
            let app = rk_web::create_app(rk_web::AppState {
                orchestrator,
                fanout,
                credentials,
                api_key,
            });
            info!("listening on {}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app)
                .await
                .map_err(|e| Error::External(anyhow::anyhow!("server error: {}", e)))?;
        }
        Commands::Pdf2img { path, format, out_dir } => {
            let written = PdfConverter::new()?.write_all_pages(
                std::path::Path::new(path),
                std::path::Path::new(out_dir),
                *format,
            )?;
            for path in written {
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}
