use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use hyper::Request;
use restartable_http::pool::ConnectionManager;
use restartable_http::{config, HttpClient, RestartableHttpClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "restartable-http")]
#[command(version, about = "HTTP client whose connection pool can be rebuilt at runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (falls back to RHTTP_* environment variables)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a URL, optionally restarting the client between requests
    Get {
        url: String,

        /// Number of requests to issue
        #[arg(long, default_value = "1")]
        count: usize,

        /// Restart the client after every N requests (0 = never)
        #[arg(long, default_value = "0")]
        restart_every: usize,
    },

    /// Load configuration and print the client it produces
    CheckConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config = config::load_config(cli.config.as_deref())?;
    let client = RestartableHttpClient::from_config(&config)?;
    client.setup();

    match cli.command {
        Commands::Get {
            url,
            count,
            restart_every,
        } => cmd_get(&client, &url, count, restart_every).await,
        Commands::CheckConfig => cmd_check_config(&client),
    }
}

async fn cmd_get(
    client: &RestartableHttpClient,
    url: &str,
    count: usize,
    restart_every: usize,
) -> Result<()> {
    for i in 1..=count {
        let request = Request::get(url)
            .body(Bytes::new())
            .context(format!("Invalid URL: {}", url))?;

        let response = client
            .execute(request)
            .await
            .context(format!("GET {} failed", url))?;

        println!(
            "{} {} bytes (generation {})",
            response.status(),
            response.body().len(),
            client.generation()
        );

        if restart_every > 0 && i % restart_every == 0 && i < count {
            client.restart().context("Client restart failed")?;
        }
    }

    Ok(())
}

fn cmd_check_config(client: &RestartableHttpClient) -> Result<()> {
    let manager = client.connection_manager()?;
    for scheme in manager.scheme_registry().iter() {
        let kind = if scheme.socket_factory().is_tls() { "tls" } else { "plain" };
        println!("{:<8} port {:<5} {}", scheme.name(), scheme.default_port(), kind);
    }

    let params = client.params()?;
    println!("gzip:            {}", client.is_gzip_enabled());
    println!("request timeout: {:?}", params.request_timeout);
    println!("user agent:      {}", params.user_agent);
    Ok(())
}
