use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tutor_client::{AskOptions, ClientConfig, ProxyClient, RequestPhase, Session};
use tutor_protocol::DEFAULT_USER_ID;
use tutor_proxy::ProxyConfig;

#[derive(Parser)]
#[command(name = "tutor", about = "Streaming front door for the security tutor backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the stream proxy in front of the tutor backend.
    Serve(ServeArgs),
    /// Ask one question through a running proxy and print the answer.
    Ask(AskArgs),
}

#[derive(clap::Args)]
struct ServeArgs {
    #[arg(long)]
    host: Option<String>,
    /// Defaults to `PORT`, then 3001.
    #[arg(long)]
    port: Option<u16>,
    /// Backend base URL. Defaults to `BACKEND_URL`, then http://localhost:8000.
    #[arg(long)]
    backend: Option<String>,
    /// Seconds to wait for the backend before emitting an error frame.
    #[arg(long, value_name = "SECS")]
    backend_timeout: Option<u64>,
}

#[derive(clap::Args)]
struct AskArgs {
    message: String,
    /// Proxy stream endpoint. Defaults to `TUTOR_PROXY_URL`.
    #[arg(long)]
    proxy: Option<String>,
    /// Only answer from knowledge-base evidence.
    #[arg(long)]
    strict: bool,
    #[arg(long)]
    topic: Option<String>,
    #[arg(long, default_value = DEFAULT_USER_ID)]
    user_id: String,
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
    /// Also print the aggregated response as JSON.
    #[arg(long)]
    json: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let _ = dotenvy::dotenv();
    init_tracing();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Ask(args) => ask(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ProxyConfig::from_env()?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(backend) = args.backend {
        config.backend_url = backend;
    }
    config.backend_timeout = args.backend_timeout.map(Duration::from_secs);

    tutor_proxy::serve(config).await?;
    Ok(())
}

async fn ask(args: AskArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ClientConfig::from_env();
    if let Some(proxy) = args.proxy {
        config.endpoint = proxy;
    }
    config.timeout = args.timeout.map(Duration::from_secs);
    info!(endpoint = %config.endpoint, "asking");

    let mut session = Session::new(ProxyClient::new(config)).with_options(AskOptions {
        strict_mode: args.strict,
        user_id: args.user_id,
        ui_topic: args.topic,
        optional_artifacts: None,
    });
    session.submit(&args.message)?;

    let phase = tokio::select! {
        phase = session.join() => phase,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            session.abort();
            session.phase()
        }
    };

    let transcript = session.transcript();
    let reply = transcript
        .turns()
        .last()
        .map(|turn| turn.content.as_str())
        .unwrap_or_default();
    println!("{reply}");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&session.aggregate().to_value())?);
    }

    match phase {
        RequestPhase::Failed => Err(reply.into()),
        RequestPhase::Aborted => Err("request aborted".into()),
        _ => Ok(()),
    }
}
