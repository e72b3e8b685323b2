///! Forwarding proxy
///! Lets a browser reach the generation API and the image CDN without CORS failures

mod proxy;

use clap::Parser;
use proxy::{ProxyState, Targets};
use tracing::info;

#[derive(Parser)]
#[command(name = "proxy-server")]
#[command(about = "CORS-friendly forwarding proxy for the Ark API and image CDN")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value = "3001")]
    port: u16,

    /// Upstream for /api/*
    #[arg(long)]
    api_target: Option<String>,

    /// Upstream for /image-proxy/*
    #[arg(long)]
    image_target: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("proxy_server=info,tower_http=info")
        .init();

    let mut targets = Targets::default();
    if let Some(api) = args.api_target {
        targets.api = api;
    }
    if let Some(images) = args.image_target {
        targets.images = images;
    }

    let addr = format!("{}:{}", args.host, args.port);
    info!("Proxy server listening on http://{}", addr);
    info!("  /api/*          -> {}", targets.api);
    info!("  /image-proxy/*  -> {}", targets.images);
    info!("  /health         - health check");

    let app = proxy::router(ProxyState::new(targets));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
