// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

use devprox::{broadcast, capture, config, proxy};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "devprox")]
struct Args {
    /// Listen address override, e.g. 127.0.0.1:3000
    #[arg(long)]
    listen: Option<String>,

    /// Config TOML path (upstream target, stages, capture limits)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    // A broken or target-less config is fatal: serving never starts.
    let mut cfg = if let Some(ref p) = args.config {
        config::Config::load_from_path(p).await?
    } else {
        let cfg = config::Config::default();
        cfg.validate()?;
        cfg
    };
    if let Some(listen) = args.listen {
        cfg.proxy.listen = listen;
    }

    let addr: SocketAddr = cfg.proxy.listen.parse()?;
    let cfg = Arc::new(cfg);

    let store = Arc::new(capture::CaptureStore::new(
        cfg.capture.capacity,
        cfg.capture.max_body_bytes,
    ));
    let broadcaster = Arc::new(broadcast::Broadcaster::new(cfg.inspector.channel_capacity));

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(%e, "failed to listen for shutdown signal");
        }
        info!("shutting down");
    };

    proxy::run_proxy_until(addr, store, broadcaster, cfg, shutdown).await
}
