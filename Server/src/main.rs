// main.rs

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::runtime;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, Layer};

mod asset;
mod configurl;
mod errors;
mod handlers;
mod livempd;
mod livesegment;
mod router;
mod types;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "livesim-server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8888")]
    port: u16,
    /// Log level (possible values: error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: LogLevel,
    /// Root directory with the VoD assets to loop
    #[arg(short, long, default_value = "./vod")]
    vod_root: std::path::PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_filter(match args.log_level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        });
    let subscriber = tracing_subscriber::registry().with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global default subscriber");

    info!("{:?}", args);

    // All VoD assets are loaded up front and are read-only afterwards.
    let store = Arc::new(asset::AssetStore::load(&args.vod_root)?);
    if store.is_empty() {
        warn!(root = %args.vod_root.display(), "no VoD assets found");
    } else {
        info!(assets = store.len(), "VoD assets loaded");
    }

    let app = router::create_router(store);

    let runtime = runtime::Builder::new_multi_thread()
        .thread_name_fn(|| {
            static WORKER_ID: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
            let id = WORKER_ID.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            format!("livesim w-{}", id)
        })
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let addr: std::net::SocketAddr = format!("0.0.0.0:{}", args.port).parse().unwrap();
        let sock = socket2::Socket::new(
            match addr {
                std::net::SocketAddr::V4(_) => socket2::Domain::IPV4,
                std::net::SocketAddr::V6(_) => socket2::Domain::IPV6,
            },
            socket2::Type::STREAM,
            None,
        )
        .unwrap();

        sock.set_reuse_address(true).unwrap();
        #[cfg(unix)]
        sock.set_reuse_port(true).unwrap();
        sock.set_nonblocking(true).unwrap();
        sock.bind(&addr.into()).unwrap();
        sock.listen(1024).unwrap();

        let listener = tokio::net::TcpListener::from_std(sock.into()).unwrap();
        info!(%addr, "server started");
        axum::serve(listener, app).await.unwrap();
    });

    Ok(())
}
