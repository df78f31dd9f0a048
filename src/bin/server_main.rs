//! Reverse proxy server binary: loads configuration, starts the HTTP
//! listener, and runs the background sweepers until a shutdown signal
//! arrives.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(name = "proxycore-server")]
#[command(about = "Multi-dialect AI API reverse proxy")]
struct Args {
    /// Settings TOML path; defaults to the platform config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    proxycore::logging::init();

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(proxycore::config::default_path);

    let mut settings = match proxycore::config::load(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            proxycore::logging::error("startup", &format!("failed to load {config_path:?}: {e}"));
            proxycore::config::Settings::default()
        }
    };
    if let Some(port) = args.port {
        settings.port = port;
    }
    proxycore::config::validate(&mut settings);

    let core = proxycore::ProxyCore::new(settings, config_path);
    let sweepers = core.spawn_sweepers();

    let ctrlc_core = core.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrlc_core.stop();
        }
    });

    proxycore::logging::info(
        "startup",
        &format!("listening on port {} with {} channels", core.port(), core.channel_count()),
    );

    proxycore::http::serve(core).await;

    for handle in sweepers {
        handle.abort();
    }
}
