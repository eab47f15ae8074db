use clap::Parser;
use log::{error, info};
use std::{error::Error, fs::File, io::BufReader, sync::Arc, time::Duration};
use vetis_fleet::{
    address,
    admin::AdminServer,
    config::{loader, AdminConfig, DEFAULT_ADMIN_PORT},
    fleet::Fleet,
    server::handler::HandlerRegistry,
    DEFAULT_SHUTDOWN_CUTOFF,
};

#[derive(Parser)]
#[command(
    name = "vetis-fleet",
    about = "vetis-fleet - virtual host servers driven by an admin API",
    long_about = r#"
vetis-fleet - virtual host servers driven by an admin API

Usage:
    vetis-fleet [OPTIONS]

Options:
    -h, --help       Print help information
    -V, --version    Print version information
    -a, --admin      <ADDRESS>
                     Address of the admin API (default 127.0.0.1:2019)
    -c, --config     <CONFIG>
                     Config file loaded at startup
        --cutoff     <SECONDS>
                     Seconds a stopping server may spend on drain and hooks
"#
)]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1:2019", help = "Address of the admin API.")]
    admin: String,

    #[arg(short, long, required = false, help = "Config file loaded at startup.")]
    config: Option<String>,

    #[arg(long, help = "Seconds a stopping server may spend on drain and hooks.")]
    cutoff: Option<u64>,
}

async fn run() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();

    let cutoff = args
        .cutoff
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_SHUTDOWN_CUTOFF);

    let fleet = Arc::new(Fleet::new(HandlerRegistry::with_defaults(), cutoff));

    if let Some(path) = args.config {
        let file = File::open(&path)?;
        let configs = loader::load(&path, BufReader::new(file))?;
        fleet
            .create(configs)
            .await?;
    }

    let admin_address = address::resolve_or(&args.admin, DEFAULT_ADMIN_PORT).await?;
    let admin_config = AdminConfig::builder()
        .socket_addr(admin_address)
        .shutdown_cutoff(cutoff)
        .build()?;

    let mut admin = AdminServer::new(admin_config, fleet.clone());
    admin
        .start()
        .await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    admin
        .stop()
        .await?;
    fleet
        .shutdown(
            admin
                .config()
                .shutdown_cutoff(),
        )
        .await;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run().await {
        error!("Failed to run fleet: {}", e);
    }
    Ok(())
}
