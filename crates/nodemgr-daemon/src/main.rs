//! nodemgr daemon
//!
//! Remote access to launch descriptions over Zenoh.
//!
//! # Features
//!
//! - Lists package search roots and serves file contents
//! - Resolves include graphs of launch descriptions
//! - Loads launch descriptions with file and argument negotiation
//! - Tracks open launch descriptions for reload and unload
//! - Provides a REST-like JSON API via Zenoh queryables

use argh::FromArgs;
use nodemgr_daemon::{
    create_session, run_zenoh_api_server, ApiHandler, DaemonConfig, FileService, LaunchLoader,
};
use nodemgr_launch::PackagePath;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(FromArgs)]
/// nodemgr daemon - remote launch description access
struct Args {
    /// configuration file (default: ~/.nodemgr/daemon.yaml if present)
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// zenoh endpoint to connect to (overrides the configuration)
    #[argh(option, short = 'z')]
    zenoh_endpoint: Option<String>,

    /// log level filter (overrides the configuration)
    #[argh(option, short = 'l')]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args: Args = argh::from_env();

    let mut config = DaemonConfig::load(args.config.as_deref())?;
    if args.zenoh_endpoint.is_some() {
        config.zenoh_endpoint = args.zenoh_endpoint;
    }
    if args.log_level.is_some() {
        config.log_level = args.log_level;
    }

    let env = env_logger::Env::default().default_filter_or(config.log_level());
    env_logger::init_from_env(env);

    log::info!("Starting nodemgr-daemon...");

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    ctrlc::set_handler({
        let shutdown_tx = shutdown_tx.clone();
        move || {
            log::info!("Received Ctrl+C, shutting down gracefully...");
            shutdown_tx.send(()).ok();
        }
    })?;

    let roots = config.package_roots();
    if roots.is_empty() {
        log::warn!("No package search roots configured (ROS_PACKAGE_PATH is empty)");
    }
    for root in &roots {
        log::info!("  - search root {}", root.display());
    }

    let files = Arc::new(FileService::new(Arc::new(PackagePath::new(roots))));
    log::info!("Found {} packages", files.list_packages().len());

    let loader = Arc::new(LaunchLoader::new(files.clone()));
    let handler = ApiHandler::new(files, loader);

    log::info!("Connecting to Zenoh...");
    let endpoint = config.zenoh_endpoint();
    let session = create_session(Some(endpoint.as_str())).await?;

    let machine_id = config.machine_id();
    log::info!("nodemgr daemon running. Press Ctrl+C to exit.");
    log::info!("  Zenoh API queryables: nodemgr/{}/daemon/api/*", machine_id);

    run_zenoh_api_server(session, handler, machine_id, shutdown_rx).await?;

    log::info!("nodemgr daemon stopped.");

    Ok(())
}
