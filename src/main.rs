use clap::Parser;
use l7dump::configuration::config::Config;
use l7dump::data_capture::FlowDirectory;
use l7dump::output::{OutputSink, StdoutSink};
use l7dump::session_management::{RunExit, SessionManager};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "l7dump")]
#[command(version = "0.1.0")]
#[command(about = "Passive MySQL and HTTP traffic reconstruction from reassembled TCP flows")]
struct Args {
    /// Tracker configuration (TOML, or JSON with a .json extension)
    config_file: PathBuf,

    /// Directory of reassembled flow directions named SRCIP.SRCPORT-DSTIP.DSTPORT
    flow_dir: PathBuf,

    /// Print one JSON object per emission instead of plain lines
    #[arg(long, action = clap::ArgAction::SetTrue)]
    json: bool,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    let args = Args::parse();

    info!("Importing configuration");
    let config = match Config::from_file(&args.config_file) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration from file: {}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration imported successfully");

    let sink: Arc<dyn OutputSink> = Arc::new(StdoutSink::new(args.json));
    let mut manager = match SessionManager::from_config(&config, sink) {
        Ok(manager) => manager,
        Err(e) => {
            error!("Unable to register trackers: {}", e);
            std::process::exit(1);
        }
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping");
            let _ = stop_tx.send(true);
        }
    });

    let mut source = match FlowDirectory::scan(&args.flow_dir, |flow| manager.accepts(flow)).await {
        Ok(source) => source,
        Err(e) => {
            error!("Unable to read flows from {}: {}", args.flow_dir.display(), e);
            std::process::exit(1);
        }
    };

    match manager.run(&mut source, stop_rx.clone()).await {
        Ok(RunExit::Exhausted) => manager.wait(stop_rx).await,
        Ok(RunExit::Shutdown) => manager.shutdown().await,
        Err(e) => {
            error!("Replay failed: {}", e);
            manager.shutdown().await;
            std::process::exit(1);
        }
    }
    info!("Done");
}
