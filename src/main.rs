use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{filter, prelude::*};

use simple_app_server::handler::{self, http, mqtt, MultiHandler, Registry};
use simple_app_server::nsclient::HttpPool;
use simple_app_server::sync::{RoutingIdentity, Synchronizer};
use simple_app_server::{api, cmd, config, helpers, storage};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the configuration template
    Configfile {},
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let conf = config::Configuration::get(&cli.config)?;

    if let Some(cmd) = cli.command {
        match cmd {
            Commands::Configfile {} => cmd::configfile::run(&conf)?,
        }
        return Ok(());
    }

    let filter = filter::Targets::new().with_targets(vec![(
        "simple_app_server",
        Level::from_str(&conf.logging.level)?,
    )]);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    helpers::install_crypto_provider();
    storage::setup(&conf).await?;

    let sync = Synchronizer::new(
        Arc::new(HttpPool::new(conf.network_server.request_timeout)),
        RoutingIdentity::from(&conf.application_server),
        conf.network_server.request_timeout,
    );

    let mut registry = Registry::default();
    let http_client = reqwest::Client::builder()
        .timeout(conf.integration.http.timeout)
        .build()?;
    registry.register(
        http::KIND,
        Box::new(move |settings| {
            let h: Arc<dyn handler::Handler> =
                Arc::new(http::Handler::from_settings(settings, http_client.clone())?);
            Ok(h)
        }),
    );

    let mqtt: Arc<dyn handler::Handler> = Arc::new(mqtt::Handler::new(&conf.integration.mqtt)?);
    let multi = Arc::new(MultiHandler::new(
        vec![mqtt],
        registry,
        conf.integration.delivery_timeout,
    ));

    let state = api::ApiState {
        sync: Arc::new(sync),
        handler: multi.clone(),
    };

    tokio::select! {
        res = api::setup(&conf, state) => res?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    multi.close().await?;

    Ok(())
}
