use clap::Parser;
use color_eyre::Result;
use serial_gateway::{
    cli,
    config::Config,
    endpoint::{Connector, EndpointId, MockEndpoints},
    logging, server,
};
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use tracing::{debug, info, Level};

#[cfg(unix)]
async fn hangup() -> Result<()> {
    signal(SignalKind::hangup())?.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn hangup() -> Result<()> {
    std::future::pending().await
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();

    if let Some(command) = cli.command {
        cli::handle_command(command);

        return Ok(());
    }

    logging::init(
        cli.log_level,
        cli.log_dir.map(|dir| (Level::DEBUG, dir)),
    )
    .await;

    let mut config = if let Some(config_path) = cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };

    if let Some(port) = cli.port {
        config.port = port;
    }

    let connector = if cli.mock_devices {
        info!("Using mocks instead of serial devices");
        config.controller.id = EndpointId::mock("controller");
        config.scanner.id = EndpointId::mock("scanner");

        Connector::new(MockEndpoints::draining())
    } else {
        Connector::default()
    };

    let shutdown = CancellationToken::new();
    let port = config.port;
    let mut server = tokio::spawn(server::run_on_port(
        config,
        connector,
        shutdown.clone(),
        port,
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        hung_up = hangup() => {
            hung_up?;
            info!("Told to hang up, quitting")
        }
        served = &mut server => {
            served??;
            return Err(color_eyre::eyre::eyre!("Server stopped unexpectedly"));
        }
    }

    shutdown.cancel();
    server.await??;

    info!("Bye");

    Ok(())
}
