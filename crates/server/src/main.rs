use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vmctl_common::prelude::Result;
use vmctl_common::telemetry;
use vmctl_server::app::App;
use vmctl_server::config::Config;
use vmctl_server::services;
use vmctl_server::state::AppState;
use vmctl_server::tasks::TaskRegistry;
use vmctl_server::vsphere::Vsphere;
use vmctl_server::vsphere::client::VsphereClient;

/// The main entry point for the server application.
///
#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging.
    let level = telemetry::level_for(Config::debug_from_env());
    let subscriber = telemetry::get_subscriber(level, std::io::stdout);
    if let Err(error) = telemetry::init_subscriber(subscriber) {
        eprintln!("{}", error);
        return ExitCode::FAILURE;
    }
    tracing::info!(target: "server", "Start!");

    match serve().await {
        Ok(()) => {
            tracing::info!(target: "server", "Stopped.");
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!(target: "server", %error, "Fatal error!");
            ExitCode::FAILURE
        }
    }
}

async fn serve() -> Result<()> {
    let config = Config::from_env()?;
    let address = config.get_address()?;
    let jsonrpc_address = config.get_jsonrpc_address()?;

    let vsphere: Arc<dyn Vsphere + Send + Sync> = Arc::new(VsphereClient::new(
        &config.vmware_url,
        &config.vmware_api_release,
        config.vmware_insecure,
    )?);
    vsphere.login().await?;
    tracing::info!(target: "server", "vCenter session ready.");

    let app_state = AppState::new(
        vsphere.clone(),
        config.defaults(),
        TaskRegistry::new(config.tasks_ttl()),
    )?;
    let shutdown = app_state.shutdown.clone();

    let keep_alive = tokio::spawn(services::keep_alive(vsphere.clone(), shutdown.clone()));
    let sweeper = app_state.tasks.clone().spawn_sweeper(shutdown.clone());
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let app = App::build(app_state.clone(), address).await?;
    tracing::info!(target: "server", "Listening on '{}'", app.get_url()?);
    let mut servers = vec![tokio::spawn(app.run(cancelled(shutdown.clone())))];

    if let Some(address) = jsonrpc_address {
        let jsonrpc = App::build_jsonrpc(app_state.clone(), address).await?;
        tracing::info!(target: "server", "JSON-RPC listening on '{}'", jsonrpc.get_url()?);
        servers.push(tokio::spawn(jsonrpc.run(cancelled(shutdown.clone()))));
    }

    for server in servers {
        if let Err(error) = server.await? {
            tracing::error!(target: "server", %error, "Server stopped with an error!");
        }
    }
    app_state.wait_for_workers().await;
    keep_alive.await?;
    sweeper.await?;

    if let Err(error) = vsphere.logout().await {
        tracing::warn!(target: "server", %error, "Logout failed");
    }

    Ok(())
}

async fn cancelled(shutdown: CancellationToken) {
    shutdown.cancelled().await
}

/// Cancels `shutdown` on SIGINT or SIGTERM. Running deployments see the
/// cancellation through their child tokens.
///
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(target: "server", %error, "Failed to listen for Ctrl+C!");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(target: "server", %error, "Failed to listen for SIGTERM!");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!(target: "server", "Ctrl+C received, shutting down."),
        _ = terminate => tracing::info!(target: "server", "SIGTERM received, shutting down."),
    }
    shutdown.cancel();
}
