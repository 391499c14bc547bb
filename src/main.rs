use color_eyre::{eyre::WrapErr, Result};
use relaylink::config::{self, DeviceConfig};
use relaylink::controller::{provision, Provisioned};
use relaylink::mqtt::MqttTransport;
use relaylink::relay::RelayBank;
use relaylink::session::{Collaborators, HostNetwork, SystemClock};
use relaylink::timer::Uptime;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    setup()?;
    let uptime = Uptime::start();

    let path = config::config_path();
    let config = config::load(&path)
        .await
        .wrap_err_with(|| format!("Failed to load configuration from {}", path.display()))?;

    let relays = RelayBank::from_config(&config.relay).wrap_err("Failed to set up relay outputs")?;

    let shutdown = CancellationToken::new();
    spawn_signal_watcher(shutdown.clone());

    match provision(&config, relays, collaborators(&config), uptime).await {
        Provisioned::Online(controller) => {
            let stopping = controller.start().run_until_shutdown(shutdown).await;
            stopping.shutdown().await;
        }
        Provisioned::LocalOnly(parked) => {
            parked.park_until_shutdown(shutdown).await;
        }
    }

    info!("relaylink exiting");
    Ok(())
}

fn collaborators(config: &DeviceConfig) -> Collaborators {
    Collaborators {
        transport: Box::new(MqttTransport::new(&config.broker)),
        link: Box::new(HostNetwork::new(config)),
        clock: Box::new(SystemClock::default()),
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Cancels `shutdown` on ctrl-c or SIGTERM.
fn spawn_signal_watcher(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => info!("Received {}, shutting down", name),
            Err(e) => error!("Signal handling failed, shutting down: {}", e),
        }
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| "ctrl-c"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    tracing::warn!("Only ctrl-c is handled on this platform");
    Ok("ctrl-c")
}
