use anyhow::{Context, Result};
use files_launcher::config::{LauncherConfig, LocalSettings};
use files_launcher::ipc::{Connection, pipe};
use files_launcher::launcher::elevation::{Elevator, SystemElevator};
use files_launcher::launcher::startup::{self, SystemProcessControl};
use files_launcher::launcher::{Launcher, default_handlers};
use files_launcher::logging::{self, LogConfig};
use std::sync::Arc;
use std::time::Duration;

const FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let config = LauncherConfig::load(&LauncherConfig::default_path())
        .context("Failed to load launcher configuration")?;

    // Keep the guard alive for the entire process lifetime
    let _log_guard =
        logging::init_logging(LogConfig::from(&config)).context("Failed to initialize logging system")?;

    tracing::info!(target: "main", version = env!("CARGO_PKG_VERSION"), "Starting launcher");

    let mut settings = match LocalSettings::load(LocalSettings::default_path()) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(target: "main", error = %e, "Failed to load local settings, using empty settings");
            LocalSettings::default()
        }
    };

    if let Some(action) = startup::take_startup_action(&mut settings)? {
        if let Err(e) = startup::run_startup_action(&action, &SystemProcessControl) {
            tracing::error!(target: "main", error = %e, "Startup action failed");
        }
        return Ok(());
    }

    let elevator = Arc::new(SystemElevator);
    if std::env::args().skip(1).any(|arg| arg == "elevate") && !elevator.is_elevated() {
        match elevator.relaunch_elevated() {
            Ok(()) => {
                tracing::info!(target: "main", "Relaunched elevated, exiting");
                return Ok(());
            }
            Err(e) => tracing::warn!(target: "main", error = %e, "Elevated relaunch failed, continuing"),
        }
    }

    let pipe_name = config.pipe_name.clone().unwrap_or_else(|| {
        let session_id = config.session_id.unwrap_or_else(pipe::current_session_id);
        let package_sid = config
            .package_sid
            .clone()
            .or_else(|| settings.get_str("PackageSid").map(str::to_owned))
            .unwrap_or_default();
        pipe::pipe_name(session_id, &package_sid)
    });

    let launcher = Launcher::new(
        default_handlers(config.progress_sample_interval_ms),
        elevator,
    )
    .with_device_watcher(Duration::from_millis(config.device_poll_interval_ms));

    launcher.set_state(files_launcher::launcher::ConnectionState::Connecting);
    let timeout = Duration::from_secs(config.connect_timeout_secs);
    let reason = match pipe::connect(&pipe_name, timeout).await {
        Ok(stream) => {
            tracing::info!(target: "main", pipe = %pipe_name, "Connected to the application");
            let (reader, writer) = tokio::io::split(stream);
            let (connection, writer_task) = Connection::spawn(writer);
            let reason = launcher.run(reader, connection).await;

            // Handlers hold connection clones; releasing them lets the writer finish
            drop(launcher);
            if tokio::time::timeout(FLUSH_TIMEOUT, writer_task).await.is_err() {
                tracing::warn!(target: "main", "Timed out flushing outbound messages");
            }
            reason
        }
        Err(e) => {
            tracing::error!(target: "main", pipe = %pipe_name, error = %e, "Failed to connect to the application");
            launcher.run(tokio::io::empty(), Connection::detached()).await
        }
    };

    tracing::info!(target: "main", reason = ?reason, "Launcher exited");
    Ok(())
}
