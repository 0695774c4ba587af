//! One-shot actions requested by the app through local settings before the launcher
//! is started. Each of them runs instead of the message loop.

use anyhow::{Context, Result};

use crate::config::LocalSettings;

const ARGUMENTS_KEY: &str = "Arguments";
const PID_KEY: &str = "pid";
const SHELL_COMMAND_KEY: &str = "ShellCommand";

/// Protocol the app is registered for.
pub const APP_PROTOCOL_URI: &str = "files-uwp:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupAction {
    /// Brings the app up through its protocol
    StartUwp,
    TerminateUwp { pid: Option<u32> },
    /// Terminates the app, then hands `command` to the shell
    ShellCommand { pid: Option<u32>, command: String },
}

/// Process operations used by the startup actions.
pub trait ProcessControl {
    fn open_uri(&self, uri: &str) -> Result<()>;
    fn terminate(&self, pid: u32) -> Result<()>;
    fn run_shell_command(&self, command: &str) -> Result<()>;
}

/// Reads and consumes the pending startup action.
///
/// The `Arguments` key is removed and the settings saved, so an action runs once.
/// Unknown arguments are dropped as well.
pub fn take_startup_action(settings: &mut LocalSettings) -> Result<Option<StartupAction>> {
    let Some(arguments) = settings.get_str(ARGUMENTS_KEY).map(str::to_owned) else {
        return Ok(None);
    };
    settings.remove(ARGUMENTS_KEY);
    settings.save().context("Failed to clear startup arguments")?;

    let pid = settings.get_i64(PID_KEY).and_then(|p| u32::try_from(p).ok());
    let action = match arguments.as_str() {
        "StartUwp" => Some(StartupAction::StartUwp),
        "TerminateUwp" => Some(StartupAction::TerminateUwp { pid }),
        "ShellCommand" => Some(StartupAction::ShellCommand {
            pid,
            command: settings.get_str(SHELL_COMMAND_KEY).unwrap_or_default().to_string(),
        }),
        other => {
            tracing::warn!(target: "main", arguments = other, "Ignoring unknown startup arguments");
            None
        }
    };
    Ok(action)
}

pub fn run_startup_action(action: &StartupAction, control: &dyn ProcessControl) -> Result<()> {
    tracing::info!(target: "main", action = ?action, "Running startup action");
    match action {
        StartupAction::StartUwp => control.open_uri(APP_PROTOCOL_URI),
        StartupAction::TerminateUwp { pid } => {
            if let Some(pid) = pid {
                control.terminate(*pid)?;
            }
            Ok(())
        }
        StartupAction::ShellCommand { pid, command } => {
            if let Some(pid) = pid {
                // The app may already be gone
                if let Err(e) = control.terminate(*pid) {
                    tracing::debug!(target: "main", pid, error = %e, "Terminate before shell command failed");
                }
            }
            if command.is_empty() {
                return Ok(());
            }
            control.run_shell_command(command)
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessControl;

impl ProcessControl for SystemProcessControl {
    fn open_uri(&self, uri: &str) -> Result<()> {
        open::that_detached(uri).with_context(|| format!("Failed to open {uri}"))
    }

    #[cfg(windows)]
    fn terminate(&self, pid: u32) -> Result<()> {
        use windows::Win32::Foundation::{BOOL, CloseHandle};
        use windows::Win32::System::Threading::{OpenProcess, PROCESS_TERMINATE, TerminateProcess};

        unsafe {
            let handle = OpenProcess(PROCESS_TERMINATE, BOOL::from(false), pid)
                .with_context(|| format!("Failed to open process {pid}"))?;
            let result = TerminateProcess(handle, 1);
            let _ = CloseHandle(handle);
            result.with_context(|| format!("Failed to terminate process {pid}"))
        }
    }

    #[cfg(not(windows))]
    fn terminate(&self, pid: u32) -> Result<()> {
        let status = std::process::Command::new("kill")
            .arg(pid.to_string())
            .status()
            .context("Failed to run kill")?;
        anyhow::ensure!(status.success(), "kill {pid} exited with {status}");
        Ok(())
    }

    fn run_shell_command(&self, command: &str) -> Result<()> {
        #[cfg(windows)]
        {
            std::process::Command::new("explorer.exe")
                .arg(command)
                .spawn()
                .context("Failed to start explorer.exe")?;
            Ok(())
        }
        #[cfg(not(windows))]
        {
            open::that_detached(command).with_context(|| format!("Failed to open {command}"))
        }
    }
}
