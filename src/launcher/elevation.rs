use crate::error::Result;

/// Reply codes of the `Elevate` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ElevationOutcome {
    /// The elevated instance was started; this one exits
    Relaunched = 0,
    Failed = 1,
    AlreadyElevated = -1,
}

impl ElevationOutcome {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Privilege checks and self-relaunch.
pub trait Elevator: Send + Sync {
    fn is_elevated(&self) -> bool;

    /// Starts a new instance of the current executable with administrator rights.
    fn relaunch_elevated(&self) -> Result<()>;

    fn elevate(&self) -> ElevationOutcome {
        if self.is_elevated() {
            return ElevationOutcome::AlreadyElevated;
        }
        match self.relaunch_elevated() {
            Ok(()) => ElevationOutcome::Relaunched,
            Err(e) => {
                tracing::warn!(target: "launcher", error = %e, "Elevated relaunch failed");
                ElevationOutcome::Failed
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemElevator;

#[cfg(windows)]
impl Elevator for SystemElevator {
    fn is_elevated(&self) -> bool {
        unsafe { windows::Win32::UI::Shell::IsUserAnAdmin() }.as_bool()
    }

    fn relaunch_elevated(&self) -> Result<()> {
        use crate::error::LauncherError;
        use windows::Win32::UI::Shell::{SEE_MASK_NOASYNC, SHELLEXECUTEINFOW, ShellExecuteExW};
        use windows::Win32::UI::WindowsAndMessaging::SW_SHOWNORMAL;
        use windows::core::{HSTRING, PCWSTR, w};

        let exe = std::env::current_exe()?;
        let file = HSTRING::from(exe.as_path());
        let mut info = SHELLEXECUTEINFOW {
            cbSize: std::mem::size_of::<SHELLEXECUTEINFOW>() as u32,
            fMask: SEE_MASK_NOASYNC,
            lpVerb: w!("runas"),
            lpFile: PCWSTR(file.as_ptr()),
            nShow: SW_SHOWNORMAL.0,
            ..Default::default()
        };
        // Fails with ERROR_CANCELLED when the user declines the consent prompt
        unsafe { ShellExecuteExW(&mut info) }.map_err(|e| LauncherError::Elevation(e.to_string()))
    }
}

#[cfg(not(windows))]
impl Elevator for SystemElevator {
    fn is_elevated(&self) -> bool {
        false
    }

    fn relaunch_elevated(&self) -> Result<()> {
        Err(crate::error::LauncherError::Unsupported("elevated relaunch"))
    }
}
