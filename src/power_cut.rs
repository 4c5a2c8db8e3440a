//! Arming the case's power cut after the OS has halted.
//!
//! Writing `0xFF` to the fan controller makes the case cut power once the
//! board goes quiet. It is either written directly during the stop sequence
//! or left to a systemd unit that runs late in the shutdown.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info};

use crate::{
    error::Result,
    host::CommandRunner,
};

pub const SYSTEMCTL: &str = "/usr/bin/systemctl";

/// Environment variable the shutdown unit reads its command line from.
pub const SHUTDOWN_COMMAND_VARIABLE: &str = "argonone_shutdown_command";

/// How the power cut gets armed on shutdown.
#[derive(Clone)]
pub enum PowerCut {
    /// Write `0xFF` from the stop sequence.
    Direct,
    /// Let a runtime-enabled systemd unit write `0xFF` after the daemon exits.
    Service(ShutdownService),
}

impl PowerCut {
    pub fn is_direct(&self) -> bool {
        matches!(self, PowerCut::Direct)
    }
}

impl std::fmt::Debug for PowerCut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerCut::Direct => write!(f, "Direct"),
            PowerCut::Service(service) => write!(f, "Service({})", service.unit_path.display()),
        }
    }
}

/// Runtime-enabled systemd unit arming the power cut.
#[derive(Clone)]
pub struct ShutdownService {
    unit_path: PathBuf,
    shutdown_command: String,
    runner: Arc<dyn CommandRunner>,
}

impl ShutdownService {
    pub fn new(
        unit_path: impl Into<PathBuf>,
        i2cset: &Path,
        bus: u8,
        address: u16,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            unit_path: unit_path.into(),
            shutdown_command: format!(
                "\"{}\" -y {bus} 0x{address:02x} 0xff",
                i2cset.display()
            ),
            runner,
        }
    }

    pub fn shutdown_command(&self) -> &str {
        &self.shutdown_command
    }

    /// Unit name as known to systemd once enabled.
    pub fn unit_name(&self) -> String {
        self.unit_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.unit_path.display().to_string())
    }

    /// Publishes the shutdown command and enables the unit until reboot.
    pub fn enable(&self) -> Result<()> {
        self.systemctl(&[
            "set-environment".into(),
            format!("{SHUTDOWN_COMMAND_VARIABLE}={}", self.shutdown_command),
            "--runtime".into(),
        ])?;
        self.systemctl(&[
            "enable".into(),
            self.unit_path.display().to_string(),
            "--runtime".into(),
        ])?;
        info!("enabled shutdown service {}", self.unit_path.display());
        Ok(())
    }

    pub fn disable(&self) -> Result<()> {
        self.systemctl(&["disable".into(), self.unit_name(), "--runtime".into()])?;
        debug!("disabled shutdown service {}", self.unit_name());
        Ok(())
    }

    fn systemctl(&self, args: &[String]) -> Result<()> {
        self.runner.run(SYSTEMCTL, args)
    }
}
