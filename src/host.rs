//! Seams to the host: inbound notifications and outbound host actions.

use std::process::Command;

use log::{debug, info};

use crate::error::{FanError, Result};

/// Notification method sent when the host quits.
pub const ON_QUIT: &str = "System.OnQuit";
/// Notification method sent when the host restarts.
pub const ON_RESTART: &str = "System.OnRestart";

/// Receiver of host lifecycle notifications.
///
/// Adapters (D-Bus, signals, config watcher) translate their inputs into
/// these calls. Implementations may block.
#[cfg_attr(test, mockall::automock)]
pub trait HostEventHandler: Send + Sync {
    fn on_notification(&self, sender: &str, method: &str, data: &str);

    fn on_settings_changed(&self);
}

/// Terminal host actions triggered by the power button.
#[cfg_attr(test, mockall::automock)]
pub trait HostActions: Send + Sync {
    fn restart(&self) -> Result<()>;

    fn shutdown(&self) -> Result<()>;
}

/// Runs an external program to completion.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> Result<()>;
}

/// [`CommandRunner`] backed by [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<()> {
        let command_line = render(program, args);
        debug!("running `{command_line}`");

        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|e| FanError::ExternalProcess {
                command: command_line.clone(),
                reason: e.to_string(),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(FanError::ExternalProcess {
                command: command_line,
                reason: format!("exited with {status}"),
            })
        }
    }
}

fn render(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Host actions implemented as configurable command lines.
pub struct CommandHostActions<R = SystemCommandRunner> {
    restart: Vec<String>,
    shutdown: Vec<String>,
    runner: R,
}

impl CommandHostActions<SystemCommandRunner> {
    pub fn new(restart: Vec<String>, shutdown: Vec<String>) -> Self {
        Self::with_runner(restart, shutdown, SystemCommandRunner)
    }
}

impl<R: CommandRunner> CommandHostActions<R> {
    pub fn with_runner(restart: Vec<String>, shutdown: Vec<String>, runner: R) -> Self {
        Self {
            restart,
            shutdown,
            runner,
        }
    }

    fn run(&self, command: &[String]) -> Result<()> {
        match command.split_first() {
            Some((program, args)) => self.runner.run(program, args),
            None => Err(FanError::ExternalProcess {
                command: String::new(),
                reason: "no command configured".into(),
            }),
        }
    }
}

impl<R: CommandRunner> HostActions for CommandHostActions<R> {
    fn restart(&self) -> Result<()> {
        info!("restarting host");
        self.run(&self.restart)
    }

    fn shutdown(&self) -> Result<()> {
        info!("shutting down host");
        self.run(&self.shutdown)
    }
}
