//! Hardware adapters for the Argon ONE case.
//!
//! The controller core only talks to the traits defined here; the Linux
//! implementations live in the submodules.

pub mod argon_one;
pub mod sysfs_gpio;

use std::fmt;

use crate::error::Result;

use argon_one::protocol::Command;

/// Digital signal level of an input pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    High,
    Low,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::High => write!(f, "high"),
            Level::Low => write!(f, "low"),
        }
    }
}

/// Byte-oriented connection to the fan microcontroller.
///
/// Every call is synchronous and errors are returned as-is; callers decide
/// whether a failure is fatal.
pub trait FanBus: Send + fmt::Debug {
    /// Sends a single raw byte.
    fn write_byte(&mut self, value: u8) -> Result<()>;

    /// Closes the connection. Later writes fail.
    fn close(&mut self) -> Result<()>;

    /// Sets the fan power in percent.
    fn write_power(&mut self, percent: u8) -> Result<()> {
        self.send(Command::SetPower(percent))
    }

    fn send(&mut self, command: Command) -> Result<()> {
        self.write_byte(command.to_byte())
    }
}

/// Synchronous read of the button pin level.
pub trait LevelReader: Send {
    fn read_level(&self) -> Result<Level>;
}

/// Claimed button pin with edge notifications.
pub trait ButtonLine: Send + fmt::Debug {
    /// Stops delivering edge notifications.
    fn disable_edge_detection(&mut self) -> Result<()>;

    /// Gives the pin back to the system.
    fn release(&mut self) -> Result<()>;
}
