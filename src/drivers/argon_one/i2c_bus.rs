use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    os::fd::AsRawFd,
};

use libc::c_ulong;
use log::debug;

use crate::{
    drivers::FanBus,
    error::{FanError, Result},
};

/// `ioctl` request selecting the slave address for following transfers.
const I2C_SLAVE: c_ulong = 0x0703;

/// Fan microcontroller reached through a Linux `i2c-dev` node.
#[derive(Debug)]
pub struct I2cFanBus {
    file: Option<File>,
    device: String,
}

impl I2cFanBus {
    /// Opens `/dev/i2c-{bus}` and binds it to `address`.
    pub fn open(bus: u8, address: u16) -> Result<Self> {
        let device = format!("/dev/i2c-{bus}");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&device)
            .map_err(|e| FanError::acquisition(&device, e))?;

        // SAFETY: the descriptor stays valid for the lifetime of `file` and
        // I2C_SLAVE takes the address by value.
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), I2C_SLAVE as _, c_ulong::from(address)) };
        if rc < 0 {
            return Err(FanError::acquisition(
                format!("{device} address 0x{address:02x}"),
                io::Error::last_os_error(),
            ));
        }

        debug!("opened {device} for fan controller at 0x{address:02x}");
        Ok(Self {
            file: Some(file),
            device,
        })
    }
}

impl FanBus for I2cFanBus {
    fn write_byte(&mut self, value: u8) -> Result<()> {
        let file = self.file.as_mut().ok_or_else(|| {
            FanError::bus(
                &self.device,
                io::Error::new(io::ErrorKind::NotConnected, "bus already closed"),
            )
        })?;
        file.write_all(&[value])
            .map_err(|e| FanError::bus(&self.device, e))
    }

    fn close(&mut self) -> Result<()> {
        if self.file.take().is_some() {
            debug!("closed {}", self.device);
        }
        Ok(())
    }
}
