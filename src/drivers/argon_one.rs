//! Argon ONE fan microcontroller on the I²C bus.

pub mod i2c_bus;
pub mod protocol;

pub use i2c_bus::I2cFanBus;
