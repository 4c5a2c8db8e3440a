//! Power button on a sysfs GPIO pin.
//!
//! The pin is exported as an input with edge detection on both edges. A
//! dedicated thread waits for `POLLPRI` on the value file and reports every
//! edge; the level is read back separately through [`SysfsLevel`].

use std::{
    fs::{self, File},
    io::{self, Read, Seek, SeekFrom},
    os::fd::AsRawFd,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use log::{debug, warn};

use crate::{
    drivers::{ButtonLine, Level, LevelReader},
    error::{FanError, Result},
};

pub const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";

/// Board pin 7 on the Raspberry Pi header.
pub const DEFAULT_BUTTON_PIN: u32 = 4;

const POLL_TIMEOUT_MS: libc::c_int = 100;

/// Claimed sysfs GPIO input.
#[derive(Debug)]
pub struct SysfsButton {
    root: PathBuf,
    pin: u32,
    stop: Arc<AtomicBool>,
    watcher: Option<JoinHandle<()>>,
}

impl SysfsButton {
    /// Exports `pin` under `root` and configures it as an input firing on
    /// both edges.
    ///
    /// A partially configured pin is unexported again before the error is
    /// returned.
    pub fn claim(root: impl Into<PathBuf>, pin: u32) -> Result<Self> {
        let button = Self {
            root: root.into(),
            pin,
            stop: Arc::new(AtomicBool::new(false)),
            watcher: None,
        };

        if let Err(e) = button.configure() {
            if let Err(release_err) = button.unexport() {
                debug!("unexport of gpio{pin} after failed claim: {release_err}");
            }
            return Err(FanError::acquisition(format!("gpio{pin}"), e));
        }

        debug!("claimed gpio{pin} as button input");
        Ok(button)
    }

    fn configure(&self) -> io::Result<()> {
        if !self.pin_dir().exists() {
            fs::write(self.root.join("export"), self.pin.to_string())?;
        }
        fs::write(self.pin_dir().join("direction"), "in")?;
        fs::write(self.pin_dir().join("edge"), "both")?;
        Ok(())
    }

    fn unexport(&self) -> io::Result<()> {
        fs::write(self.root.join("unexport"), self.pin.to_string())
    }

    fn pin_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin))
    }

    fn value_path(&self) -> PathBuf {
        self.pin_dir().join("value")
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn level_reader(&self) -> SysfsLevel {
        SysfsLevel::new(self.value_path())
    }

    /// Starts the edge watcher thread. `on_edge` receives the pin number.
    pub fn watch_edges<F>(&mut self, mut on_edge: F) -> Result<()>
    where
        F: FnMut(u32) + Send + 'static,
    {
        let mut value = File::open(self.value_path())
            .map_err(|e| FanError::acquisition(format!("gpio{} value", self.pin), e))?;
        // a pending edge from before the claim must not fire
        rearm(&mut value).map_err(|e| FanError::acquisition(format!("gpio{} value", self.pin), e))?;

        let stop = Arc::clone(&self.stop);
        let pin = self.pin;
        let handle = thread::Builder::new()
            .name("gpio-edge".into())
            .spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    match wait_for_edge(&value) {
                        Ok(true) => {
                            if let Err(e) = rearm(&mut value) {
                                warn!("failed to re-arm gpio{pin}: {e}");
                            }
                            if !stop.load(Ordering::Acquire) {
                                on_edge(pin);
                            }
                        }
                        Ok(false) => {}
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            warn!("edge detection on gpio{pin} stopped: {e}");
                            break;
                        }
                    }
                }
                debug!("edge watcher for gpio{pin} exited");
            })
            .map_err(|e| FanError::acquisition(format!("gpio{} edge watcher", self.pin), e))?;

        self.watcher = Some(handle);
        Ok(())
    }

    fn join_watcher(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.watcher.take() {
            if handle.join().is_err() {
                warn!("edge watcher for gpio{} panicked", self.pin);
            }
        }
    }
}

impl ButtonLine for SysfsButton {
    fn disable_edge_detection(&mut self) -> Result<()> {
        self.join_watcher();
        fs::write(self.pin_dir().join("edge"), "none")
            .map_err(|e| FanError::bus(format!("gpio{}", self.pin), e))
    }

    fn release(&mut self) -> Result<()> {
        self.join_watcher();
        self.unexport()
            .map_err(|e| FanError::bus(format!("gpio{}", self.pin), e))?;
        debug!("released gpio{}", self.pin);
        Ok(())
    }
}

impl Drop for SysfsButton {
    fn drop(&mut self) {
        self.join_watcher();
    }
}

/// Waits up to [`POLL_TIMEOUT_MS`] for an edge on the value file.
fn wait_for_edge(value: &File) -> io::Result<bool> {
    let mut fds = libc::pollfd {
        fd: value.as_raw_fd(),
        events: libc::POLLPRI | libc::POLLERR,
        revents: 0,
    };
    // SAFETY: `fds` is a single valid pollfd living on the stack for the call.
    let rc = unsafe { libc::poll(&mut fds, 1, POLL_TIMEOUT_MS) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc > 0 && fds.revents & libc::POLLPRI != 0)
}

/// sysfs only signals again after the value has been read from offset 0.
fn rearm(value: &mut File) -> io::Result<()> {
    let mut buf = [0u8; 8];
    value.seek(SeekFrom::Start(0))?;
    let _ = value.read(&mut buf)?;
    Ok(())
}

/// Reads the current level from a sysfs `value` file.
#[derive(Debug, Clone)]
pub struct SysfsLevel {
    value_path: PathBuf,
}

impl SysfsLevel {
    pub fn new(value_path: impl Into<PathBuf>) -> Self {
        Self {
            value_path: value_path.into(),
        }
    }
}

impl LevelReader for SysfsLevel {
    fn read_level(&self) -> Result<Level> {
        let device = self.value_path.display().to_string();
        let raw = fs::read_to_string(&self.value_path).map_err(|e| FanError::bus(&device, e))?;
        match raw.trim() {
            "1" => Ok(Level::High),
            "0" => Ok(Level::Low),
            other => Err(FanError::bus(
                device,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected pin value '{other}'"),
                ),
            )),
        }
    }
}
