//! # argonone-fand
//!
//! A Linux daemon driving the fan and the power button of the Argon ONE
//! Raspberry Pi case.
//!
//! ## Features
//!
//! - **Fan Control**: constant power or a temperature threshold table,
//!   evaluated on the maximum of a sliding window of samples
//! - **Power Button**: a short press restarts the host, a long press shuts
//!   it down
//! - **Power Cut**: arms the case to cut power once the host has halted
//! - **D-Bus Interface**: host lifecycle notifications and status
//! - **Hot Reload**: settings are read again on SIGHUP or file changes
//!
//! ## Architecture
//!
//! The fan is driven by a [`ControlLoop`](control_loop::ControlLoop) on its
//! own blocking thread. Host notifications reach the
//! [`Lifecycle`](lifecycle::Lifecycle) through the [`EventBus`](event::EventBus)
//! and the [`SystemCoordinator`](coordinator::SystemCoordinator), which also
//! runs the service providers.
//!
//! ## Example
//!
//! ```no_run
//! use argonone_fand::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load(None)?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```

pub mod app_context;
pub mod application;
pub mod cli;
pub mod config;
pub mod control_loop;
pub mod coordinator;
pub mod drivers;
pub mod edge;
pub mod error;
pub mod event;
pub mod fan_curve;
pub mod host;
pub mod interface;
pub mod lifecycle;
pub mod power_cut;
pub mod providers;
pub mod sensors;
pub mod settings;
pub mod task_manager;
pub mod temperature_sensors;
