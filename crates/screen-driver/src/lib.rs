//! Drivers for RS-485 projector screens and lifts.
//!
//! This crate provides:
//! - [`BlockingScreenDriver`]: blocking operations with cancellable waits
//! - [`ScreenDriver`]: tokio driver with a progress ticker task
//! - [`ScreenConfig`]: TOML configuration for one screen
//! - Serial transports at 2400 baud 8N1, including a shared-port registry
//!   for several screens on one bus
//!
//! # Usage
//!
//! ```rust,ignore
//! use screen_driver::{ScreenConfig, ScreenDriver};
//!
//! let config = ScreenConfig::from_toml_str(r#"
//!     port = "/dev/ttyUSB0"
//!     profile = "xyscreens"
//!     down_duration_secs = 10.0
//! "#)?;
//! let screen = ScreenDriver::open(&config).await?;
//! screen.move_down_and_wait(None).await?;
//! ```

pub mod blocking;
pub mod config;
mod driver;
pub mod serial;
pub mod shared_ports;

pub use blocking::BlockingScreenDriver;
pub use config::{ResolvedScreen, ScreenConfig};
pub use driver::ScreenDriver;
pub use serial::{IoTransport, SerialTransport};
pub use shared_ports::{get_or_open_port, AsyncIoTransport, BusTransport, SharedPort};

pub use screen_core::{
    Address, Direction, MotionState, Progress, ProfileKind, ScreenError, ScreenResult,
    ScreenStatus,
};
