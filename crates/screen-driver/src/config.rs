//! Screen configuration.
//!
//! A screen is described by a small TOML document:
//!
//! ```toml
//! port = "/dev/ttyUSB0"
//! profile = "xyscreens"        # or "seemax"
//! address = "AAEEEE"           # optional, defaults to the profile's address
//! down_duration_secs = 10.0    # optional
//! up_duration_secs = 9.5       # optional, defaults to the down duration
//! initial_position = 0.0       # optional, 0.0 = up, 1.0 = down
//! tick_interval_ms = 100       # optional
//! timeout_ms = 1000            # optional serial timeout
//!
//! [opcodes]                    # optional, only list what differs
//! program = 0xAA
//! ```
//!
//! [`ScreenConfig::validate`] checks everything that can be checked without
//! hardware. [`ScreenConfig::resolve`] turns the file into the immutable
//! [`DeviceProfile`] and [`Address`] the drivers are built from.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use screen_core::{
    duration_from_secs, Address, DeviceProfile, OpcodeTable, ProfileKind, ScreenError,
    ScreenResult,
};

/// Default progress tick interval.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Smallest tick interval the drivers use; shorter intervals are raised to it.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for one screen or lift.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScreenConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0")
    #[serde(default)]
    pub port: Option<String>,
    /// Protocol variant supplying the defaults
    #[serde(default)]
    pub profile: ProfileKind,
    /// Device address as 6 hex characters
    #[serde(default)]
    pub address: Option<String>,
    /// Time to travel from fully up to fully down
    #[serde(default)]
    pub down_duration_secs: Option<f64>,
    /// Time to travel from fully down to fully up
    #[serde(default)]
    pub up_duration_secs: Option<f64>,
    /// Position estimate at startup
    #[serde(default)]
    pub initial_position: Option<f64>,
    /// Progress tick interval in milliseconds (default: 100)
    #[serde(default)]
    pub tick_interval_ms: Option<u64>,
    /// Optional port timeout in milliseconds (default: 1000)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Per-command opcode overrides
    #[serde(default)]
    pub opcodes: OpcodeTable,
}

/// Profile and address produced by [`ScreenConfig::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedScreen {
    /// Immutable device constants
    pub profile: DeviceProfile,
    /// Address frames are sent to
    pub address: Address,
    /// Position estimate at startup
    pub initial_position: f64,
    /// Progress tick interval
    pub tick_interval: Duration,
}

impl ScreenConfig {
    /// Configuration for a built-in profile with everything else defaulted.
    pub fn for_profile(profile: ProfileKind) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> ScreenResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| ScreenError::Configuration(format!("Invalid screen config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ScreenResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ScreenError::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), profile = %config.profile, "Loaded screen config");
        Ok(config)
    }

    /// Serial write timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(crate::serial::DEFAULT_TIMEOUT)
    }

    /// Progress tick interval.
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TICK_INTERVAL)
    }

    /// Check every value that can be checked without hardware.
    pub fn validate(&self) -> ScreenResult<()> {
        self.resolve().map(|_| ())
    }

    /// Build the device profile and address this configuration describes.
    pub fn resolve(&self) -> ScreenResult<ResolvedScreen> {
        let mut builder = DeviceProfile::builder(self.profile).opcodes(self.opcodes);
        if let Some(secs) = self.down_duration_secs {
            builder = builder.down_duration(duration_from_secs("down", secs)?);
        }
        if let Some(secs) = self.up_duration_secs {
            builder = builder.up_duration(duration_from_secs("up", secs)?);
        }
        let profile = builder.build()?;

        let address = match &self.address {
            Some(text) => text.parse::<Address>()?,
            None => profile.default_address(),
        };

        let initial_position = self.initial_position.unwrap_or(0.0);
        if !(0.0..=1.0).contains(&initial_position) {
            return Err(ScreenError::Configuration(format!(
                "initial_position must be within [0.0, 1.0], got {}",
                initial_position
            )));
        }

        if self.tick_interval_ms == Some(0) {
            return Err(ScreenError::Configuration(
                "tick_interval_ms must be greater than zero".into(),
            ));
        }
        if self.timeout_ms == Some(0) {
            return Err(ScreenError::Configuration(
                "timeout_ms must be greater than zero".into(),
            ));
        }

        Ok(ResolvedScreen {
            profile,
            address,
            initial_position,
            tick_interval: self.tick_interval(),
        })
    }
}
