//! Device profiles.
//!
//! A [`DeviceProfile`] holds the per-device constants the motion controller
//! reads: the default address, the travel durations and the opcode table.
//! Two variants ship built in:
//!
//! | Profile   | Default address |
//! |-----------|-----------------|
//! | XYScreens | `AA EE EE`      |
//! | SeeMax    | `EE EE EE`      |
//!
//! Built-in profiles carry no travel durations. Screens and lifts vary in
//! speed, so durations always come from configuration.
//!
//! # Example
//!
//! ```rust,ignore
//! let profile = DeviceProfile::builder(ProfileKind::XyScreens)
//!     .down_duration(Duration::from_secs_f64(10.0))
//!     .build()?;
//! assert_eq!(profile.up_duration(), Some(Duration::from_secs(10)));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{ScreenError, ScreenResult};
use crate::frame::{Address, OpcodeTable};
use crate::motion::Direction;

/// Built-in protocol variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    /// XY Screens projector screens and lifts.
    #[default]
    #[serde(alias = "xy_screens", alias = "xy-screens")]
    XyScreens,
    /// SeeMax projector screens and lifts.
    SeeMax,
}

impl ProfileKind {
    /// Display name of the variant.
    pub fn name(&self) -> &'static str {
        match self {
            ProfileKind::XyScreens => "XY Screens",
            ProfileKind::SeeMax => "SeeMax",
        }
    }

    /// Factory default address of the variant.
    pub fn default_address(&self) -> Address {
        match self {
            ProfileKind::XyScreens => Address::new([0xAA, 0xEE, 0xEE]),
            ProfileKind::SeeMax => Address::new([0xEE, 0xEE, 0xEE]),
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable per-device constants shared by the motion controller.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProfile {
    kind: ProfileKind,
    name: String,
    default_address: Address,
    up_duration: Option<Duration>,
    down_duration: Option<Duration>,
    opcodes: OpcodeTable,
}

impl DeviceProfile {
    /// XY Screens defaults, without travel durations.
    pub fn xyscreens() -> Self {
        Self::from_kind(ProfileKind::XyScreens)
    }

    /// SeeMax defaults, without travel durations.
    pub fn seemax() -> Self {
        Self::from_kind(ProfileKind::SeeMax)
    }

    /// Defaults for a built-in variant.
    pub fn from_kind(kind: ProfileKind) -> Self {
        Self {
            kind,
            name: kind.name().to_string(),
            default_address: kind.default_address(),
            up_duration: None,
            down_duration: None,
            opcodes: OpcodeTable::default(),
        }
    }

    /// Start from a built-in variant and apply overrides.
    pub fn builder(kind: ProfileKind) -> DeviceProfileBuilder {
        DeviceProfileBuilder {
            profile: Self::from_kind(kind),
            up_duration: None,
            down_duration: None,
        }
    }

    /// The variant this profile was derived from.
    pub fn kind(&self) -> ProfileKind {
        self.kind
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address used when none is configured explicitly.
    pub fn default_address(&self) -> Address {
        self.default_address
    }

    /// Time to travel from fully down to fully up.
    pub fn up_duration(&self) -> Option<Duration> {
        self.up_duration
    }

    /// Time to travel from fully up to fully down.
    pub fn down_duration(&self) -> Option<Duration> {
        self.down_duration
    }

    /// Travel duration for a direction.
    pub fn travel_duration(&self, direction: Direction) -> Option<Duration> {
        match direction {
            Direction::Up => self.up_duration,
            Direction::Down => self.down_duration,
        }
    }

    /// Opcode table used to encode frames for this device.
    pub fn opcodes(&self) -> &OpcodeTable {
        &self.opcodes
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::xyscreens()
    }
}

/// Builder applying explicit overrides on top of a built-in profile.
#[derive(Debug, Clone)]
pub struct DeviceProfileBuilder {
    profile: DeviceProfile,
    up_duration: Option<Duration>,
    down_duration: Option<Duration>,
}

impl DeviceProfileBuilder {
    /// Override the display name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.profile.name = name.into();
        self
    }

    /// Override the default address.
    pub fn default_address(mut self, address: Address) -> Self {
        self.profile.default_address = address;
        self
    }

    /// Set the up travel duration.
    pub fn up_duration(mut self, duration: Duration) -> Self {
        self.up_duration = Some(duration);
        self
    }

    /// Set the down travel duration. Also used for up when no up duration is set.
    pub fn down_duration(mut self, duration: Duration) -> Self {
        self.down_duration = Some(duration);
        self
    }

    /// Replace the opcode table.
    pub fn opcodes(mut self, opcodes: OpcodeTable) -> Self {
        self.profile.opcodes = opcodes;
        self
    }

    /// Validate the durations and produce the profile.
    pub fn build(self) -> ScreenResult<DeviceProfile> {
        let mut profile = self.profile;
        if let Some(down) = self.down_duration {
            validate_duration("down", down)?;
        }
        if let Some(up) = self.up_duration {
            validate_duration("up", up)?;
        }
        profile.down_duration = self.down_duration;
        profile.up_duration = self.up_duration.or(self.down_duration);
        Ok(profile)
    }
}

/// Reject zero travel durations.
pub(crate) fn validate_duration(label: &str, duration: Duration) -> ScreenResult<()> {
    if duration.is_zero() {
        return Err(ScreenError::Configuration(format!(
            "{} travel duration must be greater than zero",
            label
        )));
    }
    Ok(())
}

/// Convert seconds from configuration into a travel duration.
///
/// Rejects zero, negative, NaN and infinite values.
pub fn duration_from_secs(label: &str, secs: f64) -> ScreenResult<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ScreenError::Configuration(format!(
            "{} travel duration must be a positive number of seconds, got {}",
            label, secs
        )));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| {
        ScreenError::Configuration(format!("{} travel duration {}: {}", label, secs, e))
    })
}
