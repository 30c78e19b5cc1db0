//! Command frame encoding.
//!
//! Protocol: RS-485, 2400 baud, 8N1. Every command is a fixed 5-byte frame,
//! and the screen never answers.
//!
//! ```text
//! +------+------+------+------+--------+
//! | 0xFF |  A0  |  A1  |  A2  | OPCODE |
//! +------+------+------+------+--------+
//! ```
//!
//! `A0..A2` is the 3-byte device address. The opcode table is configurable
//! because the program-address opcode in particular differs between
//! hardware revisions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ScreenError, ScreenResult};

/// First byte of every frame.
pub const FRAME_PREFIX: u8 = 0xFF;

/// Length of an encoded frame in bytes.
pub const FRAME_LEN: usize = 5;

/// Length of a device address in bytes.
pub const ADDRESS_LEN: usize = 3;

// =============================================================================
// Address
// =============================================================================

/// 3-byte device address on the RS-485 bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    /// Create an address from its three bytes.
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw address bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = ScreenError;

    fn try_from(bytes: &[u8]) -> ScreenResult<Self> {
        let bytes: [u8; ADDRESS_LEN] = bytes.try_into().map_err(|_| {
            ScreenError::InvalidAddress(format!(
                "expected {} bytes, got {}",
                ADDRESS_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl FromStr for Address {
    type Err = ScreenError;

    /// Parse 6 hex characters, e.g. `"AAEEEE"`. Case-insensitive.
    fn from_str(s: &str) -> ScreenResult<Self> {
        let s = s.trim();
        if s.len() != ADDRESS_LEN * 2 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ScreenError::InvalidAddress(format!(
                "expected {} hex characters, got {:?}",
                ADDRESS_LEN * 2,
                s
            )));
        }

        let mut bytes = [0u8; ADDRESS_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = &s[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16).map_err(|_| {
                ScreenError::InvalidAddress(format!("{:?} is not a hex byte", pair))
            })?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}{:02X}", self.0[0], self.0[1], self.0[2])
    }
}

// =============================================================================
// Commands and opcodes
// =============================================================================

/// Commands understood by the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Start moving up (retract).
    Up,
    /// Start moving down (extend).
    Down,
    /// Stop moving.
    Stop,
    /// Program the address sent in the frame into a screen in learning mode.
    ProgramAddress,
    /// Move up a single step.
    MicroUp,
    /// Move down a single step.
    MicroDown,
}

impl Command {
    /// Every command, in table order.
    pub const ALL: [Command; 6] = [
        Command::Up,
        Command::Down,
        Command::Stop,
        Command::ProgramAddress,
        Command::MicroUp,
        Command::MicroDown,
    ];
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Command::Up => "up",
            Command::Down => "down",
            Command::Stop => "stop",
            Command::ProgramAddress => "program",
            Command::MicroUp => "micro up",
            Command::MicroDown => "micro down",
        };
        f.write_str(label)
    }
}

/// Opcode byte for each command.
///
/// Deserializes with per-field defaults, so a config file only needs to list
/// the opcodes it overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpcodeTable {
    /// Opcode for [`Command::Up`].
    pub up: u8,
    /// Opcode for [`Command::Down`].
    pub down: u8,
    /// Opcode for [`Command::Stop`].
    pub stop: u8,
    /// Opcode for [`Command::ProgramAddress`].
    pub program: u8,
    /// Opcode for [`Command::MicroUp`].
    pub micro_up: u8,
    /// Opcode for [`Command::MicroDown`].
    pub micro_down: u8,
}

impl OpcodeTable {
    /// Canonical opcodes shared by XY Screens and SeeMax hardware.
    pub const DEFAULT: OpcodeTable = OpcodeTable {
        up: 0xDD,
        down: 0xEE,
        stop: 0xCC,
        program: 0xAA,
        micro_up: 0xC9,
        micro_down: 0xE9,
    };

    /// Opcode byte for a command.
    pub fn opcode(&self, command: Command) -> u8 {
        match command {
            Command::Up => self.up,
            Command::Down => self.down,
            Command::Stop => self.stop,
            Command::ProgramAddress => self.program,
            Command::MicroUp => self.micro_up,
            Command::MicroDown => self.micro_down,
        }
    }
}

impl Default for OpcodeTable {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// =============================================================================
// Frame
// =============================================================================

/// An encoded 5-byte command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    /// Build the frame for a validated address.
    pub fn new(address: Address, command: Command, opcodes: &OpcodeTable) -> Self {
        let [a0, a1, a2] = address.0;
        Self([FRAME_PREFIX, a0, a1, a2, opcodes.opcode(command)])
    }

    /// The frame bytes, ready to be written to the port.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The opcode byte.
    pub fn opcode(&self) -> u8 {
        self.0[FRAME_LEN - 1]
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// Encode a command for a raw address.
///
/// Fails with [`ScreenError::InvalidAddress`] unless `address` is exactly
/// 3 bytes long.
pub fn encode(address: &[u8], command: Command, opcodes: &OpcodeTable) -> ScreenResult<Frame> {
    let address = Address::try_from(address)?;
    Ok(Frame::new(address, command, opcodes))
}
