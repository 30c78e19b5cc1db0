//! Error types for screen control.
//!
//! `ScreenError` is the single error type used by the encoder, the motion
//! controller and both driver facades. It is built with `thiserror`, and I/O
//! failures from the serial layer convert into it through `#[from]`, so the
//! `?` operator works across the whole stack.
//!
//! ## Error Categories
//!
//! - **`Transport`**: the serial port could not be opened, written, flushed or
//!   closed. Never retried by the core. An in-progress move is aborted and the
//!   position estimate keeps its last interpolated value.
//! - **`InvalidAddress`**: an address had the wrong length or was not valid
//!   hex. Raised before anything is written.
//! - **`InvalidState`**: the controller is busy (moving, stopping, or a write
//!   is in flight). Raised before anything is written, with no side effect.
//! - **`Configuration`**: a travel duration, position or config value is
//!   missing or out of range.

use thiserror::Error;

use crate::motion::MotionState;

/// Convenience alias for results using [`ScreenError`].
pub type ScreenResult<T> = std::result::Result<T, ScreenError>;

/// Primary error type for screen control.
#[derive(Error, Debug)]
pub enum ScreenError {
    /// Serial transport failure.
    ///
    /// **Error Type**: Not recoverable locally.
    ///
    /// **Recovery Strategy**: Surface to the caller. Any retry policy belongs
    /// to the caller or to the transport layer.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Address was not exactly 3 bytes, or not 6 hex characters.
    ///
    /// **Error Type**: Permanent - fix the address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Operation requested while the controller was busy.
    ///
    /// **Error Type**: Transient - retry after the move finished or was stopped.
    #[error("Cannot {operation} while {}", busy_description(.state, .write_pending))]
    InvalidState {
        /// The rejected operation (e.g. "move up").
        operation: &'static str,
        /// The controller state at the time of the request.
        state: MotionState,
        /// Another command write had not completed yet.
        write_pending: bool,
    },

    /// Missing or invalid configuration value.
    ///
    /// **Error Type**: Permanent - fix the configuration.
    ///
    /// # Example
    ///
    /// A directional move without a travel duration:
    ///
    /// ```rust,ignore
    /// screen.move_down(None).await?; // no down duration configured
    /// // => Configuration("no travel duration configured for moving down")
    /// ```
    #[error("Configuration error: {0}")]
    Configuration(String),
}

fn busy_description(state: &MotionState, write_pending: &bool) -> String {
    if *write_pending {
        format!("{} with a command write in flight", state)
    } else {
        state.to_string()
    }
}

impl ScreenError {
    /// Short machine-readable label for the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            ScreenError::Transport(_) => "transport",
            ScreenError::InvalidAddress(_) => "invalid_address",
            ScreenError::InvalidState { .. } => "invalid_state",
            ScreenError::Configuration(_) => "configuration",
        }
    }

    /// Whether the same request may succeed later without a configuration change.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScreenError::InvalidState { .. } | ScreenError::Transport(_)
        )
    }
}
