//! `screen-core`
//!
//! Protocol and motion model for RS-485 motorized projector screens and
//! projector lifts (XY Screens, SeeMax and compatible hardware).
//!
//! The devices are write-only: the host sends 5-byte command frames and the
//! screen never answers. Everything the host knows about the screen is
//! therefore an estimate, derived from the commands it sent and the time
//! that has passed since.
//!
//! ## Modules
//!
//! - [`frame`]: address, command and opcode types plus the frame encoder
//! - [`profile`]: built-in device profiles and the profile builder
//! - [`motion`]: the motion state machine and open-loop position estimator
//! - [`progress`]: progress listener registry used by the drivers
//! - [`transport`]: blocking and async frame sinks, plus an in-memory mock
//! - [`error`]: the shared [`ScreenError`] type
//!
//! ## Example
//!
//! ```rust,no_run
//! use screen_core::{DeviceProfile, Direction, MotionController, ProfileKind};
//! use std::sync::Arc;
//! use std::time::{Duration, Instant};
//!
//! # fn main() -> screen_core::ScreenResult<()> {
//! let profile = DeviceProfile::builder(ProfileKind::XyScreens)
//!     .down_duration(Duration::from_secs(10))
//!     .build()?;
//! let address = profile.default_address();
//! let mut controller = MotionController::new(Arc::new(profile), address);
//!
//! let plan = controller.begin_move(Direction::Down, None, None)?;
//! // write plan.frame() to the port, then:
//! let started = Instant::now();
//! controller.commit_move(plan, started);
//! let progress = controller.poll(started + Duration::from_secs(5));
//! assert!((progress.position - 0.5).abs() < 1e-9);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod frame;
pub mod motion;
pub mod profile;
pub mod progress;
pub mod transport;

pub use error::{ScreenError, ScreenResult};
pub use frame::{encode, Address, Command, Frame, OpcodeTable, FRAME_LEN};
pub use motion::{
    Direction, MotionController, MotionState, MovePlan, Progress, ProgramPlan, ScreenStatus,
    POSITION_DOWN, POSITION_UP,
};
pub use profile::{duration_from_secs, DeviceProfile, DeviceProfileBuilder, ProfileKind};
pub use progress::{ProgressCallback, ProgressListeners};
pub use transport::{share, AsyncTransport, DynTransport, SharedTransport, Transport};
