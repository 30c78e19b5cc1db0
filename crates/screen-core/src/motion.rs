//! Motion controller and open-loop position estimator.
//!
//! The screen never reports its position, so the controller estimates it from
//! the time elapsed since a move started and the configured travel duration:
//!
//! ```text
//! position = start_position ± elapsed / travel_duration     (clamped to [0, 1])
//! ```
//!
//! Position convention: `0.0` is fully up (retracted), `1.0` is fully down
//! (extended). When the travel time to the endpoint has passed, the position
//! snaps to exactly `0.0` or `1.0`. This endpoint snap is the only drift
//! correction there is.
//!
//! # State machine
//!
//! ```text
//!            begin_move + commit_move
//!   Idle ────────────────────────────▶ MovingUp / MovingDown
//!    ▲                                     │          │
//!    │   poll() past endpoint (snap)       │          │ begin_stop()
//!    ├─────────────────────────────────────┘          ▼
//!    │                 finish_stop()              Stopping
//!    └────────────────────────────────────────────────┘
//! ```
//!
//! # Plan / commit
//!
//! The controller never touches a transport. Operations that write a frame are
//! split into a `begin_*` step that validates the request and returns the frame,
//! the caller's write, and a commit step (`commit_move`, `commit_program`,
//! `finish_stop`, `end_write`). Blocking and async drivers therefore share
//! this exact state machine and differ only in how they write and wait.
//!
//! While a write is in flight every other request except stop is rejected with
//! [`ScreenError::InvalidState`]. A stop issued during a move write supersedes
//! it: the later `commit_move` leaves the controller idle.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::error::{ScreenError, ScreenResult};
use crate::frame::{Address, Command, Frame};
use crate::profile::{validate_duration, DeviceProfile};

/// Position of a fully retracted screen.
pub const POSITION_UP: f64 = 0.0;

/// Position of a fully extended screen.
pub const POSITION_DOWN: f64 = 1.0;

/// Targets closer than this to the current position are treated as reached.
pub const TARGET_TOLERANCE: f64 = 0.005;

// =============================================================================
// Direction / state / status
// =============================================================================

/// Direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Towards `0.0` (retract).
    Up,
    /// Towards `1.0` (extend).
    Down,
}

impl Direction {
    /// Command that starts a move in this direction.
    pub fn command(&self) -> Command {
        match self {
            Direction::Up => Command::Up,
            Direction::Down => Command::Down,
        }
    }

    /// Single-step command for this direction.
    pub fn micro_command(&self) -> Command {
        match self {
            Direction::Up => Command::MicroUp,
            Direction::Down => Command::MicroDown,
        }
    }

    /// Position reached after a full traversal.
    pub fn endpoint(&self) -> f64 {
        match self {
            Direction::Up => POSITION_UP,
            Direction::Down => POSITION_DOWN,
        }
    }

    fn sign(&self) -> f64 {
        match self {
            Direction::Up => -1.0,
            Direction::Down => 1.0,
        }
    }

    fn moving_state(&self) -> MotionState {
        match self {
            Direction::Up => MotionState::MovingUp,
            Direction::Down => MotionState::MovingDown,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Up => "up",
            Direction::Down => "down",
        })
    }
}

/// Motion controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MotionState {
    /// Not moving.
    #[default]
    Idle,
    /// Moving towards `0.0`.
    MovingUp,
    /// Moving towards `1.0`.
    MovingDown,
    /// Stop requested, Stop frame not yet confirmed written.
    Stopping,
}

impl MotionState {
    /// Whether a move is in progress.
    pub fn is_moving(&self) -> bool {
        matches!(self, MotionState::MovingUp | MotionState::MovingDown)
    }

    /// Direction of the move in progress.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            MotionState::MovingUp => Some(Direction::Up),
            MotionState::MovingDown => Some(Direction::Down),
            MotionState::Idle | MotionState::Stopping => None,
        }
    }
}

impl fmt::Display for MotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MotionState::Idle => "idle",
            MotionState::MovingUp => "moving up",
            MotionState::MovingDown => "moving down",
            MotionState::Stopping => "stopping",
        })
    }
}

/// User-facing screen status derived from state and position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenStatus {
    /// Standing still somewhere between up and down.
    Stopped,
    /// Standing still, fully retracted.
    Up,
    /// Moving up.
    Upward,
    /// Moving down.
    Downward,
    /// Standing still, fully extended.
    Down,
}

impl ScreenStatus {
    fn derive(state: MotionState, position: f64) -> Self {
        match state {
            MotionState::MovingUp => ScreenStatus::Upward,
            MotionState::MovingDown => ScreenStatus::Downward,
            MotionState::Stopping => ScreenStatus::Stopped,
            MotionState::Idle if position <= POSITION_UP => ScreenStatus::Up,
            MotionState::Idle if position >= POSITION_DOWN => ScreenStatus::Down,
            MotionState::Idle => ScreenStatus::Stopped,
        }
    }
}

impl fmt::Display for ScreenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Honour width/alignment so the CLI can pad the label.
        f.pad(match self {
            ScreenStatus::Stopped => "Stopped",
            ScreenStatus::Up => "Up",
            ScreenStatus::Upward => "Upward",
            ScreenStatus::Downward => "Downward",
            ScreenStatus::Down => "Down",
        })
    }
}

/// Snapshot of the estimate, delivered on every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Controller state.
    pub state: MotionState,
    /// Derived status.
    pub status: ScreenStatus,
    /// Estimated position, `0.0` = up, `1.0` = down.
    pub position: f64,
    /// Time since the current (or last) move started.
    pub elapsed: Duration,
    /// The target of a `move_to` has been reached while still moving.
    pub target_reached: bool,
}

impl Progress {
    /// Whether no move is in progress any more.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, MotionState::Idle)
    }
}

// =============================================================================
// Plans
// =============================================================================

/// A validated move waiting for its frame to be written.
#[derive(Debug)]
#[must_use = "a move plan must be committed or abandoned"]
pub struct MovePlan {
    ticket: u64,
    direction: Direction,
    duration: Duration,
    target: Option<f64>,
    frame: Frame,
}

impl MovePlan {
    /// Frame to write.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Direction of the planned move.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Full-traversal duration used for the estimate.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Position at which the driver should stop, if any.
    pub fn target(&self) -> Option<f64> {
        self.target
    }
}

/// A validated address change waiting for its frame to be written.
#[derive(Debug)]
#[must_use = "a program plan must be committed or the write ended"]
pub struct ProgramPlan {
    address: Address,
    frame: Frame,
}

impl ProgramPlan {
    /// Frame to write.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Address being programmed.
    pub fn address(&self) -> Address {
        self.address
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveMove {
    direction: Direction,
    started_at: Instant,
    start_position: f64,
    duration: Duration,
    /// `None` when the endpoint lies beyond what `Instant` can represent.
    ends_at: Option<Instant>,
    target: Option<f64>,
    target_at: Option<Instant>,
}

impl ActiveMove {
    fn position_after(&self, elapsed: Duration) -> f64 {
        let travelled = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        (self.start_position + self.direction.sign() * travelled).clamp(POSITION_UP, POSITION_DOWN)
    }

    fn reached_endpoint(&self, now: Instant) -> bool {
        self.ends_at.is_some_and(|end| now >= end)
    }

    fn reached_target(&self, position: f64, now: Instant) -> bool {
        if self.target_at.is_some_and(|at| now >= at) {
            return true;
        }
        match (self.target, self.direction) {
            (Some(target), Direction::Down) => position >= target,
            (Some(target), Direction::Up) => position <= target,
            (None, _) => false,
        }
    }

    /// The earlier of the target and endpoint instants.
    fn deadline(&self) -> Option<Instant> {
        match (self.target_at, self.ends_at) {
            (Some(target), Some(end)) => Some(target.min(end)),
            (target, end) => target.or(end),
        }
    }
}

// =============================================================================
// MotionController
// =============================================================================

/// State machine estimating the position of one physical screen.
#[derive(Debug)]
pub struct MotionController {
    profile: Arc<DeviceProfile>,
    address: Address,
    state: MotionState,
    position: f64,
    last_elapsed: Duration,
    active: Option<ActiveMove>,
    pending_write: Option<u64>,
    next_ticket: u64,
}

impl MotionController {
    /// Create an idle controller at position `0.0` (fully up).
    pub fn new(profile: Arc<DeviceProfile>, address: Address) -> Self {
        Self {
            profile,
            address,
            state: MotionState::Idle,
            position: POSITION_UP,
            last_elapsed: Duration::ZERO,
            active: None,
            pending_write: None,
            next_ticket: 0,
        }
    }

    /// Device profile in use.
    pub fn profile(&self) -> &Arc<DeviceProfile> {
        &self.profile
    }

    /// Address the frames are sent to.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Current state.
    pub fn state(&self) -> MotionState {
        self.state
    }

    /// Last computed position. Use [`poll`](Self::poll) to bring it up to date.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Status derived from the last computed position.
    pub fn status(&self) -> ScreenStatus {
        ScreenStatus::derive(self.state, self.position)
    }

    /// Whether a move, stop or command write is in progress.
    pub fn is_busy(&self) -> bool {
        self.state != MotionState::Idle || self.pending_write.is_some()
    }

    /// Time left until the current move reaches its target or endpoint, if moving.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let active = self.active.as_ref()?;
        Some(
            active
                .deadline()
                .map(|end| end.saturating_duration_since(now))
                .unwrap_or(Duration::MAX),
        )
    }

    /// Snapshot without recomputing.
    pub fn snapshot(&self) -> Progress {
        Progress {
            state: self.state,
            status: self.status(),
            position: self.position,
            elapsed: self.last_elapsed,
            target_reached: false,
        }
    }

    /// Overwrite the estimate while idle, e.g. with a position saved before a restart.
    pub fn restore_position(&mut self, position: f64) -> ScreenResult<()> {
        self.ensure_idle("restore position")?;
        validate_fraction("position", position)?;
        self.position = position;
        debug!(address = %self.address, position, "Restored screen position");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Moves
    // -------------------------------------------------------------------------

    /// Validate a move and produce its frame.
    ///
    /// `duration_override` replaces the profile's travel duration for this move.
    /// `target` makes the move end at that position instead of at the endpoint.
    pub fn begin_move(
        &mut self,
        direction: Direction,
        duration_override: Option<Duration>,
        target: Option<f64>,
    ) -> ScreenResult<MovePlan> {
        let operation = match direction {
            Direction::Up => "move up",
            Direction::Down => "move down",
        };
        self.ensure_idle(operation)?;

        let duration = duration_override
            .or_else(|| self.profile.travel_duration(direction))
            .ok_or_else(|| {
                ScreenError::Configuration(format!(
                    "no travel duration configured for moving {}",
                    direction
                ))
            })?;
        validate_duration(&direction.to_string(), duration)?;

        if let Some(target) = target {
            validate_fraction("target position", target)?;
        }

        let ticket = self.reserve_write();
        let frame = Frame::new(self.address, direction.command(), self.profile.opcodes());
        debug!(address = %self.address, %direction, ?duration, ?target, frame = %frame, "Planned move");

        Ok(MovePlan {
            ticket,
            direction,
            duration,
            target,
            frame,
        })
    }

    /// Plan a move towards `target`, picking the direction from the estimate at `now`.
    ///
    /// Returns `None` when the estimate is already within [`TARGET_TOLERANCE`]
    /// of `target`; nothing needs to be written then. A target at an endpoint
    /// becomes a full move so the endpoint snap applies.
    pub fn begin_move_to(
        &mut self,
        target: f64,
        duration_override: Option<Duration>,
        now: Instant,
    ) -> ScreenResult<Option<MovePlan>> {
        self.poll(now);
        self.ensure_idle("move to")?;
        validate_fraction("target position", target)?;

        let position = self.position;
        let direction = if (target - position).abs() < TARGET_TOLERANCE {
            debug!(address = %self.address, target, position, "Already at target");
            return Ok(None);
        } else if target > position {
            Direction::Down
        } else {
            Direction::Up
        };
        let target = (target != direction.endpoint()).then_some(target);
        self.begin_move(direction, duration_override, target).map(Some)
    }

    /// The move frame was written at `now`: start tracking.
    pub fn commit_move(&mut self, plan: MovePlan, now: Instant) -> Progress {
        if self.pending_write != Some(plan.ticket) {
            debug!(
                address = %self.address,
                direction = %plan.direction,
                "Move superseded by stop before it started"
            );
            return self.snapshot();
        }
        self.pending_write = None;

        let start_position = self.position;
        let remaining = (plan.direction.endpoint() - start_position).abs();
        let ends_at = offset(now, plan.duration, remaining);
        let target_at = plan
            .target
            .and_then(|target| offset(now, plan.duration, (target - start_position).abs()));

        self.active = Some(ActiveMove {
            direction: plan.direction,
            started_at: now,
            start_position,
            duration: plan.duration,
            ends_at,
            target: plan.target,
            target_at,
        });
        self.state = plan.direction.moving_state();
        self.last_elapsed = Duration::ZERO;

        debug!(
            address = %self.address,
            state = %self.state,
            start_position,
            ?remaining,
            "Move started"
        );
        self.poll(now)
    }

    /// The move frame could not be written. State is left unchanged.
    pub fn abandon(&mut self, plan: MovePlan) {
        if self.pending_write == Some(plan.ticket) {
            self.pending_write = None;
        }
        debug!(address = %self.address, direction = %plan.direction, "Move abandoned");
    }

    /// Recompute the estimate at `now`.
    ///
    /// Finishes the move with an endpoint snap once the travel time has passed.
    pub fn poll(&mut self, now: Instant) -> Progress {
        let Some(active) = self.active else {
            return self.snapshot();
        };

        let elapsed = now.saturating_duration_since(active.started_at);
        self.last_elapsed = elapsed;

        if active.reached_endpoint(now) {
            self.position = active.direction.endpoint();
            self.state = MotionState::Idle;
            self.active = None;
            debug!(
                address = %self.address,
                position = self.position,
                ?elapsed,
                "Endpoint reached"
            );
            return self.snapshot();
        }

        let estimate = active.position_after(elapsed);
        // Never step backwards within one move.
        self.position = match active.direction {
            Direction::Down => estimate.max(self.position),
            Direction::Up => estimate.min(self.position),
        };
        trace!(address = %self.address, position = self.position, ?elapsed, "Position update");

        Progress {
            target_reached: active.reached_target(self.position, now),
            ..self.snapshot()
        }
    }

    /// Position at `now` without mutating the controller.
    pub fn position_at(&self, now: Instant) -> f64 {
        match self.active {
            Some(active) if active.reached_endpoint(now) => active.direction.endpoint(),
            Some(active) => {
                let estimate = active.position_after(now.saturating_duration_since(active.started_at));
                match active.direction {
                    Direction::Down => estimate.max(self.position),
                    Direction::Up => estimate.min(self.position),
                }
            }
            None => self.position,
        }
    }

    // -------------------------------------------------------------------------
    // Stop
    // -------------------------------------------------------------------------

    /// Freeze the estimate at `now` and produce the Stop frame.
    ///
    /// Never fails. On an idle controller this is a state no-op; the frame is
    /// still returned so a screen moved by other means can be stopped.
    pub fn begin_stop(&mut self, now: Instant) -> Frame {
        if self.pending_write.take().is_some() {
            debug!(address = %self.address, "Stop supersedes in-flight write");
        }

        if self.active.is_some() {
            let progress = self.poll(now);
            if !progress.is_finished() {
                self.active = None;
                self.state = MotionState::Stopping;
                debug!(
                    address = %self.address,
                    position = self.position,
                    elapsed = ?self.last_elapsed,
                    "Stopping"
                );
            }
        }

        Frame::new(self.address, Command::Stop, self.profile.opcodes())
    }

    /// The Stop frame write finished (successfully or not).
    pub fn finish_stop(&mut self) -> Progress {
        if self.state == MotionState::Stopping {
            self.state = MotionState::Idle;
            debug!(address = %self.address, position = self.position, "Stopped");
        }
        self.snapshot()
    }

    // -------------------------------------------------------------------------
    // Fire-and-forget commands
    // -------------------------------------------------------------------------

    /// Validate an address change and produce the ProgramAddress frame.
    pub fn begin_program(&mut self, address: Address) -> ScreenResult<ProgramPlan> {
        self.ensure_idle("program address")?;
        self.reserve_write();
        let frame = Frame::new(address, Command::ProgramAddress, self.profile.opcodes());
        Ok(ProgramPlan { address, frame })
    }

    /// The ProgramAddress frame was written: adopt the new address.
    pub fn commit_program(&mut self, plan: ProgramPlan) {
        self.pending_write = None;
        debug!(old = %self.address, new = %plan.address, "Programmed address");
        self.address = plan.address;
    }

    /// Validate a single step and produce its frame.
    ///
    /// Steps have no known size, so the estimate is left unchanged.
    pub fn begin_micro(&mut self, direction: Direction) -> ScreenResult<Frame> {
        self.ensure_idle(match direction {
            Direction::Up => "micro step up",
            Direction::Down => "micro step down",
        })?;
        self.reserve_write();
        Ok(Frame::new(
            self.address,
            direction.micro_command(),
            self.profile.opcodes(),
        ))
    }

    /// A fire-and-forget write finished, or a program write failed.
    pub fn end_write(&mut self) {
        self.pending_write = None;
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn ensure_idle(&self, operation: &'static str) -> ScreenResult<()> {
        if self.is_busy() {
            return Err(ScreenError::InvalidState {
                operation,
                state: self.state,
                write_pending: self.pending_write.is_some(),
            });
        }
        Ok(())
    }

    fn reserve_write(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        self.pending_write = Some(ticket);
        ticket
    }
}

/// `now + duration * fraction`, or `None` when that is not representable.
fn offset(now: Instant, duration: Duration, fraction: f64) -> Option<Instant> {
    Duration::try_from_secs_f64(duration.as_secs_f64() * fraction)
        .ok()
        .and_then(|delta| now.checked_add(delta))
}

fn validate_fraction(label: &str, value: f64) -> ScreenResult<()> {
    if !(POSITION_UP..=POSITION_DOWN).contains(&value) {
        return Err(ScreenError::Configuration(format!(
            "{} must be within [0.0, 1.0], got {}",
            label, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileKind;

    const EPS: f64 = 1e-9;

    fn controller(up_secs: u64, down_secs: u64) -> MotionController {
        let profile = DeviceProfile::builder(ProfileKind::XyScreens)
            .up_duration(Duration::from_secs(up_secs))
            .down_duration(Duration::from_secs(down_secs))
            .build()
            .unwrap();
        let address = profile.default_address();
        MotionController::new(Arc::new(profile), address)
    }

    fn start(ctrl: &mut MotionController, direction: Direction, now: Instant) -> Progress {
        let plan = ctrl.begin_move(direction, None, None).unwrap();
        ctrl.commit_move(plan, now)
    }

    #[test]
    fn test_move_down_halfway_then_endpoint() {
        let mut ctrl = controller(10, 10);
        let t0 = Instant::now();
        start(&mut ctrl, Direction::Down, t0);
        assert_eq!(ctrl.state(), MotionState::MovingDown);

        let half = ctrl.poll(t0 + Duration::from_secs(5));
        assert!((half.position - 0.5).abs() < EPS);
        assert_eq!(half.status, ScreenStatus::Downward);

        let done = ctrl.poll(t0 + Duration::from_secs(10));
        assert_eq!(done.position, 1.0);
        assert_eq!(done.state, MotionState::Idle);
        assert_eq!(done.status, ScreenStatus::Down);
    }

    #[test]
    fn test_endpoint_snap_independent_of_tick_granularity() {
        for tick_ms in [1u64, 7, 100, 333, 2500, 10_000] {
            let mut ctrl = controller(10, 10);
            let t0 = Instant::now();
            start(&mut ctrl, Direction::Down, t0);
            let mut t = Duration::ZERO;
            while t < Duration::from_secs(10) {
                t += Duration::from_millis(tick_ms);
                ctrl.poll(t0 + t.min(Duration::from_secs(10)));
            }
            assert_eq!(ctrl.position(), 1.0, "tick {}ms", tick_ms);
            assert_eq!(ctrl.state(), MotionState::Idle);
        }
    }

    #[test]
    fn test_endpoint_snap_from_mid_position() {
        let mut ctrl = controller(10, 10);
        ctrl.restore_position(0.5).unwrap();
        let t0 = Instant::now();
        start(&mut ctrl, Direction::Down, t0);
        assert_eq!(ctrl.remaining(t0), Some(Duration::from_secs(5)));

        let done = ctrl.poll(t0 + Duration::from_secs(5));
        assert_eq!(done.position, 1.0);
        assert!(done.is_finished());
    }

    #[test]
    fn test_stop_during_up_travel_interpolates() {
        let mut ctrl = controller(10, 10);
        ctrl.restore_position(1.0).unwrap();
        let t0 = Instant::now();
        start(&mut ctrl, Direction::Up, t0);

        let frame = ctrl.begin_stop(t0 + Duration::from_secs(2));
        assert_eq!(frame.opcode(), 0xCC);
        assert_eq!(ctrl.state(), MotionState::Stopping);
        assert_eq!(ctrl.status(), ScreenStatus::Stopped);

        let progress = ctrl.finish_stop();
        assert_eq!(progress.state, MotionState::Idle);
        assert!((progress.position - 0.8).abs() < EPS);
        assert_eq!(progress.status, ScreenStatus::Stopped);
    }

    #[test]
    fn test_stop_position_matches_elapsed_fraction() {
        for stop_ms in [0u64, 1, 1234, 5000, 9999] {
            let mut ctrl = controller(10, 10);
            let t0 = Instant::now();
            start(&mut ctrl, Direction::Down, t0);
            ctrl.begin_stop(t0 + Duration::from_millis(stop_ms));
            let p = ctrl.finish_stop();
            assert!((p.position - stop_ms as f64 / 10_000.0).abs() < EPS);
        }
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut ctrl = controller(10, 10);
        let frame = ctrl.begin_stop(Instant::now());
        assert_eq!(frame.as_bytes(), &[0xFF, 0xAA, 0xEE, 0xEE, 0xCC]);
        assert_eq!(ctrl.state(), MotionState::Idle);
        let p = ctrl.finish_stop();
        assert_eq!(p.position, 0.0);
        assert_eq!(p.status, ScreenStatus::Up);
    }

    #[test]
    fn test_stop_after_endpoint_keeps_snap() {
        let mut ctrl = controller(10, 10);
        let t0 = Instant::now();
        start(&mut ctrl, Direction::Down, t0);
        ctrl.begin_stop(t0 + Duration::from_secs(12));
        assert_eq!(ctrl.state(), MotionState::Idle);
        assert_eq!(ctrl.finish_stop().position, 1.0);
    }

    #[test]
    fn test_move_while_moving_is_rejected() {
        let mut ctrl = controller(10, 10);
        let t0 = Instant::now();
        start(&mut ctrl, Direction::Up, t0);

        let err = ctrl.begin_move(Direction::Up, None, None).unwrap_err();
        assert!(matches!(
            err,
            ScreenError::InvalidState {
                state: MotionState::MovingUp,
                ..
            }
        ));
        let err = ctrl.begin_move(Direction::Down, None, None).unwrap_err();
        assert!(matches!(err, ScreenError::InvalidState { .. }));
        assert_eq!(ctrl.state(), MotionState::MovingUp);
    }

    #[test]
    fn test_move_while_write_in_flight_is_rejected() {
        let mut ctrl = controller(10, 10);
        let plan = ctrl.begin_move(Direction::Down, None, None).unwrap();
        let err = ctrl.begin_move(Direction::Down, None, None).unwrap_err();
        assert!(matches!(
            err,
            ScreenError::InvalidState {
                write_pending: true,
                ..
            }
        ));
        ctrl.abandon(plan);
        assert!(!ctrl.is_busy());
    }

    #[test]
    fn test_missing_duration_is_configuration_error() {
        let profile = Arc::new(DeviceProfile::xyscreens());
        let mut ctrl = MotionController::new(profile.clone(), profile.default_address());
        let err = ctrl.begin_move(Direction::Down, None, None).unwrap_err();
        assert!(matches!(err, ScreenError::Configuration(_)));
        assert!(!ctrl.is_busy());

        // An explicit override is enough.
        let plan = ctrl
            .begin_move(Direction::Down, Some(Duration::from_secs(3)), None)
            .unwrap();
        assert_eq!(plan.duration(), Duration::from_secs(3));
        ctrl.abandon(plan);

        // Stop needs no duration.
        let _ = ctrl.begin_stop(Instant::now());
        assert_eq!(ctrl.finish_stop().state, MotionState::Idle);
    }

    #[test]
    fn test_zero_override_rejected() {
        let mut ctrl = controller(10, 10);
        let err = ctrl
            .begin_move(Direction::Up, Some(Duration::ZERO), None)
            .unwrap_err();
        assert!(matches!(err, ScreenError::Configuration(_)));
    }

    #[test]
    fn test_unrepresentable_travel_time_has_no_deadline() {
        let mut ctrl = controller(10, 10);
        let t0 = Instant::now();
        let plan = ctrl
            .begin_move(Direction::Down, Some(Duration::MAX), Some(0.5))
            .unwrap();
        let progress = ctrl.commit_move(plan, t0);
        assert_eq!(progress.state, MotionState::MovingDown);
        assert_eq!(ctrl.remaining(t0), Some(Duration::MAX));

        let later = ctrl.poll(t0 + Duration::from_secs(3600));
        assert_eq!(later.state, MotionState::MovingDown);
        assert!(later.position < 1e-9);

        ctrl.begin_stop(t0 + Duration::from_secs(3600));
        ctrl.finish_stop();
        assert_eq!(ctrl.state(), MotionState::Idle);
    }

    #[test]
    fn test_abandon_leaves_state_unchanged() {
        let mut ctrl = controller(10, 10);
        ctrl.restore_position(0.4).unwrap();
        let plan = ctrl.begin_move(Direction::Down, None, None).unwrap();
        ctrl.abandon(plan);
        assert_eq!(ctrl.state(), MotionState::Idle);
        assert_eq!(ctrl.position(), 0.4);
    }

    #[test]
    fn test_stop_supersedes_pending_move() {
        let mut ctrl = controller(10, 10);
        let t0 = Instant::now();
        let plan = ctrl.begin_move(Direction::Down, None, None).unwrap();
        ctrl.begin_stop(t0);
        ctrl.finish_stop();
        let progress = ctrl.commit_move(plan, t0);
        assert_eq!(progress.state, MotionState::Idle);
        assert_eq!(ctrl.position(), 0.0);
    }

    #[test]
    fn test_position_monotonic_within_move() {
        let mut ctrl = controller(7, 7);
        ctrl.restore_position(1.0).unwrap();
        let t0 = Instant::now();
        start(&mut ctrl, Direction::Up, t0);
        let mut last = ctrl.position();
        for ms in (0..8000).step_by(37) {
            let p = ctrl.poll(t0 + Duration::from_millis(ms)).position;
            assert!(p <= last);
            assert!((0.0..=1.0).contains(&p));
            last = p;
        }
        assert_eq!(last, 0.0);
    }

    #[test]
    fn test_move_toward_current_endpoint_finishes_immediately() {
        let mut ctrl = controller(10, 10);
        let t0 = Instant::now();
        let progress = start(&mut ctrl, Direction::Up, t0);
        assert!(progress.is_finished());
        assert_eq!(progress.position, 0.0);
        assert_eq!(progress.status, ScreenStatus::Up);
    }

    #[test]
    fn test_target_reached_flag() {
        let mut ctrl = controller(10, 10);
        let t0 = Instant::now();
        let plan = ctrl.begin_move(Direction::Down, None, Some(0.5)).unwrap();
        ctrl.commit_move(plan, t0);
        assert!(!ctrl.poll(t0 + Duration::from_secs(4)).target_reached);
        let p = ctrl.poll(t0 + Duration::from_secs(5));
        assert!(p.target_reached);
        assert_eq!(p.state, MotionState::MovingDown);
    }

    #[test]
    fn test_remaining_counts_down_to_target() {
        let mut ctrl = controller(10, 10);
        ctrl.restore_position(1.0).unwrap();
        let t0 = Instant::now();
        let plan = ctrl.begin_move(Direction::Up, None, Some(0.75)).unwrap();
        ctrl.commit_move(plan, t0);
        let left = ctrl.remaining(t0).unwrap();
        assert!(left >= Duration::from_millis(2499) && left <= Duration::from_millis(2501));
        assert!(ctrl.poll(t0 + left).target_reached);
    }

    #[test]
    fn test_move_to_picks_direction_and_target() {
        let mut ctrl = controller(10, 10);
        let t0 = Instant::now();

        let plan = ctrl.begin_move_to(0.5, None, t0).unwrap().unwrap();
        assert_eq!(plan.direction(), Direction::Down);
        assert_eq!(plan.target(), Some(0.5));
        ctrl.abandon(plan);

        let plan = ctrl.begin_move_to(1.0, None, t0).unwrap().unwrap();
        assert_eq!(plan.direction(), Direction::Down);
        assert_eq!(plan.target(), None);
        ctrl.abandon(plan);

        ctrl.restore_position(0.8).unwrap();
        let plan = ctrl.begin_move_to(0.2, None, t0).unwrap().unwrap();
        assert_eq!(plan.direction(), Direction::Up);
        assert_eq!(plan.target(), Some(0.2));
        assert_eq!(plan.frame().opcode(), 0xDD);
    }

    #[test]
    fn test_move_to_within_tolerance_plans_nothing() {
        let mut ctrl = controller(10, 10);
        ctrl.restore_position(0.5).unwrap();
        assert!(ctrl.begin_move_to(0.502, None, Instant::now()).unwrap().is_none());
        assert!(!ctrl.is_busy());
    }

    #[test]
    fn test_move_to_rejections() {
        let mut ctrl = controller(10, 10);
        let t0 = Instant::now();
        for bad in [1.5, -0.1, f64::NAN] {
            let err = ctrl.begin_move_to(bad, None, t0).unwrap_err();
            assert!(matches!(err, ScreenError::Configuration(_)));
        }
        assert!(!ctrl.is_busy());

        start(&mut ctrl, Direction::Down, t0);
        let err = ctrl.begin_move_to(0.0, None, t0).unwrap_err();
        assert!(matches!(err, ScreenError::InvalidState { .. }));
    }

    #[test]
    fn test_invalid_target_rejected() {
        let mut ctrl = controller(10, 10);
        let err = ctrl
            .begin_move(Direction::Down, None, Some(1.5))
            .unwrap_err();
        assert!(matches!(err, ScreenError::Configuration(_)));
        assert!(!ctrl.is_busy());
    }

    #[test]
    fn test_program_changes_address_without_transition() {
        let mut ctrl = controller(10, 10);
        let new = Address::new([0xAA, 0xBB, 0xCC]);
        let plan = ctrl.begin_program(new).unwrap();
        assert_eq!(plan.frame().as_bytes(), &[0xFF, 0xAA, 0xBB, 0xCC, 0xAA]);
        ctrl.commit_program(plan);
        assert_eq!(ctrl.address(), new);
        assert_eq!(ctrl.state(), MotionState::Idle);
        assert_eq!(ctrl.position(), 0.0);
    }

    #[test]
    fn test_program_rejected_while_moving() {
        let mut ctrl = controller(10, 10);
        start(&mut ctrl, Direction::Down, Instant::now());
        assert!(ctrl.begin_program(Address::new([1, 2, 3])).is_err());
    }

    #[test]
    fn test_micro_step_frames_leave_estimate() {
        let mut ctrl = controller(10, 10);
        ctrl.restore_position(0.25).unwrap();
        let frame = ctrl.begin_micro(Direction::Down).unwrap();
        assert_eq!(frame.opcode(), 0xE9);
        assert!(ctrl.begin_micro(Direction::Up).is_err());
        ctrl.end_write();
        assert_eq!(ctrl.begin_micro(Direction::Up).unwrap().opcode(), 0xC9);
        ctrl.end_write();
        assert_eq!(ctrl.position(), 0.25);
    }

    #[test]
    fn test_restore_position_validation() {
        let mut ctrl = controller(10, 10);
        assert!(ctrl.restore_position(-0.00001).is_err());
        assert!(ctrl.restore_position(1.00001).is_err());
        ctrl.restore_position(1.0).unwrap();
        assert_eq!(ctrl.status(), ScreenStatus::Down);
        ctrl.restore_position(0.5).unwrap();
        assert_eq!(ctrl.status(), ScreenStatus::Stopped);
    }

    #[test]
    fn test_position_at_does_not_mutate() {
        let mut ctrl = controller(10, 10);
        let t0 = Instant::now();
        start(&mut ctrl, Direction::Down, t0);
        assert!((ctrl.position_at(t0 + Duration::from_secs(3)) - 0.3).abs() < EPS);
        assert_eq!(ctrl.position_at(t0 + Duration::from_secs(30)), 1.0);
        assert_eq!(ctrl.state(), MotionState::MovingDown);
        assert_eq!(ctrl.position(), 0.0);
    }

    #[test]
    fn test_status_display_pads() {
        assert_eq!(format!("{:8}|", ScreenStatus::Up), "Up      |");
        assert_eq!(MotionState::Stopping.to_string(), "stopping");
    }
}
