//! Blocking screen driver.
//!
//! Every operation blocks until its frame has been written and flushed. The
//! `*_and_wait` variants and [`BlockingScreenDriver::move_to`] additionally
//! block until the move ends, delivering progress to the registered callbacks
//! once per tick. Waiting sleeps on a condition variable, so a [`stop`] from
//! another thread ends the wait immediately.
//!
//! [`stop`]: BlockingScreenDriver::stop
//!
//! # Example
//!
//! ```rust,ignore
//! let config = ScreenConfig::load("living-room.toml")?;
//! let transport = SerialTransport::open("/dev/ttyUSB0", config.timeout())?;
//! let screen = BlockingScreenDriver::new(Box::new(transport), &config)?;
//!
//! screen.on_progress(|p| println!("{:>8} {:5.1}%", p.status, p.position * 100.0));
//! screen.move_down_and_wait(None)?;
//! ```

use parking_lot::{Condvar, Mutex, ReentrantMutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

use screen_core::{
    Address, DeviceProfile, Direction, DynTransport, Frame, MotionController, MotionState,
    MovePlan, Progress, ProgressListeners, ScreenResult, ScreenStatus,
};

use crate::config::{ScreenConfig, MIN_TICK_INTERVAL};

/// Blocking driver for one screen or lift.
///
/// Cheap to clone; clones share the same controller and transport, so one
/// thread can wait on a move while another stops it.
#[derive(Clone)]
pub struct BlockingScreenDriver {
    inner: Arc<Inner>,
}

struct Inner {
    controller: Mutex<MotionController>,
    transport: Mutex<DynTransport>,
    /// Bumped by every stop. Waiters compare it to the value they started with.
    stop_generation: Mutex<u64>,
    wake: Condvar,
    /// Held while delivering progress. Re-entrant so a callback may call `stop`.
    emit_gate: ReentrantMutex<()>,
    listeners: ProgressListeners,
    tick_interval: Duration,
}

impl BlockingScreenDriver {
    /// Create a driver from a configuration.
    pub fn new(transport: DynTransport, config: &ScreenConfig) -> ScreenResult<Self> {
        let resolved = config.resolve()?;
        let driver = Self::with_profile(
            transport,
            resolved.profile,
            resolved.address,
            resolved.tick_interval,
        );
        if resolved.initial_position != 0.0 {
            driver.restore_position(resolved.initial_position)?;
        }
        Ok(driver)
    }

    /// Create a driver from an already built profile.
    pub fn with_profile(
        transport: DynTransport,
        profile: DeviceProfile,
        address: Address,
        tick_interval: Duration,
    ) -> Self {
        tracing::info!(
            profile = %profile.name(),
            address = %address,
            "Created blocking screen driver"
        );
        Self {
            inner: Arc::new(Inner {
                controller: Mutex::new(MotionController::new(Arc::new(profile), address)),
                transport: Mutex::new(transport),
                stop_generation: Mutex::new(0),
                wake: Condvar::new(),
                emit_gate: ReentrantMutex::new(()),
                listeners: ProgressListeners::new(),
                tick_interval: tick_interval.max(MIN_TICK_INTERVAL),
            }),
        }
    }

    // =========================================================================
    // Moves
    // =========================================================================

    /// Start moving up and return once the Up frame is written.
    #[instrument(skip(self), fields(address = %self.address()))]
    pub fn move_up(&self, duration_override: Option<Duration>) -> ScreenResult<Progress> {
        self.start_move(Direction::Up, duration_override)
    }

    /// Start moving down and return once the Down frame is written.
    #[instrument(skip(self), fields(address = %self.address()))]
    pub fn move_down(&self, duration_override: Option<Duration>) -> ScreenResult<Progress> {
        self.start_move(Direction::Down, duration_override)
    }

    /// Move up and block until fully up or stopped.
    pub fn move_up_and_wait(&self, duration_override: Option<Duration>) -> ScreenResult<Progress> {
        let generation = self.generation();
        self.move_up(duration_override)?;
        self.wait_until_idle(generation)
    }

    /// Move down and block until fully down or stopped.
    pub fn move_down_and_wait(
        &self,
        duration_override: Option<Duration>,
    ) -> ScreenResult<Progress> {
        let generation = self.generation();
        self.move_down(duration_override)?;
        self.wait_until_idle(generation)
    }

    /// Move towards `target` and stop there. Blocks until the move ends.
    #[instrument(skip(self), fields(address = %self.address()))]
    pub fn move_to(
        &self,
        target: f64,
        duration_override: Option<Duration>,
    ) -> ScreenResult<Progress> {
        let generation = self.generation();
        let plan = self
            .inner
            .controller
            .lock()
            .begin_move_to(target, duration_override, Instant::now())?;
        let Some(plan) = plan else {
            return Ok(self.inner.controller.lock().snapshot());
        };
        self.send_move(plan)?;
        self.wait_until_idle(generation)
    }

    /// Stop the screen.
    ///
    /// Always writes the Stop frame, also when idle. Never rejected. Once this
    /// returns no further progress callback fires for the stopped move.
    #[instrument(skip(self), fields(address = %self.address()))]
    pub fn stop(&self) -> ScreenResult<Progress> {
        let frame = {
            // Waits for a tick that is delivering progress right now.
            let _gate = self.inner.emit_gate.lock();
            *self.inner.stop_generation.lock() += 1;
            self.inner.wake.notify_all();
            self.inner.controller.lock().begin_stop(Instant::now())
        };

        let result = self.write(&frame);
        let progress = self.inner.controller.lock().finish_stop();
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Stop frame write failed, keeping last estimate");
        }
        self.inner.listeners.emit(&progress);
        result.map(|_| progress)
    }

    // =========================================================================
    // Fire-and-forget commands
    // =========================================================================

    /// Program a new address into a screen in learning mode.
    ///
    /// The frame is sent to the new address. Afterwards the driver talks to
    /// the new address.
    #[instrument(skip(self), fields(address = %self.address()))]
    pub fn program_address(&self, address: Address) -> ScreenResult<()> {
        let plan = self.inner.controller.lock().begin_program(address)?;
        match self.write(plan.frame()) {
            Ok(()) => {
                self.inner.controller.lock().commit_program(plan);
                Ok(())
            }
            Err(e) => {
                self.inner.controller.lock().end_write();
                Err(e)
            }
        }
    }

    /// Move up by a single step.
    pub fn micro_up(&self) -> ScreenResult<()> {
        self.micro(Direction::Up)
    }

    /// Move down by a single step.
    pub fn micro_down(&self) -> ScreenResult<()> {
        self.micro(Direction::Down)
    }

    #[instrument(skip(self), fields(address = %self.address()))]
    fn micro(&self, direction: Direction) -> ScreenResult<()> {
        let frame = self.inner.controller.lock().begin_micro(direction)?;
        let result = self.write(&frame);
        self.inner.controller.lock().end_write();
        result
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Estimated position, `0.0` = up, `1.0` = down.
    pub fn position(&self) -> f64 {
        self.inner.controller.lock().poll(Instant::now()).position
    }

    /// Controller state.
    pub fn state(&self) -> MotionState {
        self.inner.controller.lock().poll(Instant::now()).state
    }

    /// Derived screen status.
    pub fn status(&self) -> ScreenStatus {
        self.inner.controller.lock().poll(Instant::now()).status
    }

    /// Current address.
    pub fn address(&self) -> Address {
        self.inner.controller.lock().address()
    }

    /// Register a callback invoked on every progress tick.
    pub fn on_progress<F>(&self, callback: F)
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        self.inner.listeners.add(callback);
    }

    /// Overwrite the position estimate while idle.
    pub fn restore_position(&self, position: f64) -> ScreenResult<()> {
        self.inner.controller.lock().restore_position(position)
    }

    /// Stop any wait and release the transport.
    pub fn close(&self) -> ScreenResult<()> {
        {
            let _gate = self.inner.emit_gate.lock();
            *self.inner.stop_generation.lock() += 1;
            self.inner.wake.notify_all();
        }
        self.inner.listeners.clear();
        self.inner.transport.lock().close()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn start_move(
        &self,
        direction: Direction,
        duration_override: Option<Duration>,
    ) -> ScreenResult<Progress> {
        let plan = self
            .inner
            .controller
            .lock()
            .begin_move(direction, duration_override, None)?;
        self.send_move(plan)
    }

    fn send_move(&self, plan: MovePlan) -> ScreenResult<Progress> {
        match self.write(plan.frame()) {
            Ok(()) => {
                let progress = self.inner.controller.lock().commit_move(plan, Instant::now());
                Ok(progress)
            }
            Err(e) => {
                self.inner.controller.lock().abandon(plan);
                Err(e)
            }
        }
    }

    fn write(&self, frame: &Frame) -> ScreenResult<()> {
        tracing::debug!(frame = %frame, "Writing frame");
        self.inner.transport.lock().write_frame(frame.as_bytes())
    }

    fn generation(&self) -> u64 {
        *self.inner.stop_generation.lock()
    }

    /// Deliver progress once per tick until the move ends or a stop arrives.
    fn wait_until_idle(&self, generation: u64) -> ScreenResult<Progress> {
        loop {
            let (progress, remaining) = {
                let mut controller = self.inner.controller.lock();
                let now = Instant::now();
                (controller.poll(now), controller.remaining(now))
            };

            {
                let _gate = self.inner.emit_gate.lock();
                if *self.inner.stop_generation.lock() != generation {
                    return Ok(self.inner.controller.lock().snapshot());
                }
                self.inner.listeners.emit(&progress);
            }

            if progress.is_finished() {
                return Ok(progress);
            }
            if progress.target_reached {
                return self.stop();
            }

            let timeout = remaining
                .unwrap_or(Duration::ZERO)
                .min(self.inner.tick_interval);
            let mut current = self.inner.stop_generation.lock();
            if *current == generation {
                self.inner.wake.wait_for(&mut current, timeout);
            }
        }
    }
}

impl std::fmt::Debug for BlockingScreenDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let controller = self.inner.controller.lock();
        f.debug_struct("BlockingScreenDriver")
            .field("address", &controller.address())
            .field("state", &controller.state())
            .field("position", &controller.position())
            .finish()
    }
}
