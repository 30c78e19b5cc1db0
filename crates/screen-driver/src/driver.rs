//! Async screen driver.
//!
//! Operations return as soon as their frame is written. While a move is in
//! progress a ticker task recomputes the position once per tick interval and
//! publishes it to the registered callbacks and to a `watch` channel.
//!
//! The ticker stops on its own at the endpoint. [`ScreenDriver::stop`],
//! [`ScreenDriver::close`] and dropping the last driver handle abort it; `stop`
//! and `close` also wait for the task to finish, so no callback runs after they
//! return.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = ScreenConfig::load("living-room.toml")?;
//! let screen = ScreenDriver::open(&config).await?;
//!
//! screen.on_progress(|p| tracing::info!(position = p.position, "tick"));
//! screen.move_down(None).await?;
//! tokio::time::sleep(Duration::from_secs(3)).await;
//! screen.stop().await?;
//! ```

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::instrument;

use screen_core::{
    Address, AsyncTransport, DeviceProfile, Direction, Frame, MotionController, MotionState,
    MovePlan, Progress, ProgressListeners, ScreenError, ScreenResult, ScreenStatus,
};

use crate::config::{ScreenConfig, MIN_TICK_INTERVAL};
use crate::shared_ports::{get_or_open_port_with_timeout, BusTransport};

/// Current time on the tokio clock, so paused test time drives the estimate.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Async driver for one screen or lift.
///
/// Cheap to clone; clones share the same controller, transport and ticker.
#[derive(Clone)]
pub struct ScreenDriver {
    inner: Arc<Inner>,
}

struct Session {
    controller: MotionController,
    ticker: Option<JoinHandle<()>>,
}

struct Inner {
    session: Mutex<Session>,
    transport: tokio::sync::Mutex<Box<dyn AsyncTransport>>,
    listeners: ProgressListeners,
    progress: watch::Sender<Progress>,
    tick_interval: Duration,
}

impl Inner {
    fn publish(&self, progress: &Progress) {
        self.progress.send_replace(*progress);
        self.listeners.emit(progress);
    }

    async fn write(&self, frame: &Frame) -> ScreenResult<()> {
        tracing::debug!(frame = %frame, "Writing frame");
        let mut transport = self.transport.lock().await;
        transport.write_frame(frame.as_bytes()).await
    }

    /// Stop without touching the ticker handle. Used by the ticker itself.
    async fn write_stop(&self, frame: Frame) -> ScreenResult<Progress> {
        let result = self.write(&frame).await;
        let progress = self.session.lock().controller.finish_stop();
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Stop frame write failed, keeping last estimate");
        }
        self.publish(&progress);
        result.map(|_| progress)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(ticker) = self.session.get_mut().ticker.take() {
            ticker.abort();
        }
    }
}

impl ScreenDriver {
    /// Open the configured serial port (shared with other screens on the same
    /// bus) and create a driver.
    pub async fn open(config: &ScreenConfig) -> ScreenResult<Self> {
        let port_path = config
            .port
            .as_deref()
            .ok_or_else(|| ScreenError::Configuration("no serial port configured".into()))?;
        config.validate()?;
        let port = get_or_open_port_with_timeout(port_path, config.timeout()).await?;
        Self::new(Box::new(BusTransport::new(port)), config)
    }

    /// Create a driver over an existing transport.
    pub fn new(transport: Box<dyn AsyncTransport>, config: &ScreenConfig) -> ScreenResult<Self> {
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
        transport: Box<dyn AsyncTransport>,
        profile: DeviceProfile,
        address: Address,
        tick_interval: Duration,
    ) -> Self {
        tracing::info!(
            profile = %profile.name(),
            address = %address,
            "Created screen driver"
        );
        let controller = MotionController::new(Arc::new(profile), address);
        let (progress, _) = watch::channel(controller.snapshot());
        Self {
            inner: Arc::new(Inner {
                session: Mutex::new(Session {
                    controller,
                    ticker: None,
                }),
                transport: tokio::sync::Mutex::new(transport),
                listeners: ProgressListeners::new(),
                progress,
                tick_interval: tick_interval.max(MIN_TICK_INTERVAL),
            }),
        }
    }

    // =========================================================================
    // Moves
    // =========================================================================

    /// Start moving up. Returns once the Up frame is written.
    #[instrument(skip(self), fields(address = %self.address()))]
    pub async fn move_up(&self, duration_override: Option<Duration>) -> ScreenResult<Progress> {
        self.start_move(Direction::Up, duration_override).await
    }

    /// Start moving down. Returns once the Down frame is written.
    #[instrument(skip(self), fields(address = %self.address()))]
    pub async fn move_down(&self, duration_override: Option<Duration>) -> ScreenResult<Progress> {
        self.start_move(Direction::Down, duration_override).await
    }

    /// Start moving towards `target`. The ticker stops the screen there.
    #[instrument(skip(self), fields(address = %self.address()))]
    pub async fn move_to(
        &self,
        target: f64,
        duration_override: Option<Duration>,
    ) -> ScreenResult<Progress> {
        let plan = self.inner.session.lock().controller.begin_move_to(
            target,
            duration_override,
            now(),
        )?;
        match plan {
            Some(plan) => self.send_move(plan).await,
            None => Ok(self.inner.session.lock().controller.snapshot()),
        }
    }

    /// Stop the screen.
    ///
    /// Freezes the estimate, cancels the ticker and waits for it to finish,
    /// then writes the Stop frame. Also writes it when idle. Never rejected.
    #[instrument(skip(self), fields(address = %self.address()))]
    pub async fn stop(&self) -> ScreenResult<Progress> {
        let (frame, ticker) = {
            let mut session = self.inner.session.lock();
            let frame = session.controller.begin_stop(now());
            (frame, session.ticker.take())
        };
        cancel_ticker(ticker).await;
        self.inner.write_stop(frame).await
    }

    /// Resolve once the current move has ended (endpoint, target or stop).
    pub async fn wait_idle(&self) -> Progress {
        let mut rx = self.inner.progress.subscribe();
        loop {
            let progress = self.inner.session.lock().controller.poll(now());
            if progress.is_finished() {
                return progress;
            }
            if rx.changed().await.is_err() {
                return progress;
            }
        }
    }

    /// Move up and wait until fully up or stopped.
    pub async fn move_up_and_wait(
        &self,
        duration_override: Option<Duration>,
    ) -> ScreenResult<Progress> {
        self.move_up(duration_override).await?;
        Ok(self.wait_idle().await)
    }

    /// Move down and wait until fully down or stopped.
    pub async fn move_down_and_wait(
        &self,
        duration_override: Option<Duration>,
    ) -> ScreenResult<Progress> {
        self.move_down(duration_override).await?;
        Ok(self.wait_idle().await)
    }

    // =========================================================================
    // Fire-and-forget commands
    // =========================================================================

    /// Program a new address into a screen in learning mode.
    #[instrument(skip(self), fields(address = %self.address()))]
    pub async fn program_address(&self, address: Address) -> ScreenResult<()> {
        let plan = self.inner.session.lock().controller.begin_program(address)?;
        match self.inner.write(plan.frame()).await {
            Ok(()) => {
                self.inner.session.lock().controller.commit_program(plan);
                Ok(())
            }
            Err(e) => {
                self.inner.session.lock().controller.end_write();
                Err(e)
            }
        }
    }

    /// Move up by a single step.
    pub async fn micro_up(&self) -> ScreenResult<()> {
        self.micro(Direction::Up).await
    }

    /// Move down by a single step.
    pub async fn micro_down(&self) -> ScreenResult<()> {
        self.micro(Direction::Down).await
    }

    #[instrument(skip(self), fields(address = %self.address()))]
    async fn micro(&self, direction: Direction) -> ScreenResult<()> {
        let frame = self.inner.session.lock().controller.begin_micro(direction)?;
        let result = self.inner.write(&frame).await;
        self.inner.session.lock().controller.end_write();
        result
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Estimated position, `0.0` = up, `1.0` = down.
    pub fn position(&self) -> f64 {
        self.inner.session.lock().controller.poll(now()).position
    }

    /// Controller state.
    pub fn state(&self) -> MotionState {
        self.inner.session.lock().controller.poll(now()).state
    }

    /// Derived screen status.
    pub fn status(&self) -> ScreenStatus {
        self.inner.session.lock().controller.poll(now()).status
    }

    /// Current address.
    pub fn address(&self) -> Address {
        self.inner.session.lock().controller.address()
    }

    /// Register a callback invoked on every progress tick.
    pub fn on_progress<F>(&self, callback: F)
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        self.inner.listeners.add(callback);
    }

    /// Subscribe to progress snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.inner.progress.subscribe()
    }

    /// Overwrite the position estimate while idle.
    pub fn restore_position(&self, position: f64) -> ScreenResult<()> {
        let mut session = self.inner.session.lock();
        session.controller.restore_position(position)?;
        self.inner.progress.send_replace(session.controller.snapshot());
        Ok(())
    }

    /// Cancel the ticker, drop all callbacks and release the transport.
    pub async fn close(&self) -> ScreenResult<()> {
        let ticker = self.inner.session.lock().ticker.take();
        cancel_ticker(ticker).await;
        self.inner.listeners.clear();
        self.inner.transport.lock().await.close().await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn start_move(
        &self,
        direction: Direction,
        duration_override: Option<Duration>,
    ) -> ScreenResult<Progress> {
        let plan = self
            .inner
            .session
            .lock()
            .controller
            .begin_move(direction, duration_override, None)?;
        self.send_move(plan).await
    }

    async fn send_move(&self, plan: MovePlan) -> ScreenResult<Progress> {
        if let Err(e) = self.inner.write(plan.frame()).await {
            self.inner.session.lock().controller.abandon(plan);
            return Err(e);
        }

        let (progress, previous) = {
            let mut session = self.inner.session.lock();
            let progress = session.controller.commit_move(plan, now());
            let previous = if progress.is_finished() {
                None
            } else {
                // Spawned under the session lock so a concurrent stop always sees it.
                let ticker = tokio::spawn(run_ticker(
                    Arc::downgrade(&self.inner),
                    self.inner.tick_interval,
                ));
                session.ticker.replace(ticker)
            };
            (progress, previous)
        };
        // A finished ticker from an earlier move.
        if let Some(previous) = previous {
            previous.abort();
        }

        self.inner.publish(&progress);
        Ok(progress)
    }
}

impl std::fmt::Debug for ScreenDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.inner.session.lock();
        f.debug_struct("ScreenDriver")
            .field("address", &session.controller.address())
            .field("state", &session.controller.state())
            .field("position", &session.controller.position())
            .field("ticking", &session.ticker.is_some())
            .finish()
    }
}

async fn cancel_ticker(ticker: Option<JoinHandle<()>>) {
    if let Some(ticker) = ticker {
        ticker.abort();
        // Cancelled or already finished; either way it can no longer publish.
        let _ = ticker.await;
    }
}

/// Publish progress once per tick until the move ends.
///
/// Also wakes at the target or endpoint instant, so a move never overruns
/// its deadline by up to a whole tick.
async fn run_ticker(inner: Weak<Inner>, tick_interval: Duration) {
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the move start was already published.
    interval.tick().await;

    loop {
        let remaining = {
            let Some(inner) = inner.upgrade() else { return };
            let (remaining, progress) = {
                let session = inner.session.lock();
                (session.controller.remaining(now()), session.controller.snapshot())
            };
            match remaining {
                Some(remaining) => remaining,
                None => {
                    // A query already polled past the endpoint; deliver the final update.
                    if progress.is_finished() {
                        inner.publish(&progress);
                    }
                    return;
                }
            }
        };

        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::time::sleep(remaining) => {}
        }

        let Some(inner) = inner.upgrade() else { return };
        let (progress, stop_frame) = {
            let mut session = inner.session.lock();
            let progress = session.controller.poll(now());
            let stop_frame = progress
                .target_reached
                .then(|| session.controller.begin_stop(now()));
            (progress, stop_frame)
        };
        tracing::trace!(position = progress.position, state = %progress.state, "Tick");

        if let Some(frame) = stop_frame {
            tracing::debug!(position = progress.position, "Target reached, stopping");
            if let Err(e) = inner.write_stop(frame).await {
                tracing::error!(error = %e, "Failed to stop at target");
            }
            return;
        }

        inner.publish(&progress);
        if progress.is_finished() {
            tracing::debug!(position = progress.position, "Move finished");
            return;
        }
    }
}
