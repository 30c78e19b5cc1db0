//! Byte-oriented transport abstraction.
//!
//! The controller only ever writes whole 5-byte frames and never reads, so a
//! transport is little more than "write these bytes completely, then flush".
//! Blocking drivers use [`Transport`], async drivers use [`AsyncTransport`].
//!
//! Concrete serial implementations live in the driver crate. The [`mock`]
//! module provides an in-memory recorder for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::ScreenResult;

// =============================================================================
// Traits
// =============================================================================

/// Blocking frame sink.
pub trait Transport: Send {
    /// Write the whole frame and flush it to the wire.
    fn write_frame(&mut self, frame: &[u8]) -> ScreenResult<()>;

    /// Release the underlying port. Later writes may fail.
    fn close(&mut self) -> ScreenResult<()> {
        Ok(())
    }
}

/// Async frame sink.
#[async_trait]
pub trait AsyncTransport: Send {
    /// Write the whole frame and flush it to the wire.
    async fn write_frame(&mut self, frame: &[u8]) -> ScreenResult<()>;

    /// Release the underlying port. Later writes may fail.
    async fn close(&mut self) -> ScreenResult<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_frame(&mut self, frame: &[u8]) -> ScreenResult<()> {
        (**self).write_frame(frame)
    }

    fn close(&mut self) -> ScreenResult<()> {
        (**self).close()
    }
}

#[async_trait]
impl<T: AsyncTransport + ?Sized> AsyncTransport for Box<T> {
    async fn write_frame(&mut self, frame: &[u8]) -> ScreenResult<()> {
        (**self).write_frame(frame).await
    }

    async fn close(&mut self) -> ScreenResult<()> {
        (**self).close().await
    }
}

/// Type-erased blocking transport.
pub type DynTransport = Box<dyn Transport>;

/// Blocking transport shared by several screens on one bus.
pub type SharedTransport = Arc<Mutex<DynTransport>>;

impl Transport for SharedTransport {
    fn write_frame(&mut self, frame: &[u8]) -> ScreenResult<()> {
        self.lock().write_frame(frame)
    }

    fn close(&mut self) -> ScreenResult<()> {
        // Other screens may still be using the bus.
        Ok(())
    }
}

/// Wrap a transport so it can be handed to several drivers.
pub fn share(transport: DynTransport) -> SharedTransport {
    Arc::new(Mutex::new(transport))
}

// =============================================================================
// Mock
// =============================================================================

pub mod mock {
    //! In-memory transport recording every frame written.
    //!
    //! ```rust,ignore
    //! let transport = RecordingTransport::new();
    //! let frames = transport.frames_handle();
    //! let screen = BlockingScreenDriver::new(Box::new(transport), config)?;
    //! screen.stop()?;
    //! assert_eq!(frames.lock()[0], vec![0xFF, 0xAA, 0xEE, 0xEE, 0xCC]);
    //! ```

    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Frames recorded so far, shared with the test.
    pub type FrameLog = Arc<Mutex<Vec<Vec<u8>>>>;

    /// Transport that stores frames instead of writing them.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingTransport {
        frames: FrameLog,
        fail: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    }

    impl RecordingTransport {
        /// Create an empty recorder.
        pub fn new() -> Self {
            Self::default()
        }

        /// Handle to the frame log that stays valid after the transport moved
        /// into a driver.
        pub fn frames_handle(&self) -> FrameLog {
            self.frames.clone()
        }

        /// Copy of every frame written so far.
        pub fn frames(&self) -> Vec<Vec<u8>> {
            self.frames.lock().clone()
        }

        /// Make subsequent writes fail with `BrokenPipe`.
        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        /// Whether `close` was called.
        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn record(&self, frame: &[u8]) -> ScreenResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock transport failure").into());
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "mock transport closed").into());
            }
            self.frames.lock().push(frame.to_vec());
            Ok(())
        }
    }

    impl Transport for RecordingTransport {
        fn write_frame(&mut self, frame: &[u8]) -> ScreenResult<()> {
            self.record(frame)
        }

        fn close(&mut self) -> ScreenResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl AsyncTransport for RecordingTransport {
        async fn write_frame(&mut self, frame: &[u8]) -> ScreenResult<()> {
            self.record(frame)
        }

        async fn close(&mut self) -> ScreenResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}
