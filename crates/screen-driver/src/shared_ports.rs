//! Shared port management for RS-485 multidrop buses.
//!
//! Several screens and lifts can hang off a single serial port, each with its
//! own address. This module keeps a process-wide registry of open async ports
//! keyed by path, so every [`ScreenDriver`](crate::ScreenDriver) on the same
//! bus writes through one port, one frame at a time.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use screen_core::{AsyncTransport, ScreenError, ScreenResult};

use crate::serial::BAUD_RATE;

// =============================================================================
// Async transports
// =============================================================================

/// Async transport over any writer.
///
/// `tokio_serial::SerialStream` in production, `tokio::io::DuplexStream` in tests.
#[derive(Debug)]
pub struct AsyncIoTransport<W: AsyncWrite + Unpin + Send> {
    writer: Option<W>,
    label: String,
}

impl<W: AsyncWrite + Unpin + Send> AsyncIoTransport<W> {
    /// Wrap a writer. `label` identifies it in log output.
    pub fn new(writer: W, label: impl Into<String>) -> Self {
        Self {
            writer: Some(writer),
            label: label.into(),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> AsyncTransport for AsyncIoTransport<W> {
    async fn write_frame(&mut self, frame: &[u8]) -> ScreenResult<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "serial port closed")
        })?;
        writer.write_all(frame).await?;
        writer.flush().await?;
        tracing::trace!(port = %self.label, bytes = frame.len(), "Frame written");
        Ok(())
    }

    async fn close(&mut self) -> ScreenResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await?;
            tracing::info!(port = %self.label, "Closed serial port");
        }
        Ok(())
    }
}

/// Dynamic async transport.
pub type DynAsyncTransport = Box<dyn AsyncTransport>;

/// Async transport shared by every screen on one bus.
pub type SharedPort = Arc<Mutex<DynAsyncTransport>>;

/// Wrap an async transport so several drivers can write through it.
pub fn wrap_shared(transport: DynAsyncTransport) -> SharedPort {
    Arc::new(Mutex::new(transport))
}

/// Handle to a [`SharedPort`] used by one driver.
///
/// Each write locks the port for the whole frame, so frames from different
/// screens never interleave.
#[derive(Clone)]
pub struct BusTransport {
    port: SharedPort,
}

impl BusTransport {
    /// Create a handle onto a shared port.
    pub fn new(port: SharedPort) -> Self {
        Self { port }
    }
}

#[async_trait]
impl AsyncTransport for BusTransport {
    async fn write_frame(&mut self, frame: &[u8]) -> ScreenResult<()> {
        let mut guard = self.port.lock().await;
        guard.write_frame(frame).await
    }

    async fn close(&mut self) -> ScreenResult<()> {
        // Other screens may still be on the bus. The port closes when the
        // registry entry and the last handle are gone.
        Ok(())
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Module-local registry for shared serial ports.
static SHARED_PORTS: OnceLock<RwLock<HashMap<String, SharedPort>>> = OnceLock::new();

fn port_registry() -> &'static RwLock<HashMap<String, SharedPort>> {
    SHARED_PORTS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Get an existing shared port if one is already open for the given path.
pub fn get_existing_port(port_path: &str) -> Option<SharedPort> {
    let registry = port_registry().read();
    registry.get(port_path).cloned()
}

/// Register a newly opened port in the shared registry.
pub fn register_port(port_path: &str, port: SharedPort) {
    let mut registry = port_registry().write();
    registry.insert(port_path.to_string(), port);
    tracing::info!(port = port_path, "Registered new screen shared port");
}

/// Remove a port from the registry and close it.
///
/// Drivers still holding the port get `NotConnected` on their next write.
/// Returns `false` if no port was registered for the path.
pub async fn close_port(port_path: &str) -> ScreenResult<bool> {
    let removed = port_registry().write().remove(port_path);
    let Some(port) = removed else {
        return Ok(false);
    };
    port.lock().await.close().await?;
    tracing::info!(port = port_path, "Closed screen shared port");
    Ok(true)
}

/// Get or create a shared port for the given path with the default timeout.
pub async fn get_or_open_port(port_path: &str) -> ScreenResult<SharedPort> {
    get_or_open_port_with_timeout(port_path, crate::serial::DEFAULT_TIMEOUT).await
}

/// Get or create a shared port for the given path with a custom timeout.
///
/// If a port is already open for this path, returns the existing connection.
/// Otherwise, opens a new port and registers it.
pub async fn get_or_open_port_with_timeout(
    port_path: &str,
    timeout: Duration,
) -> ScreenResult<SharedPort> {
    if let Some(port) = get_existing_port(port_path) {
        tracing::debug!(port = port_path, "Reusing screen shared port");
        return Ok(port);
    }

    let port_path_owned = port_path.to_string();
    let stream = tokio::task::spawn_blocking(move || open_serial_port(&port_path_owned, timeout))
        .await
        .map_err(|e| {
            ScreenError::Transport(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("spawn_blocking for serial port opening failed: {}", e),
            ))
        })??;

    let shared = wrap_shared(Box::new(AsyncIoTransport::new(stream, port_path)));

    // Another task may have opened the same path while we were blocked.
    let mut registry = port_registry().write();
    if let Some(existing) = registry.get(port_path) {
        tracing::warn!(port = port_path, "Port opened concurrently, using registered instance");
        return Ok(existing.clone());
    }
    registry.insert(port_path.to_string(), shared.clone());
    tracing::info!(port = port_path, "Registered new screen shared port");
    Ok(shared)
}

/// Open a serial port with the screen protocol settings.
fn open_serial_port(port_path: &str, timeout: Duration) -> ScreenResult<tokio_serial::SerialStream> {
    use tokio_serial::SerialPortBuilderExt;

    let port = tokio_serial::new(port_path, BAUD_RATE)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(timeout)
        .open_native_async()
        .map_err(|e| {
            let message = format!("Failed to open serial port {}: {}", port_path, e);
            ScreenError::Transport(std::io::Error::new(std::io::Error::from(e).kind(), message))
        })?;

    tracing::info!(port = port_path, timeout_ms = ?timeout.as_millis(), "Opened screen serial port");
    Ok(port)
}
