//! Half-duplex serial channel
//!
//! The [`Transport`] trait is the seam between the poller and the wire. The
//! production implementation wraps a `tokio-serial` stream, tests use
//! [`crate::mock::MockTransport`].

use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info};

use crate::config::SerialConfig;
use crate::error::{ModbusError, Result};

/// Serial channel contract
///
/// Implementations serialize access internally.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn open(&self, config: &SerialConfig) -> Result<()>;

    /// Closing a closed transport is a no-op
    async fn close(&self) -> Result<()>;

    async fn write(&self, data: &[u8]) -> Result<usize>;

    /// Read whatever arrives within `duration`
    ///
    /// Returns [`ModbusError::Timeout`] when nothing arrived.
    async fn read_with_timeout(&self, buf: &mut [u8], duration: Duration) -> Result<usize>;

    async fn is_open(&self) -> bool;
}

/// `tokio-serial` backed transport
#[derive(Debug, Default)]
pub struct SerialTransport {
    port: Mutex<Option<SerialStream>>,
}

impl SerialTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Turn an open failure into a message that says what went wrong
fn describe_open_error(port: &str, err: &tokio_serial::Error) -> String {
    match err.kind() {
        tokio_serial::ErrorKind::NoDevice => format!("serial port {port} not found"),
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
            format!("serial port {port} not found")
        },
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            format!("serial port {port} is busy or access was denied")
        },
        _ if err.description.to_ascii_lowercase().contains("busy") => {
            format!("serial port {port} is busy")
        },
        _ => format!("failed to open serial port {port}: {err}"),
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&self, config: &SerialConfig) -> Result<()> {
        let mut guard = self.port.lock().await;
        if guard.is_some() {
            return Err(ModbusError::AlreadyOpen);
        }

        debug!("RTU: {} @{}baud", config.port, config.baud_rate);

        match tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(config.tokio_data_bits())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .open_native_async()
        {
            Ok(stream) => {
                info!("RTU opened: {}", config.port);
                *guard = Some(stream);
                Ok(())
            },
            Err(e) => {
                error!("RTU err: {} - {}", config.port, e);
                Err(ModbusError::connection(describe_open_error(&config.port, &e)))
            },
        }
    }

    async fn close(&self) -> Result<()> {
        if self.port.lock().await.take().is_some() {
            debug!("RTU closed");
        }
        Ok(())
    }

    async fn write(&self, data: &[u8]) -> Result<usize> {
        let mut guard = self.port.lock().await;
        let port = guard.as_mut().ok_or(ModbusError::NotOpen)?;

        port.write_all(data).await.map_err(|e| {
            error!("RTU TX: {}", e);
            ModbusError::io(format!("Serial send error: {e}"))
        })?;
        port.flush().await.map_err(|e| {
            error!("RTU flush: {}", e);
            ModbusError::io(format!("Serial flush error: {e}"))
        })?;
        debug!("RTU TX: {}B", data.len());
        Ok(data.len())
    }

    async fn read_with_timeout(&self, buf: &mut [u8], duration: Duration) -> Result<usize> {
        let mut guard = self.port.lock().await;
        let port = guard.as_mut().ok_or(ModbusError::NotOpen)?;

        match timeout(duration, port.read(buf)).await {
            Ok(Ok(0)) => Err(ModbusError::timeout("serial read returned no data")),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(ModbusError::from(e)),
            Err(_) => Err(ModbusError::timeout(format!(
                "no data within {}ms",
                duration.as_millis()
            ))),
        }
    }

    async fn is_open(&self) -> bool {
        self.port.lock().await.is_some()
    }
}

/// Enumerate serial ports known to the OS
pub fn available_ports() -> Result<Vec<String>> {
    tokio_serial::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .map_err(|e| ModbusError::io(format!("failed to enumerate serial ports: {e}")))
}
