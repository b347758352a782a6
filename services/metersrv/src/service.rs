//! Acquisition controller
//!
//! Owns the serial configuration, the transport while running, the poller,
//! the subscriber hubs and the device status. This is the surface external
//! collaborators (CLI, UI bridges) talk to.

use std::sync::Arc;

use errors::{MeterError, MeterResult};
use meter_modbus::{Reading, SerialConfig, SerialTransport, Transport};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::PollerOptions;
use crate::hub::Subscription;
use crate::poller::{Poller, ReadingSinks};
use crate::probe;
use crate::status::DeviceStatus;

/// Creates a fresh transport for every start
pub type TransportFactory = Arc<dyn Fn() -> Arc<dyn Transport> + Send + Sync>;

struct Active {
    transport: Arc<dyn Transport>,
    poller: Poller,
}

struct Inner {
    config: SerialConfig,
    active: Option<Active>,
}

pub struct MeterService {
    inner: Mutex<Inner>,
    options: PollerOptions,
    factory: TransportFactory,
    sinks: ReadingSinks,
}

impl std::fmt::Debug for MeterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeterService")
            .field("options", &self.options)
            .field("status", &self.sinks.status.snapshot())
            .finish_non_exhaustive()
    }
}

impl MeterService {
    /// Service backed by real serial ports
    pub fn new(config: SerialConfig, options: PollerOptions) -> Self {
        Self::with_transport_factory(
            config,
            options,
            Arc::new(|| Arc::new(SerialTransport::new()) as Arc<dyn Transport>),
        )
    }

    pub fn with_transport_factory(
        config: SerialConfig,
        options: PollerOptions,
        factory: TransportFactory,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                config,
                active: None,
            }),
            options,
            factory,
            sinks: ReadingSinks::new(),
        }
    }

    /// Validate, open the port and begin polling
    pub async fn start(&self) -> MeterResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.active.as_ref().is_some_and(|a| a.poller.is_running()) {
            return Err(MeterError::AlreadyRunning);
        }

        if let Err(e) = inner.config.validate() {
            self.sinks.status.set_connected(false, Some(e.to_string()));
            return Err(e.into());
        }
        if let Err(e) = self.options.validate() {
            self.sinks.status.set_connected(false, Some(e.to_string()));
            return Err(e);
        }

        let config = inner.config.clone();
        info!(
            "Using config: port={} slave=0x{:02X} {}baud",
            config.port, config.slave_id, config.baud_rate
        );

        let transport = (self.factory)();
        if let Err(e) = transport.open(&config).await {
            self.sinks.status.set_connected(false, Some(e.to_string()));
            return Err(e.into());
        }

        let poller = Poller::new(
            Arc::clone(&transport),
            config.slave_id,
            self.options.clone(),
            self.sinks.clone(),
        );
        if let Err(e) = poller.start() {
            let _ = transport.close().await;
            return Err(e);
        }

        inner.active = Some(Active { transport, poller });
        self.sinks.status.set_connected(true, None);
        Ok(())
    }

    /// Stop polling and release the port; no-op when idle
    pub async fn stop(&self) -> MeterResult<()> {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await
    }

    async fn stop_locked(&self, inner: &mut Inner) -> MeterResult<()> {
        let Some(active) = inner.active.take() else {
            return Ok(());
        };

        active.poller.stop_and_wait().await;
        if let Err(e) = active.transport.close().await {
            warn!("Closing transport: {}", e);
        }
        self.sinks.status.set_connected(false, None);
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.inner
            .lock()
            .await
            .active
            .as_ref()
            .is_some_and(|a| a.poller.is_running())
    }

    /// Replace the serial configuration, stopping acquisition first
    pub async fn update_config(&self, config: SerialConfig) -> MeterResult<()> {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await?;
        info!("Serial config updated: port={} slave={}", config.port, config.slave_id);
        inner.config = config;
        Ok(())
    }

    pub async fn config(&self) -> SerialConfig {
        self.inner.lock().await.config.clone()
    }

    /// Latest accepted reading; `None` before the first one
    pub fn current_reading(&self) -> Option<Reading> {
        *self.sinks.latest.read()
    }

    pub fn status(&self) -> DeviceStatus {
        self.sinks.status.snapshot()
    }

    pub fn subscribe(&self, id: impl Into<String>) -> Subscription<Reading> {
        self.sinks.readings.subscribe(id)
    }

    pub fn subscribe_status(&self, id: impl Into<String>) -> Subscription<DeviceStatus> {
        self.sinks.status.subscribe(id)
    }

    /// Drop both the reading and the status subscription registered under `id`
    pub fn unsubscribe(&self, id: &str) {
        self.sinks.readings.unsubscribe(id);
        self.sinks.status.unsubscribe(id);
    }

    pub fn available_ports(&self) -> MeterResult<Vec<String>> {
        Ok(meter_modbus::available_ports()?)
    }

    /// One-shot link test on a temporary transport; refused while polling
    pub async fn probe(&self) -> MeterResult<&'static str> {
        let inner = self.inner.lock().await;
        if inner.active.is_some() {
            return Err(MeterError::AlreadyRunning);
        }
        inner.config.validate()?;

        let transport = (self.factory)();
        transport.open(&inner.config).await?;
        let result = probe::detect_protocol(transport.as_ref(), inner.config.slave_id).await;
        let _ = transport.close().await;
        Ok(result?)
    }

    /// Stop and close every subscription
    pub async fn shutdown(&self) -> MeterResult<()> {
        self.stop().await?;
        self.sinks.readings.clear();
        self.sinks.status.close_subscriptions();
        info!("Meter service shut down");
        Ok(())
    }
}
