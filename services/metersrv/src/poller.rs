//! Acquisition loop
//!
//! ```text
//! start ──► immediate full read ──► tick ──► tick ──► ... ──► stop
//!                                    │
//!                  cycle % full_read_every == 0 ? electrical + energy
//!                                                : electrical only (energy carried)
//! ```
//!
//! One register read is: comm lock, drain stale bytes, write request, settle,
//! segmented reads until the expected length, parse. Each block gets
//! `max_retries` attempts with a linear backoff in between.

use std::sync::Arc;

use chrono::Utc;
use errors::{MeterError, MeterErrorTrait};
use meter_modbus::{
    apply_range_filter, build_read_frame, decode, expected_response_len, parse_response,
    ModbusError, Quantity, RawRegisters, Reading, RegisterBlock, Transport, ELECTRICAL_BLOCK,
    ENERGY_BLOCK, MIN_RESPONSE_LEN, MODBUS_RESPONSE_BUFFER_SIZE,
};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollerOptions;
use crate::hub::SubscriptionHub;
use crate::status::StatusTracker;

/// Where accepted readings go
#[derive(Debug, Clone)]
pub struct ReadingSinks {
    pub readings: Arc<SubscriptionHub<Reading>>,
    pub latest: Arc<RwLock<Option<Reading>>>,
    pub status: Arc<StatusTracker>,
}

impl ReadingSinks {
    pub fn new() -> Self {
        Self {
            readings: Arc::new(SubscriptionHub::new("readings")),
            latest: Arc::new(RwLock::new(None)),
            status: Arc::new(StatusTracker::new()),
        }
    }
}

impl Default for ReadingSinks {
    fn default() -> Self {
        Self::new()
    }
}

/// What a cycle reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    /// Electrical block plus energy block
    Full,
    /// Electrical block only; energy carried from the last full read
    ElectricalOnly,
}

impl CycleKind {
    /// Cadence for tick `counter` (1-based)
    pub fn for_tick(counter: u64, full_read_every: u64) -> Self {
        if full_read_every != 0 && counter % full_read_every == 0 {
            CycleKind::Full
        } else {
            CycleKind::ElectricalOnly
        }
    }
}

/// Accept a reading only if it looks like the device actually answered
///
/// An all-zero reading usually means a transient non-response rather than a
/// genuinely dead line. Energy alone is enough (standby).
pub fn passes_integrity_check(reading: &Reading) -> bool {
    reading.voltage > 0.0
        || reading.frequency > 0.0
        || reading.current > 0.0
        || reading.active_power > 0.0
        || reading.active_energy > 0.0
}

#[derive(Debug, Default)]
struct PollerState {
    token: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

/// Periodic reader for one slave on one transport
#[derive(Debug)]
pub struct Poller {
    link: Arc<Link>,
    sinks: ReadingSinks,
    state: Mutex<PollerState>,
}

impl Poller {
    pub fn new(
        transport: Arc<dyn Transport>,
        slave_id: u8,
        options: PollerOptions,
        sinks: ReadingSinks,
    ) -> Self {
        Self {
            link: Arc::new(Link {
                transport,
                slave_id,
                options,
                comm_lock: tokio::sync::Mutex::new(()),
            }),
            sinks,
            state: Mutex::new(PollerState::default()),
        }
    }

    /// Idle → Running
    pub fn start(&self) -> Result<(), MeterError> {
        let mut state = self.state.lock();
        if state.token.is_some() {
            return Err(MeterError::AlreadyRunning);
        }
        self.link.options.validate()?;

        let token = CancellationToken::new();
        let worker = Worker {
            link: Arc::clone(&self.link),
            sinks: self.sinks.clone(),
            token: token.clone(),
            energy: None,
            failure_streak: 0,
            last_error: None,
        };
        state.task = Some(tokio::spawn(worker.run()));
        state.token = Some(token);

        info!(
            "Poller started: slave {} every {}ms",
            self.link.slave_id, self.link.options.period_ms
        );
        Ok(())
    }

    /// Running → Idle; no-op when idle
    ///
    /// The worker notices at its next wait point. Returns the task handle so
    /// the caller can wait for it to finish.
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        let mut state = self.state.lock();
        let token = state.token.take()?;
        token.cancel();
        info!("Poller stopped: slave {}", self.link.slave_id);
        state.task.take()
    }

    /// Stop and wait for the worker to exit
    pub async fn stop_and_wait(&self) {
        if let Some(task) = self.stop() {
            if let Err(e) = task.await {
                warn!("Poller task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().token.is_some()
    }

    /// Most recent accepted reading, without touching the transport
    pub fn current_reading(&self) -> Option<Reading> {
        *self.sinks.latest.read()
    }

    /// Read one block outside the loop (shares the comm lock)
    pub async fn read_block(&self, block: RegisterBlock) -> Result<Vec<u8>, ModbusError> {
        self.link.read_registers(block, None).await
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(token) = self.state.get_mut().token.take() {
            token.cancel();
        }
    }
}

/// Transport plus the request/response discipline
#[derive(Debug)]
struct Link {
    transport: Arc<dyn Transport>,
    slave_id: u8,
    options: PollerOptions,
    comm_lock: tokio::sync::Mutex<()>,
}

impl Link {
    /// Sleep unless cancelled; false when cancelled
    async fn pause(token: Option<&CancellationToken>, duration: std::time::Duration) -> bool {
        match token {
            Some(token) => tokio::select! {
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(duration) => true,
            },
            None => {
                tokio::time::sleep(duration).await;
                true
            },
        }
    }

    /// Attempt a block up to `max_retries` times
    async fn read_with_retry(
        &self,
        block: RegisterBlock,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, ModbusError> {
        let max_retries = self.options.max_retries.max(1);
        let mut last_error = ModbusError::NoResponse(self.slave_id);

        for attempt in 0..max_retries {
            match self.read_registers(block, Some(token)).await {
                Ok(data) if data.len() >= block.byte_len() => return Ok(data),
                Ok(data) => {
                    last_error = ModbusError::ShortPayload {
                        expected: block.byte_len(),
                        actual: data.len(),
                    };
                },
                Err(e) => last_error = e,
            }

            debug!(
                "Read 0x{:04X}x{} attempt {}/{} failed: {}",
                block.start,
                block.quantity,
                attempt + 1,
                max_retries,
                last_error
            );

            if !last_error.is_retryable() {
                break;
            }
            if attempt + 1 < max_retries && !Self::pause(Some(token), self.options.backoff(attempt)).await {
                break;
            }
        }

        Err(last_error)
    }

    /// One request/response exchange under the comm lock
    async fn read_registers(
        &self,
        block: RegisterBlock,
        token: Option<&CancellationToken>,
    ) -> Result<Vec<u8>, ModbusError> {
        let _guard = self.comm_lock.lock().await;

        if !self.transport.is_open().await {
            return Err(ModbusError::NotOpen);
        }

        self.drain().await;

        let request = build_read_frame(self.slave_id, block.start, block.quantity);
        self.transport.write(&request).await?;

        if !Self::pause(token, self.options.settle()).await {
            return Err(ModbusError::timeout("cancelled while waiting for response"));
        }

        let response = self
            .read_complete_response(expected_response_len(block.quantity), token)
            .await
            .ok_or(ModbusError::NoResponse(self.slave_id))?;

        let frame = parse_response(&response)?;
        Ok(frame.data)
    }

    /// Discard bytes left over from an abandoned exchange
    async fn drain(&self) {
        let mut buffer = [0u8; MODBUS_RESPONSE_BUFFER_SIZE];
        for _ in 0..self.options.drain_attempts {
            match self
                .transport
                .read_with_timeout(&mut buffer, self.options.drain_timeout())
                .await
            {
                Ok(n) if n > 0 => debug!("Drained {} stale bytes", n),
                _ => break,
            }
        }
    }

    /// Accumulate segments until `expected_len`; None if fewer than a minimal frame arrived
    async fn read_complete_response(
        &self,
        expected_len: usize,
        token: Option<&CancellationToken>,
    ) -> Option<Vec<u8>> {
        let mut buffer = vec![0u8; MODBUS_RESPONSE_BUFFER_SIZE];
        let mut total = 0usize;

        for _ in 0..self.options.max_segments {
            if total >= buffer.len() {
                break;
            }
            match self
                .transport
                .read_with_timeout(&mut buffer[total..], self.options.segment_timeout())
                .await
            {
                Ok(n) => total += n,
                // Timeout or error: stop with whatever arrived
                Err(_) => break,
            }

            if total >= expected_len {
                break;
            }
            if total > 0 && !Self::pause(token, self.options.segment_pause()).await {
                break;
            }
        }

        if total < MIN_RESPONSE_LEN {
            return None;
        }
        buffer.truncate(total);
        Some(buffer)
    }
}

/// State owned by the spawned loop
struct Worker {
    link: Arc<Link>,
    sinks: ReadingSinks,
    token: CancellationToken,
    /// Last energy value read from the device
    energy: Option<f32>,
    failure_streak: u32,
    last_error: Option<String>,
}

impl Worker {
    async fn run(mut self) {
        let period = self.link.options.period();
        let full_every = self.link.options.full_read_every;

        // First reading without waiting a full period
        self.cycle(CycleKind::Full, 0).await;

        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut counter: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = interval.tick() => {},
            }

            counter += 1;
            self.cycle(CycleKind::for_tick(counter, full_every), counter)
                .await;
        }

        debug!("Poller loop exited: slave {}", self.link.slave_id);
    }

    async fn cycle(&mut self, kind: CycleKind, counter: u64) {
        if self.token.is_cancelled() {
            return;
        }

        match self.acquire(kind).await {
            Some(reading) => {
                if kind == CycleKind::Full {
                    info!(
                        "Cycle {}: U={:.1}V I={:.3}A P={:.1}W f={:.1}Hz E={:.3}kWh",
                        counter,
                        reading.voltage,
                        reading.current,
                        reading.active_power,
                        reading.frequency,
                        reading.active_energy
                    );
                }
                self.publish(reading);
            },
            None => self.record_failure(),
        }
    }

    /// Read, decode, filter and validate; None if nothing usable came back
    async fn acquire(&mut self, kind: CycleKind) -> Option<Reading> {
        let mut raw = RawRegisters::new();

        let electrical = self
            .link
            .read_with_retry(ELECTRICAL_BLOCK, &self.token)
            .await;
        match electrical {
            Ok(payload) => raw.fill_from_block(ELECTRICAL_BLOCK, &payload),
            Err(e) => {
                warn!("Electrical block read failed: {}", e);
                self.last_error = Some(e.to_string());
                if kind == CycleKind::ElectricalOnly {
                    return None;
                }
            },
        }

        if kind == CycleKind::Full && !self.token.is_cancelled() {
            match self.link.read_with_retry(ENERGY_BLOCK, &self.token).await {
                Ok(payload) => raw.fill_from_block(ENERGY_BLOCK, &payload),
                Err(e) => {
                    warn!("Energy block read failed: {}", e);
                    self.last_error = Some(e.to_string());
                },
            }
        }

        if raw.is_empty() {
            return None;
        }

        let mut reading = decode(&raw);
        reading.timestamp = Utc::now();

        match raw.get(Quantity::ActiveEnergy) {
            Some(_) => self.energy = Some(reading.active_energy),
            None => reading.active_energy = self.energy.unwrap_or(0.0),
        }

        apply_range_filter(&mut reading);

        if !passes_integrity_check(&reading) {
            debug!("Reading discarded by integrity check");
            self.last_error = Some("device returned an all-zero reading".to_string());
            return None;
        }

        Some(reading)
    }

    fn publish(&mut self, reading: Reading) {
        *self.sinks.latest.write() = Some(reading);
        self.sinks.status.touch(reading.timestamp);
        let delivered = self.sinks.readings.broadcast(&reading);
        debug!("Reading delivered to {} subscribers", delivered);

        if self.failure_streak >= self.link.options.failure_streak_threshold {
            self.sinks.status.set_error(None);
        }
        self.failure_streak = 0;
        self.last_error = None;
    }

    fn record_failure(&mut self) {
        if self.token.is_cancelled() {
            return;
        }
        self.failure_streak = self.failure_streak.saturating_add(1);
        let threshold = self.link.options.failure_streak_threshold;
        if threshold > 0 && self.failure_streak == threshold {
            let cause = self
                .last_error
                .as_deref()
                .unwrap_or("no response from device");
            self.sinks.status.set_error(Some(format!(
                "no valid reading for {} consecutive cycles: {}",
                self.failure_streak, cause
            )));
        }
    }
}
