//! Shared fixtures for service integration tests

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::Arc;
use std::time::Duration;

use meter_modbus::mock::MockTransport;
use meter_modbus::{Quantity, SerialConfig, Transport};
use metersrv::{DeviceStatus, MeterService, PollerOptions, Subscription};

pub const SLAVE: u8 = 1;
pub const WAIT: Duration = Duration::from_secs(5);

/// Millisecond timings so a cycle completes in a few ms
pub fn fast_options(period_ms: u64) -> PollerOptions {
    PollerOptions {
        period_ms,
        full_read_every: 10,
        max_retries: 3,
        backoff_step_ms: 1,
        settle_ms: 1,
        segment_timeout_ms: 5,
        max_segments: 2,
        segment_pause_ms: 1,
        drain_attempts: 2,
        drain_timeout_ms: 1,
        failure_streak_threshold: 3,
    }
}

/// A meter reporting typical single-phase values
pub fn healthy_meter() -> Arc<MockTransport> {
    let mock = Arc::new(MockTransport::new(SLAVE));
    mock.set_quantity(Quantity::Voltage, 230.1);
    mock.set_quantity(Quantity::Current, 4.25);
    mock.set_quantity(Quantity::ActivePower, 950.0);
    mock.set_quantity(Quantity::ReactivePower, 120.0);
    mock.set_quantity(Quantity::ApparentPower, 975.5);
    mock.set_quantity(Quantity::PowerFactor, 0.97);
    mock.set_quantity(Quantity::Frequency, 50.02);
    mock.set_quantity(Quantity::ActiveEnergy, 1234.5);
    mock
}

pub fn service_for(mock: &Arc<MockTransport>, options: PollerOptions) -> MeterService {
    let mock = Arc::clone(mock);
    MeterService::with_transport_factory(
        SerialConfig::new("/dev/ttyMOCK0", SLAVE),
        options,
        Arc::new(move || Arc::clone(&mock) as Arc<dyn Transport>),
    )
}

pub async fn next<T>(sub: &mut Subscription<T>) -> T {
    tokio::time::timeout(WAIT, sub.recv())
        .await
        .expect("timed out waiting for subscription")
        .expect("subscription closed")
}

/// Skip status events until one matches
pub async fn wait_status(
    sub: &mut Subscription<DeviceStatus>,
    pred: impl Fn(&DeviceStatus) -> bool,
) -> DeviceStatus {
    loop {
        let status = next(sub).await;
        if pred(&status) {
            return status;
        }
    }
}

/// Requests addressed to `start`
pub fn requests_for(mock: &MockTransport, start: u16) -> usize {
    let [hi, lo] = start.to_be_bytes();
    mock.requests()
        .iter()
        .filter(|r| r.len() >= 4 && r[2] == hi && r[3] == lo)
        .count()
}
