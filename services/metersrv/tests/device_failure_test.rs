//! Device Failure Tests
//!
//! Silent devices, exception responses, bad configuration and open errors,
//! and how each surfaces through `DeviceStatus`.

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::sync::Arc;

use common::*;
use errors::MeterError;
use meter_modbus::mock::MockTransport;
use meter_modbus::{Quantity, SerialConfig, Transport};
use metersrv::MeterService;

#[tokio::test]
async fn test_failure_streak_sets_and_clears_status_error() {
    let mock = healthy_meter();
    mock.set_responding(false);
    let service = service_for(&mock, fast_options(10));
    let mut status = service.subscribe_status("ui");
    let mut readings = service.subscribe("ui");

    service.start().await.unwrap();
    let degraded = wait_status(&mut status, |s| s.error_message.is_some()).await;
    assert!(degraded.connected);
    let message = degraded.error_message.unwrap();
    assert!(message.contains("3 consecutive cycles"), "{message}");
    assert!(service.current_reading().is_none());

    mock.set_responding(true);
    let recovered = wait_status(&mut status, |s| s.error_message.is_none()).await;
    assert!(recovered.connected);
    assert_eq!(next(&mut readings).await.voltage, 230.1);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_exception_response_is_reported() {
    let mock = healthy_meter();
    mock.set_exception(Some(0x02));
    let service = service_for(&mock, fast_options(10));
    let mut status = service.subscribe_status("ui");

    service.start().await.unwrap();
    let degraded = wait_status(&mut status, |s| s.error_message.is_some()).await;
    let message = degraded.error_message.unwrap();
    assert!(message.contains("0x02"), "{message}");

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_all_zero_device_produces_no_readings() {
    // Registers default to zero
    let mock = Arc::new(MockTransport::new(SLAVE));
    let service = service_for(&mock, fast_options(10));
    let mut readings = service.subscribe("ui");
    let mut status = service.subscribe_status("ui");

    service.start().await.unwrap();
    let degraded = wait_status(&mut status, |s| s.error_message.is_some()).await;
    assert!(degraded.error_message.unwrap().contains("all-zero"));
    assert!(readings.try_recv().is_none());

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_standby_meter_with_only_energy_is_accepted() {
    let mock = Arc::new(MockTransport::new(SLAVE));
    mock.set_quantity(Quantity::ActiveEnergy, 88.0);
    let service = service_for(&mock, fast_options(60_000));
    let mut readings = service.subscribe("ui");

    service.start().await.unwrap();
    let reading = next(&mut readings).await;
    assert_eq!(reading.voltage, 0.0);
    assert_eq!(reading.active_energy, 88.0);

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_sentinel_values_are_zeroed() {
    let mock = healthy_meter();
    mock.set_quantity(Quantity::ReactivePower, -99_999.0);
    mock.set_quantity(Quantity::PowerFactor, f32::NAN);
    let service = service_for(&mock, fast_options(60_000));
    let mut readings = service.subscribe("ui");

    service.start().await.unwrap();
    let reading = next(&mut readings).await;
    assert_eq!(reading.reactive_power, 0.0);
    assert_eq!(reading.power_factor, 0.0);
    assert_eq!(reading.voltage, 230.1);

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_invalid_slave_is_fatal_to_start() {
    let mock = healthy_meter();
    let service = MeterService::with_transport_factory(
        SerialConfig::new("/dev/ttyMOCK0", 0),
        fast_options(10),
        {
            let mock = Arc::clone(&mock);
            Arc::new(move || Arc::clone(&mock) as Arc<dyn Transport>)
        },
    );
    let mut status = service.subscribe_status("ui");

    let err = service.start().await.unwrap_err();
    assert!(matches!(err, MeterError::InvalidConfig { ref field, .. } if field == "slave_id"));
    assert!(!service.is_running().await);
    assert!(!mock.is_open().await);

    let reported = next(&mut status).await;
    assert!(!reported.connected);
    assert!(reported.error_message.is_some());
}

#[tokio::test]
async fn test_zero_period_is_rejected_before_open() {
    let mock = healthy_meter();
    let service = service_for(&mock, fast_options(0));
    let mut status = service.subscribe_status("ui");

    let err = service.start().await.unwrap_err();
    assert!(matches!(err, MeterError::InvalidConfig { ref field, .. } if field == "poller.period_ms"));
    assert!(!service.is_running().await);
    assert!(!mock.is_open().await);
    assert_eq!(mock.request_count(), 0);

    let reported = next(&mut status).await;
    assert!(!reported.connected);
    assert!(reported.error_message.unwrap().contains("period_ms"));
}

#[tokio::test]
async fn test_open_error_leaves_service_idle() {
    let mock = healthy_meter();
    mock.set_open_error(Some("serial port /dev/ttyMOCK0 is busy or access was denied".into()));
    let service = service_for(&mock, fast_options(10));

    let err = service.start().await.unwrap_err();
    assert!(matches!(err, MeterError::ConnectionFailed { .. }));
    assert!(!service.is_running().await);
    assert!(service
        .status()
        .error_message
        .unwrap()
        .contains("busy or access was denied"));

    // A later start succeeds once the port is free
    mock.set_open_error(None);
    let mut readings = service.subscribe("ui");
    service.start().await.unwrap();
    next(&mut readings).await;
    assert!(service.status().error_message.is_none());
    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_probe_against_silent_device() {
    let mock = healthy_meter();
    mock.set_responding(false);
    let service = service_for(&mock, fast_options(10));

    assert!(service.probe().await.is_err());
    assert!(!mock.is_open().await);

    mock.set_responding(true);
    assert_eq!(service.probe().await.unwrap(), "Modbus RTU");

    // Probing is refused while polling
    service.start().await.unwrap();
    assert!(matches!(
        service.probe().await,
        Err(MeterError::AlreadyRunning)
    ));
    service.stop().await.unwrap();
}
