//! Meter acquisition service (`metersrv`)
//!
//! Polls a single-phase meter over Modbus RTU, keeps the latest reading
//! and fans readings and device status out to named subscribers.

pub mod config;
pub mod hub;
pub mod poller;
pub mod probe;
pub mod service;
pub mod snapshot;
pub mod status;

pub use config::{MeterConfig, PollerOptions, SERVICE_NAME};
pub use hub::{Subscription, SubscriptionHub, SUBSCRIBER_QUEUE_CAPACITY};
pub use poller::{passes_integrity_check, CycleKind, Poller, ReadingSinks};
pub use probe::detect_protocol;
pub use service::{MeterService, TransportFactory};
pub use snapshot::SnapshotStore;
pub use status::{DeviceStatus, StatusTracker, PROTOCOL_LABEL};
