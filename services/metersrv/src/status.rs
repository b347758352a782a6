//! Device status tracking

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::hub::{Subscription, SubscriptionHub};

/// Protocol label reported for the link
pub const PROTOCOL_LABEL: &str = "Modbus RTU";

/// Link status snapshot handed to consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    /// Transport open and acquisition running
    pub connected: bool,
    pub protocol: String,
    pub last_update: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            connected: false,
            protocol: PROTOCOL_LABEL.to_string(),
            last_update: Utc::now(),
            error_message: None,
        }
    }
}

/// Owns the current [`DeviceStatus`] and announces transitions
#[derive(Debug)]
pub struct StatusTracker {
    status: RwLock<DeviceStatus>,
    hub: SubscriptionHub<DeviceStatus>,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(DeviceStatus::default()),
            hub: SubscriptionHub::new("status"),
        }
    }

    pub fn snapshot(&self) -> DeviceStatus {
        self.status.read().clone()
    }

    pub fn subscribe(&self, id: impl Into<String>) -> Subscription<DeviceStatus> {
        self.hub.subscribe(id)
    }

    pub fn unsubscribe(&self, id: &str) -> bool {
        self.hub.unsubscribe(id)
    }

    pub fn close_subscriptions(&self) {
        self.hub.clear();
    }

    /// Connect/disconnect transition; always announced
    pub fn set_connected(&self, connected: bool, error_message: Option<String>) {
        let snapshot = {
            let mut status = self.status.write();
            status.connected = connected;
            status.error_message = error_message;
            status.last_update = Utc::now();
            status.clone()
        };
        info!(
            "Device status: connected={} error={:?}",
            snapshot.connected, snapshot.error_message
        );
        self.hub.broadcast(&snapshot);
    }

    /// Set or clear the error message; announced only when it changes
    pub fn set_error(&self, error_message: Option<String>) -> bool {
        let snapshot = {
            let mut status = self.status.write();
            if status.error_message == error_message {
                return false;
            }
            status.error_message = error_message;
            status.clone()
        };
        match &snapshot.error_message {
            Some(msg) => warn!("Device degraded: {}", msg),
            None => info!("Device recovered"),
        }
        self.hub.broadcast(&snapshot);
        true
    }

    /// Record a fresh reading time; not announced
    pub fn touch(&self, at: DateTime<Utc>) {
        self.status.write().last_update = at;
    }
}
