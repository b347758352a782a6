//! Link probe
//!
//! Sends one short read (two registers at 0x2000) and checks that a valid
//! Modbus RTU frame comes back.

use std::time::Duration;

use meter_modbus::{build_read_frame, parse_response, ModbusError, Transport, ELECTRICAL_BLOCK};
use tracing::debug;

use crate::status::PROTOCOL_LABEL;

const PROBE_QUANTITY: u16 = 2;
const PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Probe an open transport; returns the detected protocol label
pub async fn detect_protocol(
    transport: &dyn Transport,
    slave_id: u8,
) -> Result<&'static str, ModbusError> {
    if !transport.is_open().await {
        return Err(ModbusError::NotOpen);
    }

    let request = build_read_frame(slave_id, ELECTRICAL_BLOCK.start, PROBE_QUANTITY);
    transport.write(&request).await?;

    let mut buffer = [0u8; 256];
    let n = transport.read_with_timeout(&mut buffer, PROBE_TIMEOUT).await?;
    if n == 0 {
        return Err(ModbusError::NoResponse(slave_id));
    }

    let frame = parse_response(&buffer[..n])?;
    debug!(
        "Probe: slave {} answered with {} bytes",
        frame.slave_id,
        frame.data.len()
    );
    Ok(PROTOCOL_LABEL)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use meter_modbus::mock::MockTransport;
    use meter_modbus::SerialConfig;

    #[tokio::test]
    async fn test_probe_detects_modbus() {
        let mock = MockTransport::new(12);
        mock.open(&SerialConfig::new("mock", 12)).await.unwrap();

        assert_eq!(detect_protocol(&mock, 12).await.unwrap(), "Modbus RTU");
        let request = &mock.requests()[0];
        assert_eq!(&request[..6], &[0x0C, 0x03, 0x20, 0x00, 0x00, 0x02]);
    }

    #[tokio::test]
    async fn test_probe_wrong_slave_times_out() {
        let mock = MockTransport::new(12);
        mock.open(&SerialConfig::new("mock", 12)).await.unwrap();

        let err = detect_protocol(&mock, 3).await.unwrap_err();
        assert!(matches!(err, ModbusError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_probe_requires_open_port() {
        let mock = MockTransport::new(1);
        assert_eq!(detect_protocol(&mock, 1).await, Err(ModbusError::NotOpen));
    }
}
