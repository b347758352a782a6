//! Scripted in-memory meter
//!
//! [`MockTransport`] answers FC03 requests from a register table, the way a
//! real slave on the bus would. Knobs let tests silence the device, inject
//! exceptions or raw frames, and break the write path.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::config::SerialConfig;
use crate::constants::{EXCEPTION_FLAG, FUNCTION_READ_HOLDING_REGISTERS, READ_REQUEST_LEN};
use crate::error::{ModbusError, Result};
use crate::frame::crc16;
use crate::registers::Quantity;
use crate::transport::Transport;

#[derive(Debug)]
struct MockState {
    open: bool,
    slave_id: u8,
    registers: HashMap<u16, u16>,
    rx: VecDeque<u8>,
    responding: bool,
    exception: Option<u8>,
    scripted: VecDeque<Vec<u8>>,
    fail_writes: bool,
    open_error: Option<String>,
    chunk_size: usize,
    requests: Vec<Vec<u8>>,
}

/// In-memory slave device implementing [`Transport`]
#[derive(Debug)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    /// A responsive meter at `slave_id` with all registers zero
    pub fn new(slave_id: u8) -> Self {
        Self {
            state: Mutex::new(MockState {
                open: false,
                slave_id,
                registers: HashMap::new(),
                rx: VecDeque::new(),
                responding: true,
                exception: None,
                scripted: VecDeque::new(),
                fail_writes: false,
                open_error: None,
                chunk_size: usize::MAX,
                requests: Vec::new(),
            }),
        }
    }

    /// Store a float32 across two registers, high register first
    pub fn set_float(&self, address: u16, value: f32) {
        let bytes = value.to_be_bytes();
        let mut state = self.state.lock();
        state
            .registers
            .insert(address, u16::from_be_bytes([bytes[0], bytes[1]]));
        state
            .registers
            .insert(address + 1, u16::from_be_bytes([bytes[2], bytes[3]]));
    }

    pub fn set_quantity(&self, quantity: Quantity, value: f32) {
        self.set_float(quantity.address(), value);
    }

    /// A silent device never answers
    pub fn set_responding(&self, responding: bool) {
        self.state.lock().responding = responding;
    }

    /// Answer every request with this exception code until cleared
    pub fn set_exception(&self, code: Option<u8>) {
        self.state.lock().exception = code;
    }

    /// Answer the next request with these exact bytes
    pub fn push_raw_response(&self, bytes: Vec<u8>) {
        self.state.lock().scripted.push_back(bytes);
    }

    /// Leave bytes on the line as if a previous exchange was abandoned
    pub fn inject_stale(&self, bytes: &[u8]) {
        self.state.lock().rx.extend(bytes.iter().copied());
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Make the next `open` fail with a connection error
    pub fn set_open_error(&self, message: Option<String>) {
        self.state.lock().open_error = message;
    }

    /// Deliver at most this many bytes per read
    pub fn set_chunk_size(&self, size: usize) {
        self.state.lock().chunk_size = size.max(1);
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.state.lock().requests.clone()
    }

    pub fn pending_bytes(&self) -> usize {
        self.state.lock().rx.len()
    }
}

impl MockState {
    fn respond(&self, request: &[u8]) -> Option<Vec<u8>> {
        if !self.responding || request.len() != READ_REQUEST_LEN {
            return None;
        }
        let crc = u16::from_le_bytes([request[6], request[7]]);
        if crc != crc16(&request[..6]) || request[0] != self.slave_id {
            return None;
        }

        let function = request[1];
        let mut body = vec![self.slave_id];

        if let Some(code) = self.exception {
            body.extend_from_slice(&[function | EXCEPTION_FLAG, code]);
        } else if function != FUNCTION_READ_HOLDING_REGISTERS {
            body.extend_from_slice(&[function | EXCEPTION_FLAG, 0x01]);
        } else {
            let start = u16::from_be_bytes([request[2], request[3]]);
            let quantity = u16::from_be_bytes([request[4], request[5]]);
            body.push(function);
            body.push((quantity * 2) as u8);
            for offset in 0..quantity {
                let value = self
                    .registers
                    .get(&start.wrapping_add(offset))
                    .copied()
                    .unwrap_or(0);
                body.extend_from_slice(&value.to_be_bytes());
            }
        }

        let crc = crc16(&body);
        body.extend_from_slice(&crc.to_le_bytes());
        Some(body)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _config: &SerialConfig) -> Result<()> {
        let mut state = self.state.lock();
        if state.open {
            return Err(ModbusError::AlreadyOpen);
        }
        if let Some(message) = state.open_error.clone() {
            return Err(ModbusError::connection(message));
        }
        state.open = true;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.open = false;
        state.rx.clear();
        Ok(())
    }

    async fn write(&self, data: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(ModbusError::NotOpen);
        }
        if state.fail_writes {
            return Err(ModbusError::io("simulated write failure"));
        }
        state.requests.push(data.to_vec());

        let response = match state.scripted.pop_front() {
            Some(raw) => Some(raw),
            None => state.respond(data),
        };
        if let Some(bytes) = response {
            state.rx.extend(bytes);
        }
        Ok(data.len())
    }

    async fn read_with_timeout(&self, buf: &mut [u8], duration: Duration) -> Result<usize> {
        {
            let mut state = self.state.lock();
            if !state.open {
                return Err(ModbusError::NotOpen);
            }
            if !state.rx.is_empty() {
                let n = buf.len().min(state.rx.len()).min(state.chunk_size);
                for slot in buf.iter_mut().take(n) {
                    if let Some(byte) = state.rx.pop_front() {
                        *slot = byte;
                    }
                }
                return Ok(n);
            }
        }

        tokio::time::sleep(duration).await;
        Err(ModbusError::timeout(format!(
            "no data within {}ms",
            duration.as_millis()
        )))
    }

    async fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::frame::{build_read_frame, parse_response};
    use crate::registers::parse_float32;

    async fn open_mock() -> MockTransport {
        let mock = MockTransport::new(1);
        mock.open(&SerialConfig::new("mock", 1)).await.unwrap();
        mock
    }

    #[tokio::test]
    async fn test_answers_register_reads() {
        let mock = open_mock().await;
        mock.set_quantity(Quantity::Voltage, 230.0);

        mock.write(&build_read_frame(1, 0x2000, 2)).await.unwrap();
        let mut buf = [0u8; 64];
        let n = mock
            .read_with_timeout(&mut buf, Duration::from_millis(10))
            .await
            .unwrap();

        let frame = parse_response(&buf[..n]).unwrap();
        assert_eq!(parse_float32(&frame.data), 230.0);
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test]
    async fn test_ignores_other_slaves() {
        let mock = open_mock().await;
        mock.write(&build_read_frame(9, 0x2000, 2)).await.unwrap();
        assert_eq!(mock.pending_bytes(), 0);
    }

    #[tokio::test]
    async fn test_silent_device_times_out() {
        let mock = open_mock().await;
        mock.set_responding(false);
        mock.write(&build_read_frame(1, 0x2000, 2)).await.unwrap();

        let mut buf = [0u8; 16];
        let err = mock
            .read_with_timeout(&mut buf, Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_chunked_delivery() {
        let mock = open_mock().await;
        mock.set_chunk_size(3);
        mock.write(&build_read_frame(1, 0x2000, 2)).await.unwrap();

        let mut buf = [0u8; 16];
        let n = mock
            .read_with_timeout(&mut buf, Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(mock.pending_bytes(), 6);
    }

    #[tokio::test]
    async fn test_closed_mock_rejects_writes() {
        let mock = MockTransport::new(1);
        assert_eq!(mock.write(&[0x01]).await, Err(ModbusError::NotOpen));
    }
}
