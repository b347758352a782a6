//! RTU frame codec
//!
//! Builds FC03 read requests and validates responses. Pure and stateless.

use crate::constants::{EXCEPTION_FLAG, FUNCTION_READ_HOLDING_REGISTERS, MIN_RESPONSE_LEN};
use crate::error::{ModbusError, Result};

/// A parsed RTU response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub slave_id: u8,
    pub function: u8,
    /// Register payload, or the single exception code byte
    pub data: Vec<u8>,
    /// CRC as transmitted (low byte first on the wire)
    pub crc: u16,
}

impl Frame {
    pub fn is_exception(&self) -> bool {
        self.function & EXCEPTION_FLAG != 0
    }

    /// Exception code for exception frames
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.data.first().copied()
        } else {
            None
        }
    }
}

/// Calculate CRC16 checksum (Modbus RTU standard)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Build an 8-byte FC03 request
///
/// The caller keeps `quantity` within [`crate::MODBUS_MAX_READ_REGISTERS`].
pub fn build_read_frame(slave_id: u8, start: u16, quantity: u16) -> [u8; 8] {
    let mut frame = [0u8; 8];
    frame[0] = slave_id;
    frame[1] = FUNCTION_READ_HOLDING_REGISTERS;
    frame[2..4].copy_from_slice(&start.to_be_bytes());
    frame[4..6].copy_from_slice(&quantity.to_be_bytes());
    let crc = crc16(&frame[..6]);
    frame[6..8].copy_from_slice(&crc.to_le_bytes());
    frame
}

/// Total RTU length of a normal FC03 response carrying `quantity` registers
pub fn expected_response_len(quantity: u16) -> usize {
    MIN_RESPONSE_LEN + usize::from(quantity) * 2
}

/// Parse and validate a response
///
/// Exception responses are CRC-checked like any other frame and then reported
/// as [`ModbusError::Exception`], which still carries the parsed frame.
pub fn parse_response(bytes: &[u8]) -> Result<Frame> {
    if bytes.len() < MIN_RESPONSE_LEN {
        return Err(ModbusError::FrameTooShort {
            actual: bytes.len(),
            needed: MIN_RESPONSE_LEN,
        });
    }

    let slave_id = bytes[0];
    let function = bytes[1];

    if function & EXCEPTION_FLAG != 0 {
        let code = bytes[2];
        let crc = verify_crc(bytes, 3)?;
        let frame = Frame {
            slave_id,
            function,
            data: vec![code],
            crc,
        };
        return Err(ModbusError::Exception { frame, code });
    }

    let byte_count = usize::from(bytes[2]);
    let body_len = 3 + byte_count;
    if bytes.len() < body_len + 2 {
        return Err(ModbusError::FrameTooShort {
            actual: bytes.len(),
            needed: body_len + 2,
        });
    }

    let crc = verify_crc(bytes, body_len)?;

    Ok(Frame {
        slave_id,
        function,
        data: bytes[3..body_len].to_vec(),
        crc,
    })
}

/// Check the little-endian CRC that follows `bytes[..body_len]`
fn verify_crc(bytes: &[u8], body_len: usize) -> Result<u16> {
    let received = u16::from_le_bytes([bytes[body_len], bytes[body_len + 1]]);
    let computed = crc16(&bytes[..body_len]);
    if received != computed {
        return Err(ModbusError::CrcMismatch {
            expected: computed,
            actual: received,
        });
    }
    Ok(received)
}

/// Get exception description
pub fn exception_description(exception_code: u8) -> &'static str {
    match exception_code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x07 => "Negative Acknowledge",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}
