//! Modbus RTU constants based on official specification
//!
//! RTU ADU limit is 256 bytes: Slave Address (1) + PDU (253) + CRC (2).

// ============================================================================
// Function Codes
// ============================================================================

/// FC03 - Read Holding Registers
pub const FUNCTION_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Bit set in the response function code when the slave reports an exception
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Read request: slave(1) + fc(1) + start(2) + quantity(2) + crc(2)
pub const READ_REQUEST_LEN: usize = 8;

/// Smallest well-formed response: slave(1) + fc(1) + byte count or exception code(1) + crc(2)
pub const MIN_RESPONSE_LEN: usize = 5;

/// Response buffer size for receiving RTU frames (full ADU)
pub const MODBUS_RESPONSE_BUFFER_SIZE: usize = 256;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03/FC04
///
/// Response PDU: fc(1) + byte count(1) + N × 2 ≤ 253, so N ≤ 125.
pub const MODBUS_MAX_READ_REGISTERS: u16 = 125;

/// Highest unicast slave address on an RTU bus
pub const MAX_SLAVE_ID: u8 = 247;
