//! Modbus RTU link layer for single-meter acquisition
//!
//! This library provides the protocol core used by the acquisition service:
//!
//! ```text
//! meter-modbus
//!     ├── frame      (read-request building, response parsing, CRC16)
//!     ├── transport  (half-duplex serial channel contract + tokio-serial impl)
//!     ├── registers  (register map, float32 reconstruction, range filter)
//!     ├── config     (serial line parameters)
//!     └── mock       (scripted in-memory meter for tests and demos)
//! ```
//!
//! Only function code 0x03 (read holding registers) is implemented.

mod config;
mod constants;
mod error;
mod frame;
pub mod mock;
mod registers;
mod transport;

pub use config::{Parity, SerialConfig, StopBits, DEFAULT_BAUD_RATE, DEFAULT_DATA_BITS};

pub use constants::{
    EXCEPTION_FLAG, FUNCTION_READ_HOLDING_REGISTERS, MAX_SLAVE_ID, MIN_RESPONSE_LEN,
    MODBUS_MAX_READ_REGISTERS, MODBUS_RESPONSE_BUFFER_SIZE, READ_REQUEST_LEN,
};

pub use error::{FailureKind, ModbusError, Result};

pub use frame::{
    build_read_frame, crc16, exception_description, expected_response_len, parse_response, Frame,
};

pub use registers::{
    apply_range_filter, decode, is_valid, parse_float32, Quantity, RawRegisters, Reading,
    RegisterBlock, ELECTRICAL_BLOCK, ENERGY_BLOCK, SENTINEL_FLOOR,
};

pub use transport::{available_ports, SerialTransport, Transport};
