//! Serial line parameters

use serde::{Deserialize, Serialize};

use crate::constants::MAX_SLAVE_ID;
use crate::error::{ModbusError, Result};

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_DATA_BITS: u8 = 8;

/// Stop bits, stored as the integer code used by the snapshot file
/// (0 = one stop bit, 2 = two stop bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            // 1 is accepted as a human-friendly alias for one stop bit
            0 | 1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(format!("unsupported stop bits code {other}")),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(value: StopBits) -> Self {
        match value {
            StopBits::One => 0,
            StopBits::Two => 2,
        }
    }
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(value: StopBits) -> Self {
        match value {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Parity, stored as 0 = none, 1 = odd, 2 = even
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl TryFrom<u8> for Parity {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Parity::None),
            1 => Ok(Parity::Odd),
            2 => Ok(Parity::Even),
            other => Err(format!("unsupported parity code {other}")),
        }
    }
}

impl From<Parity> for u8 {
    fn from(value: Parity) -> Self {
        match value {
            Parity::None => 0,
            Parity::Odd => 1,
            Parity::Even => 2,
        }
    }
}

impl From<Parity> for tokio_serial::Parity {
    fn from(value: Parity) -> Self {
        match value {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

impl std::str::FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "odd" | "o" => Ok(Parity::Odd),
            "even" | "e" => Ok(Parity::Even),
            other => Err(format!("unknown parity '{other}'")),
        }
    }
}

/// Serial link configuration
///
/// Serialized in the camelCase shape of the persisted snapshot:
/// `{port, baudRate, dataBits, stopBits, parity, slaveID}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialConfig {
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub stop_bits: StopBits,
    #[serde(default)]
    pub parity: Parity,
    /// Zero means "unset" and is rejected by [`SerialConfig::validate`]
    #[serde(default, rename = "slaveID")]
    pub slave_id: u8,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_data_bits() -> u8 {
    DEFAULT_DATA_BITS
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DEFAULT_DATA_BITS,
            stop_bits: StopBits::One,
            parity: Parity::None,
            slave_id: 0,
        }
    }
}

impl SerialConfig {
    pub fn new(port: impl Into<String>, slave_id: u8) -> Self {
        Self {
            port: port.into(),
            slave_id,
            ..Self::default()
        }
    }

    /// Reject configurations that can never open a working link
    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(ModbusError::config("port", "serial port not configured"));
        }
        if self.slave_id == 0 || self.slave_id > MAX_SLAVE_ID {
            return Err(ModbusError::config(
                "slave_id",
                format!("{} is outside 1..={}", self.slave_id, MAX_SLAVE_ID),
            ));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ModbusError::config(
                "data_bits",
                format!("{} is outside 5..=8", self.data_bits),
            ));
        }
        if self.baud_rate == 0 {
            return Err(ModbusError::config("baud_rate", "must be non-zero"));
        }
        Ok(())
    }

    pub(crate) fn tokio_data_bits(&self) -> tokio_serial::DataBits {
        match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = SerialConfig::default();
        assert_eq!(cfg.baud_rate, 9600);
        assert_eq!(cfg.data_bits, 8);
        assert_eq!(cfg.stop_bits, StopBits::One);
        assert_eq!(cfg.parity, Parity::None);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate() {
        assert!(SerialConfig::new("/dev/ttyUSB0", 1).validate().is_ok());

        let err = SerialConfig::new("", 1).validate().unwrap_err();
        assert!(matches!(err, ModbusError::Config { field: "port", .. }));

        let err = SerialConfig::new("COM3", 0).validate().unwrap_err();
        assert!(matches!(err, ModbusError::Config { field: "slave_id", .. }));

        let err = SerialConfig::new("COM3", 248).validate().unwrap_err();
        assert!(matches!(err, ModbusError::Config { field: "slave_id", .. }));

        let mut cfg = SerialConfig::new("COM3", 1);
        cfg.data_bits = 9;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_snapshot_json_shape() {
        let mut cfg = SerialConfig::new("/dev/ttyUSB0", 12);
        cfg.stop_bits = StopBits::Two;
        cfg.parity = Parity::Even;

        let value = serde_json::to_value(&cfg).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "port": "/dev/ttyUSB0",
                "baudRate": 9600,
                "dataBits": 8,
                "stopBits": 2,
                "parity": 2,
                "slaveID": 12
            })
        );
    }

    #[test]
    fn test_rejects_unknown_codes() {
        let raw = r#"{"port":"COM1","stopBits":3,"slaveID":1}"#;
        assert!(serde_json::from_str::<SerialConfig>(raw).is_err());

        let raw = r#"{"port":"COM1","parity":7,"slaveID":1}"#;
        assert!(serde_json::from_str::<SerialConfig>(raw).is_err());
    }

    #[test]
    fn test_parity_from_str() {
        assert_eq!("Even".parse::<Parity>().unwrap(), Parity::Even);
        assert_eq!("n".parse::<Parity>().unwrap(), Parity::None);
        assert!("mark".parse::<Parity>().is_err());
    }
}
