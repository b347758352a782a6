//! Register map and value decoding
//!
//! Every quantity is an IEEE-754 float32 spread over two holding registers,
//! high register first, each register big-endian (ABCD).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Values below this are treated as sensor garbage and clamped to zero
pub const SENTINEL_FLOOR: f32 = -1000.0;

/// Measured quantities and their base holding-register addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    Voltage,
    Current,
    ActivePower,
    ReactivePower,
    ApparentPower,
    PowerFactor,
    Frequency,
    ActiveEnergy,
}

impl Quantity {
    pub const ALL: [Quantity; 8] = [
        Quantity::Voltage,
        Quantity::Current,
        Quantity::ActivePower,
        Quantity::ReactivePower,
        Quantity::ApparentPower,
        Quantity::PowerFactor,
        Quantity::Frequency,
        Quantity::ActiveEnergy,
    ];

    pub fn address(self) -> u16 {
        match self {
            Quantity::Voltage => 0x2000,
            Quantity::Current => 0x2002,
            Quantity::ActivePower => 0x2004,
            Quantity::ReactivePower => 0x2006,
            Quantity::ApparentPower => 0x2008,
            Quantity::PowerFactor => 0x200A,
            // 0x200C is reserved
            Quantity::Frequency => 0x200E,
            Quantity::ActiveEnergy => 0x4000,
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Quantity::Voltage => "V",
            Quantity::Current => "A",
            Quantity::ActivePower => "W",
            Quantity::ReactivePower => "var",
            Quantity::ApparentPower => "VA",
            Quantity::PowerFactor => "",
            Quantity::Frequency => "Hz",
            Quantity::ActiveEnergy => "kWh",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Quantity::Voltage => "voltage",
            Quantity::Current => "current",
            Quantity::ActivePower => "active_power",
            Quantity::ReactivePower => "reactive_power",
            Quantity::ApparentPower => "apparent_power",
            Quantity::PowerFactor => "power_factor",
            Quantity::Frequency => "frequency",
            Quantity::ActiveEnergy => "active_energy",
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    pub fn from_address(address: u16) -> Option<Quantity> {
        Quantity::ALL.into_iter().find(|q| q.address() == address)
    }
}

/// A contiguous run of holding registers fetched in one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterBlock {
    pub start: u16,
    pub quantity: u16,
}

impl RegisterBlock {
    /// Payload bytes a complete response carries
    pub fn byte_len(&self) -> usize {
        usize::from(self.quantity) * 2
    }

    /// Whether the full register pair starting at `address` lies inside
    pub fn contains(&self, address: u16) -> bool {
        let start = u32::from(self.start);
        let end = start + u32::from(self.quantity);
        let address = u32::from(address);
        address >= start && address + 2 <= end
    }
}

/// 0x2000..=0x200F: everything except energy
pub const ELECTRICAL_BLOCK: RegisterBlock = RegisterBlock {
    start: 0x2000,
    quantity: 16,
};

/// 0x4000..=0x4001: cumulative active energy
pub const ENERGY_BLOCK: RegisterBlock = RegisterBlock {
    start: 0x4000,
    quantity: 2,
};

/// Raw 4-byte register pairs of one acquisition cycle, indexed by quantity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRegisters {
    slots: [Option<[u8; 4]>; 8],
}

impl RawRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, quantity: Quantity, bytes: [u8; 4]) {
        self.slots[quantity.index()] = Some(bytes);
    }

    pub fn get(&self, quantity: Quantity) -> Option<[u8; 4]> {
        self.slots[quantity.index()]
    }

    /// Slice a block payload into the quantities it covers
    ///
    /// Quantities whose bytes fall outside a short payload are left unset.
    pub fn fill_from_block(&mut self, block: RegisterBlock, payload: &[u8]) {
        for quantity in Quantity::ALL {
            let address = quantity.address();
            if !block.contains(address) {
                continue;
            }
            let offset = usize::from(address - block.start) * 2;
            if let Some(chunk) = payload.get(offset..offset + 4) {
                self.set(quantity, [chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

/// Reconstruct a float32 from two registers (ABCD)
///
/// Fewer than four bytes yields 0.0.
pub fn parse_float32(bytes: &[u8]) -> f32 {
    match bytes.get(..4) {
        Some(b) => f32::from_be_bytes([b[0], b[1], b[2], b[3]]),
        None => 0.0,
    }
}

/// False for NaN and ±Infinity
pub fn is_valid(value: f32) -> bool {
    value.is_finite()
}

/// One decoded acquisition cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub voltage: f32,
    pub current: f32,
    pub active_power: f32,
    pub reactive_power: f32,
    pub apparent_power: f32,
    pub power_factor: f32,
    pub frequency: f32,
    pub active_energy: f32,
    pub timestamp: DateTime<Utc>,
}

impl Default for Reading {
    fn default() -> Self {
        Self {
            voltage: 0.0,
            current: 0.0,
            active_power: 0.0,
            reactive_power: 0.0,
            apparent_power: 0.0,
            power_factor: 0.0,
            frequency: 0.0,
            active_energy: 0.0,
            timestamp: Utc::now(),
        }
    }
}

impl Reading {
    pub fn get(&self, quantity: Quantity) -> f32 {
        match quantity {
            Quantity::Voltage => self.voltage,
            Quantity::Current => self.current,
            Quantity::ActivePower => self.active_power,
            Quantity::ReactivePower => self.reactive_power,
            Quantity::ApparentPower => self.apparent_power,
            Quantity::PowerFactor => self.power_factor,
            Quantity::Frequency => self.frequency,
            Quantity::ActiveEnergy => self.active_energy,
        }
    }

    pub fn set(&mut self, quantity: Quantity, value: f32) {
        let slot = match quantity {
            Quantity::Voltage => &mut self.voltage,
            Quantity::Current => &mut self.current,
            Quantity::ActivePower => &mut self.active_power,
            Quantity::ReactivePower => &mut self.reactive_power,
            Quantity::ApparentPower => &mut self.apparent_power,
            Quantity::PowerFactor => &mut self.power_factor,
            Quantity::Frequency => &mut self.frequency,
            Quantity::ActiveEnergy => &mut self.active_energy,
        };
        *slot = value;
    }
}

/// Decode whatever quantities are present; absent ones stay 0.0
pub fn decode(raw: &RawRegisters) -> Reading {
    let mut reading = Reading::default();
    for quantity in Quantity::ALL {
        if let Some(bytes) = raw.get(quantity) {
            reading.set(quantity, parse_float32(&bytes));
        }
    }
    reading
}

/// Permissive clamp: non-finite values and values below [`SENTINEL_FLOOR`]
/// become 0.0, everything else passes through
pub fn apply_range_filter(reading: &mut Reading) {
    for quantity in Quantity::ALL {
        let value = reading.get(quantity);
        if !is_valid(value) || value < SENTINEL_FLOOR {
            reading.set(quantity, 0.0);
        }
    }
}
