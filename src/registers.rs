//! Carlo Gavazzi EM24 holding register layout.
//!
//! Measurements are INT32 values split over two registers, low word first.
//! Only the registers that monitoring clients (Victron GX, most SCADA drivers)
//! actually poll are populated; everything else in the measurement block reads
//! as zero.

use strum::IntoEnumIterator;
use strum_macros::{EnumIter, FromRepr};

use crate::error::ReadError;
use crate::telemetry::{Phase, TelemetrySnapshot};

/// Largest register count a single read may ask for.
pub const MAX_READ_COUNT: u16 = 1000;
/// Highest address the emulated meter answers.
pub const LAST_ADDRESS: u16 = 0xA100;
/// Length of the measurement block starting at address 0.
pub const TABLE_LEN: usize = 0x62;

/// Computed measurement registers. Each one occupies two words.
///
/// Registers are required to be listed in address order.
#[derive(Debug, Clone, Copy, EnumIter, FromRepr, PartialEq, Eq)]
#[repr(u16)]
pub enum Em24Reg {
    VoltageL1 = 0x00,
    VoltageL2 = 0x02,
    VoltageL3 = 0x04,
    // 0x06..0x0C line-to-line voltages
    CurrentL1 = 0x0C,
    CurrentL2 = 0x0E,
    CurrentL3 = 0x10,
    PowerL1 = 0x12,
    PowerL2 = 0x14,
    PowerL3 = 0x16,
    // 0x18..0x28 apparent and reactive power per phase, voltage sys
    PowerSys = 0x28,
    // 0x2A..0x34 VA sys, var sys, PF, frequency
    EnergyImportTotal = 0x34,
    EnergyImportL1 = 0x40,
    EnergyImportL2 = 0x42,
    EnergyImportL3 = 0x44,
    EnergyExportTotal = 0x4E,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    /// V, 0.1 V resolution
    Volt,
    /// A, 1 mA resolution
    Ampere,
    /// W, 0.1 W resolution
    Watt,
    /// Upstream Wh to kWh, 0.1 kWh resolution
    KiloWattHour,
}

impl Unit {
    fn scale(self, value: f64) -> f64 {
        match self {
            Unit::Volt | Unit::Watt => value * 10.0,
            Unit::Ampere => value * 1000.0,
            Unit::KiloWattHour => value / 1000.0 * 10.0,
        }
    }
}

impl Em24Reg {
    pub fn address(self) -> u16 {
        self as u16
    }

    fn unit(self) -> Unit {
        use Em24Reg::*;
        match self {
            VoltageL1 | VoltageL2 | VoltageL3 => Unit::Volt,
            CurrentL1 | CurrentL2 | CurrentL3 => Unit::Ampere,
            PowerL1 | PowerL2 | PowerL3 | PowerSys => Unit::Watt,
            EnergyImportTotal | EnergyImportL1 | EnergyImportL2 | EnergyImportL3
            | EnergyExportTotal => Unit::KiloWattHour,
        }
    }

    /// Physical value of this register in upstream units.
    pub fn quantity(self, s: &TelemetrySnapshot) -> f64 {
        use Em24Reg::*;
        match self {
            VoltageL1 => s.voltage[Phase::L1.index()],
            VoltageL2 => s.voltage[Phase::L2.index()],
            VoltageL3 => s.voltage[Phase::L3.index()],
            CurrentL1 => s.current[Phase::L1.index()],
            CurrentL2 => s.current[Phase::L2.index()],
            CurrentL3 => s.current[Phase::L3.index()],
            PowerL1 => s.power[Phase::L1.index()],
            PowerL2 => s.power[Phase::L2.index()],
            PowerL3 => s.power[Phase::L3.index()],
            PowerSys => s.power_total,
            EnergyImportTotal => s.energy_total,
            EnergyImportL1 => s.energy[Phase::L1.index()],
            EnergyImportL2 => s.energy[Phase::L2.index()],
            EnergyImportL3 => s.energy[Phase::L3.index()],
            EnergyExportTotal => s.energy_returned_total,
        }
    }

    /// Register words for this quantity; zero while no snapshot exists.
    pub fn encode(self, snapshot: Option<&TelemetrySnapshot>) -> [u16; 2] {
        match snapshot {
            Some(s) => split_words(self.unit().scale(self.quantity(s))),
            None => [0, 0],
        }
    }
}

/// Round half away from zero, then split the INT32 into `[low, high]`.
/// Negative values keep their two's complement bit pattern.
pub fn split_words(scaled: f64) -> [u16; 2] {
    let v = scaled.round() as i64 as u32;
    [(v & 0xFFFF) as u16, (v >> 16) as u16]
}

/// Inverse of [`split_words`] for a `[low, high]` pair.
pub fn join_words(words: [u16; 2]) -> i32 {
    (u32::from(words[0]) | (u32::from(words[1]) << 16)) as i32
}

/// Fixed identification registers, answered regardless of telemetry state.
#[derive(Debug, Clone, Copy, EnumIter, FromRepr, PartialEq, Eq)]
#[repr(u16)]
pub enum IdentityReg {
    /// 1648: EM24DINAV23XE1X
    Model = 0x000B,
    MeasurementModuleVersion = 0x0302,
    CommunicationModuleVersion = 0x0304,
    /// 0 = 3P.n
    MeasuringSystem = 0x1002,
    SerialNumber = 0x5000,
    ApplicationType = 0xA000,
    /// Front selector position, 3 = locked
    SelectorLock = 0xA100,
}

const SERIAL_NUMBER: &[u8; 14] = b"BV04200310011\0";
const SERIAL_WORDS: [u16; 7] = pack_ascii(SERIAL_NUMBER);

/// Two characters per register, first character in the high byte.
const fn pack_ascii(chars: &[u8; 14]) -> [u16; 7] {
    let mut words = [0; 7];
    let mut i = 0;
    while i < words.len() {
        words[i] = (chars[2 * i] as u16) << 8 | chars[2 * i + 1] as u16;
        i += 1;
    }
    words
}

impl IdentityReg {
    pub fn words(self) -> &'static [u16] {
        match self {
            IdentityReg::Model => &[0x0670],
            // version 9, revision 1
            IdentityReg::MeasurementModuleVersion => &[0x0901],
            // version 14, revision 1
            IdentityReg::CommunicationModuleVersion => &[0x0E01],
            IdentityReg::MeasuringSystem => &[0x0000],
            IdentityReg::SerialNumber => &SERIAL_WORDS,
            IdentityReg::ApplicationType => &[0x0007],
            IdentityReg::SelectorLock => &[0x0003],
        }
    }
}

/// Measurement block as seen by a client for the given snapshot.
pub fn measurement_table(snapshot: Option<&TelemetrySnapshot>) -> [u16; TABLE_LEN] {
    let mut table = [0; TABLE_LEN];
    for reg in Em24Reg::iter() {
        let addr = reg.address() as usize;
        table[addr..addr + 2].copy_from_slice(&reg.encode(snapshot));
    }
    table
}

/// Maps `(address, count)` onto the emulated register space.
#[derive(Debug, Clone, Copy)]
pub struct RegisterMapper {
    max_count: u16,
    last_address: u16,
}

impl Default for RegisterMapper {
    fn default() -> Self {
        Self {
            max_count: MAX_READ_COUNT,
            last_address: LAST_ADDRESS,
        }
    }
}

impl RegisterMapper {
    pub fn new(max_count: u16, last_address: u16) -> Self {
        Self {
            max_count,
            last_address,
        }
    }

    /// Up to `count` words starting at `address`.
    ///
    /// Identity registers return their fixed block (cut to `count`). Reads
    /// inside the address space but past the measurement block return only
    /// the words that exist, possibly none.
    pub fn read(
        &self,
        address: u16,
        count: u16,
        snapshot: Option<&TelemetrySnapshot>,
    ) -> Result<Vec<u16>, ReadError> {
        if count > self.max_count {
            return Err(ReadError::OversizedRequest {
                count,
                max: self.max_count,
            });
        }

        if let Some(reg) = IdentityReg::from_repr(address) {
            return Ok(reg.words().iter().take(count.into()).copied().collect());
        }

        if address > self.last_address {
            return Err(ReadError::OutOfRange { address });
        }

        let table = measurement_table(snapshot);
        let start = usize::from(address).min(TABLE_LEN);
        let end = (start + usize::from(count)).min(TABLE_LEN);
        Ok(table[start..end].to_vec())
    }
}
