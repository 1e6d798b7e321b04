//! Holding register reads, as served to Modbus clients.

use log::*;
use rodbus::server::RequestHandler;
use rodbus::ExceptionCode;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::latest::LatestValue;
use crate::registers::RegisterMapper;
use crate::telemetry::TelemetrySnapshot;

/// Narrow read-only view of a holding register space.
pub trait HoldingRegisters: Send + Sync {
    /// `None` means "no data" for this request.
    fn read_holding_registers(&self, address: u16, count: u16) -> Option<Vec<u16>>;
}

/// Answers register reads from the latest published snapshot.
///
/// Never blocks on the refresh task and never fails: every rejected request
/// comes back as `None`.
#[derive(Debug, Clone)]
pub struct RegisterReadHandler {
    latest: Arc<LatestValue>,
    mapper: RegisterMapper,
}

impl RegisterReadHandler {
    pub fn new(latest: Arc<LatestValue>, mapper: RegisterMapper) -> Self {
        Self { latest, mapper }
    }

    pub fn snapshot(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.latest.get()
    }

    /// Resolve a read against an already taken snapshot.
    pub fn read_from(
        &self,
        snapshot: Option<&TelemetrySnapshot>,
        address: u16,
        count: u16,
    ) -> Option<Vec<u16>> {
        match self.mapper.read(address, count, snapshot) {
            Ok(words) if !words.is_empty() => Some(words),
            Ok(_) => {
                debug!("Read {address:#06x}+{count}: no registers");
                None
            }
            Err(e) => {
                debug!("Read {address:#06x}+{count}: {e}");
                None
            }
        }
    }
}

impl HoldingRegisters for RegisterReadHandler {
    fn read_holding_registers(&self, address: u16, count: u16) -> Option<Vec<u16>> {
        let snapshot = self.latest.get();
        self.read_from(snapshot.as_deref(), address, count)
    }
}

/// Longest gap between two callbacks of the same request.
const RUN_GAP: Duration = Duration::from_millis(5);

#[derive(Debug)]
struct Run {
    snapshot: Option<Arc<TelemetrySnapshot>>,
    start: u16,
    next_address: u16,
    at: Instant,
}

/// Adapter onto the rodbus server.
///
/// rodbus resolves a multi-register read one address at a time, in
/// ascending order. The adapter treats back-to-back consecutive addresses as
/// one request: the snapshot taken for the first address is reused, and every
/// word is resolved relative to the first address, so identity blocks and
/// measurement pairs come out exactly as a single ranged read would give them.
pub struct ModbusServerHandler {
    registers: RegisterReadHandler,
    run: Mutex<Option<Run>>,
}

impl ModbusServerHandler {
    pub fn new(registers: RegisterReadHandler) -> Self {
        Self {
            registers,
            run: Mutex::new(None),
        }
    }

    /// Snapshot, start address and offset of the request `address` belongs to.
    fn locate(&self, address: u16) -> (Option<Arc<TelemetrySnapshot>>, u16, u16) {
        let mut run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        match run.as_mut() {
            Some(r) if r.next_address == address && r.at.elapsed() < RUN_GAP => {
                r.next_address = address.wrapping_add(1);
                r.at = Instant::now();
                (r.snapshot.clone(), r.start, address.wrapping_sub(r.start))
            }
            _ => {
                let snapshot = self.registers.snapshot();
                *run = Some(Run {
                    snapshot: snapshot.clone(),
                    start: address,
                    next_address: address.wrapping_add(1),
                    at: Instant::now(),
                });
                (snapshot, address, 0)
            }
        }
    }
}

impl RequestHandler for ModbusServerHandler {
    fn read_holding_register(&self, address: u16) -> Result<u16, ExceptionCode> {
        let (snapshot, start, offset) = self.locate(address);
        self.registers
            .read_from(snapshot.as_deref(), start, offset.saturating_add(1))
            .and_then(|words| words.get(usize::from(offset)).copied())
            .ok_or(ExceptionCode::IllegalDataAddress)
    }
}
