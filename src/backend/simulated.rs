use std::collections::VecDeque;
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::error::AppError;
use crate::gpio::GpioBackend;
use crate::polarity::Level;

const DEFAULT_LINES: u32 = 28;
const DEFAULT_HISTORY_CAPACITY: usize = 256;

/// In-memory GPIO provider for development machines and tests.
///
/// Every successful write is kept in a bounded history. Faults can be
/// injected per pin to exercise error paths.
pub struct SimulatedGpioBackend {
    lines: u32,
    reserved: FxHashSet<u32>,
    pins: RwLock<FxHashMap<u32, Mutex<SimulatedPin>>>, // keyed by line
    faulty: RwLock<FxHashSet<u32>>,
    history: Mutex<VecDeque<PinWrite>>,
    history_capacity: usize,
}

#[derive(Default)]
struct SimulatedPin {
    claimed: bool,
    level: Option<Level>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PinWrite {
    pub pin: u32,
    pub level: Level,
    pub timestamp_ms: u64,
}

impl Default for SimulatedGpioBackend {
    fn default() -> Self {
        Self::new(DEFAULT_LINES)
    }
}

impl SimulatedGpioBackend {
    pub fn new(lines: u32) -> Self {
        Self {
            lines,
            reserved: FxHashSet::default(),
            pins: RwLock::new(FxHashMap::default()),
            faulty: RwLock::new(FxHashSet::default()),
            history: Mutex::new(VecDeque::new()),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }

    pub fn with_reserved(mut self, pins: impl IntoIterator<Item = u32>) -> Self {
        self.reserved.extend(pins);
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Makes every following write to `pin` fail until [`Self::clear_fault`].
    pub fn inject_fault(&self, pin: u32) {
        if let Ok(mut faulty) = self.faulty.write() {
            faulty.insert(pin);
        }
    }

    pub fn clear_fault(&self, pin: u32) {
        if let Ok(mut faulty) = self.faulty.write() {
            faulty.remove(&pin);
        }
    }

    /// Successful writes, oldest first.
    pub fn writes(&self) -> Vec<PinWrite> {
        self.history
            .lock()
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_acquired(&self, pin: u32) -> bool {
        self.pins
            .read()
            .ok()
            .and_then(|pins| {
                pins.get(&pin)
                    .and_then(|p| p.lock().ok().map(|p| p.claimed))
            })
            .unwrap_or(false)
    }

    fn record(&self, pin: u32, level: Level) -> Result<(), AppError> {
        let mut history = self.history.lock().map_err(|e| AppError::Actuation {
            pin,
            reason: format!("lock poisoned: {e}"),
        })?;
        if self.history_capacity == 0 {
            return Ok(());
        }
        while history.len() >= self.history_capacity {
            history.pop_front();
        }
        history.push_back(PinWrite {
            pin,
            level,
            timestamp_ms: epoch_millis(),
        });
        Ok(())
    }
}

impl GpioBackend for SimulatedGpioBackend {
    fn is_valid_pin(&self, pin: u32) -> bool {
        pin < self.lines
    }

    fn acquire(&self, pin: u32) -> Result<(), AppError> {
        if !self.is_valid_pin(pin) {
            return Err(AppError::PinUnavailable {
                pin,
                reason: "no such line".into(),
            });
        }
        if self.reserved.contains(&pin) {
            return Err(AppError::PinUnavailable {
                pin,
                reason: "line is reserved".into(),
            });
        }

        let mut pins = self.pins.write().map_err(|e| AppError::PinUnavailable {
            pin,
            reason: format!("lock poisoned: {e}"),
        })?;
        let entry = pins.entry(pin).or_default();
        let mut state = entry.lock().map_err(|e| AppError::PinUnavailable {
            pin,
            reason: format!("lock poisoned: {e}"),
        })?;

        if state.claimed {
            return Err(AppError::PinUnavailable {
                pin,
                reason: "already claimed".into(),
            });
        }
        state.claimed = true;
        debug!("simulated line {pin} claimed");
        Ok(())
    }

    fn release(&self, pin: u32) -> Result<(), AppError> {
        let pins = self.pins.read().map_err(|e| AppError::Actuation {
            pin,
            reason: format!("lock poisoned: {e}"),
        })?;
        if let Some(entry) = pins.get(&pin) {
            let mut state = entry.lock().map_err(|e| AppError::Actuation {
                pin,
                reason: format!("lock poisoned: {e}"),
            })?;
            if state.claimed {
                state.claimed = false;
                debug!("simulated line {pin} released");
            }
        }
        Ok(())
    }

    fn write(&self, pin: u32, level: Level) -> Result<(), AppError> {
        let faulty = self
            .faulty
            .read()
            .map(|f| f.contains(&pin))
            .map_err(|e| AppError::Actuation {
                pin,
                reason: format!("lock poisoned: {e}"),
            })?;
        if faulty {
            return Err(AppError::Actuation {
                pin,
                reason: "injected fault".into(),
            });
        }

        let pins = self.pins.read().map_err(|e| AppError::Actuation {
            pin,
            reason: format!("lock poisoned: {e}"),
        })?;
        let entry = pins
            .get(&pin)
            .ok_or_else(|| AppError::Actuation {
                pin,
                reason: "pin not acquired".into(),
            })?;
        let mut state = entry.lock().map_err(|e| AppError::Actuation {
            pin,
            reason: format!("lock poisoned: {e}"),
        })?;
        if !state.claimed {
            return Err(AppError::Actuation {
                pin,
                reason: "pin not acquired".into(),
            });
        }

        state.level = Some(level);
        self.record(pin, level)
    }

    fn read(&self, pin: u32) -> Result<Level, AppError> {
        let pins = self.pins.read().map_err(|e| AppError::Actuation {
            pin,
            reason: format!("lock poisoned: {e}"),
        })?;
        let entry = pins.get(&pin).ok_or_else(|| AppError::Actuation {
            pin,
            reason: "no level recorded".into(),
        })?;
        let state = entry.lock().map_err(|e| AppError::Actuation {
            pin,
            reason: format!("lock poisoned: {e}"),
        })?;
        state.level.ok_or_else(|| AppError::Actuation {
            pin,
            reason: "no level recorded".into(),
        })
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_is_exclusive() {
        let backend = SimulatedGpioBackend::default();
        backend.acquire(4).unwrap();
        assert!(matches!(
            backend.acquire(4),
            Err(AppError::PinUnavailable { pin: 4, .. })
        ));
    }

    #[test]
    fn reserved_and_out_of_range_lines_are_unavailable() {
        let backend = SimulatedGpioBackend::new(8).with_reserved([2]);
        assert!(matches!(
            backend.acquire(2),
            Err(AppError::PinUnavailable { pin: 2, .. })
        ));
        assert!(matches!(
            backend.acquire(8),
            Err(AppError::PinUnavailable { pin: 8, .. })
        ));
    }

    #[test]
    fn write_requires_acquisition() {
        let backend = SimulatedGpioBackend::default();
        assert!(matches!(
            backend.write(5, Level::High),
            Err(AppError::Actuation { pin: 5, .. })
        ));
        assert!(backend.writes().is_empty());
    }

    #[test]
    fn release_is_idempotent_and_keeps_level() {
        let backend = SimulatedGpioBackend::default();
        backend.release(6).unwrap();

        backend.acquire(6).unwrap();
        backend.write(6, Level::High).unwrap();
        backend.release(6).unwrap();
        backend.release(6).unwrap();

        assert!(!backend.is_acquired(6));
        assert_eq!(backend.read(6).unwrap(), Level::High);
        backend.acquire(6).unwrap();
    }

    #[test]
    fn injected_fault_fails_writes_until_cleared() {
        let backend = SimulatedGpioBackend::default();
        backend.acquire(9).unwrap();
        backend.inject_fault(9);
        assert!(backend.write(9, Level::Low).is_err());
        backend.clear_fault(9);
        backend.write(9, Level::Low).unwrap();

        let writes = backend.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!((writes[0].pin, writes[0].level), (9, Level::Low));
    }

    #[test]
    fn history_is_bounded() {
        let backend = SimulatedGpioBackend::default().with_history_capacity(2);
        backend.acquire(1).unwrap();
        backend.write(1, Level::High).unwrap();
        backend.write(1, Level::Low).unwrap();
        backend.write(1, Level::High).unwrap();

        let levels: Vec<_> = backend.writes().into_iter().map(|w| w.level).collect();
        assert_eq!(levels, vec![Level::Low, Level::High]);
    }
}
