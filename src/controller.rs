use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::DeviceConfig;
use crate::device::{Device, DeviceId};
use crate::error::AppError;
use crate::gpio::GpioBackend;
use crate::polarity::{Level, LogicalState, Polarity, to_level, to_logical};
use crate::registry::{DeviceSlot, Registry};

/// Published after every successful actuation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub id: DeviceId,
    pub state: LogicalState,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceFailure {
    pub id: DeviceId,
    pub name: String,
    pub pin: u32,
    pub kind: &'static str,
    pub message: String,
}

impl DeviceFailure {
    fn new(device: &Device, err: &AppError) -> Self {
        Self {
            id: device.id.clone(),
            name: device.name.clone(),
            pin: device.pin,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Outcome of bringing a set of devices to their default state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartupReport {
    pub initialized: Vec<DeviceId>,
    pub failures: Vec<DeviceFailure>,
}

impl StartupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Diagnostic view of what the backend reports for a device pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PinProbe {
    pub id: DeviceId,
    pub pin: u32,
    pub level: Level,
    pub reported_state: LogicalState,
    pub current_state: Option<LogicalState>,
}

/// Single entry point for every device state transition.
///
/// Commands for one device are serialized by that device's lock; commands for
/// different devices only share the registry read lock. Reconfiguration takes
/// the registry write lock and therefore waits for in-flight commands.
pub struct DeviceController<B: GpioBackend + ?Sized> {
    backend: Arc<B>,
    registry: RwLock<Registry>,
    events: broadcast::Sender<StateChange>,
}

impl<B: GpioBackend + ?Sized> DeviceController<B> {
    pub fn new(backend: Arc<B>, registry: Registry, broadcast_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            backend,
            registry: RwLock::new(registry),
            events,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    /// Acquires every pin and drives it to its default state, in configuration
    /// order. A failing device is reported and skipped. Devices that already
    /// have a known state are left alone, so calling this again retries only
    /// the failures.
    pub fn startup(&self) -> StartupReport {
        let registry = self.registry.read();
        let mut report = StartupReport::default();

        for mut slot in registry.slots() {
            if slot.acquired && slot.device.current_state.is_some() {
                continue;
            }
            self.initialize(&mut slot, &mut report);
        }

        info!(
            "Startup finished: {} initialized, {} failed",
            report.initialized.len(),
            report.failures.len()
        );
        report
    }

    /// Releases every held pin. Outputs keep their last written level; a later
    /// [`startup`](Self::startup) claims the pins again and reapplies defaults.
    pub fn shutdown(&self) {
        let registry = self.registry.read();
        for mut slot in registry.slots() {
            self.release(&mut slot);
        }
        info!("Released all device pins");
    }

    pub fn list_devices(&self) -> Vec<Device> {
        self.registry.read().list()
    }

    pub fn get_device(&self, id: &str) -> Result<Device, AppError> {
        self.registry.read().get(id)
    }

    pub fn query_state(&self, id: &str) -> Result<Option<LogicalState>, AppError> {
        Ok(self.registry.read().slot(id)?.lock().device.current_state)
    }

    pub fn set_state(&self, id: &str, desired: LogicalState) -> Result<Device, AppError> {
        let registry = self.registry.read();
        let mut slot = registry.slot(id)?.lock();
        self.actuate(&mut slot, desired)
    }

    /// Drives the device to the opposite of its current state. Not idempotent:
    /// every call flips the output.
    pub fn toggle(&self, id: &str) -> Result<Device, AppError> {
        let registry = self.registry.read();
        let mut slot = registry.slot(id)?.lock();
        let current = slot.device.current_state.ok_or_else(|| {
            AppError::InvalidState(format!(
                "device '{}' has no known state, set it explicitly first",
                slot.device.id
            ))
        })?;
        self.actuate(&mut slot, current.invert())
    }

    /// Reads the pin level back from the backend without touching `current_state`.
    pub fn probe(&self, id: &str) -> Result<PinProbe, AppError> {
        let registry = self.registry.read();
        let slot = registry.slot(id)?.lock();
        let device = &slot.device;
        let level = self
            .backend
            .read(device.pin)
            .map_err(|e| e.for_device(&device.id, &device.name))?;

        Ok(PinProbe {
            id: device.id.clone(),
            pin: device.pin,
            level,
            reported_state: to_logical(level, device.polarity),
            current_state: device.current_state,
        })
    }

    /// Replaces the registry with one built from `configs`.
    ///
    /// Pins held by the outgoing registry are handed over to whichever new
    /// device uses them. A device whose id, pin and polarity are unchanged
    /// keeps its state without a write; every other device is initialized to
    /// its default. Pins no longer used are released afterwards. Invalid
    /// configuration leaves the live registry untouched.
    pub fn reload(&self, configs: &[DeviceConfig]) -> Result<StartupReport, AppError> {
        let next = Registry::load(configs, self.backend.as_ref())?;
        let mut current = self.registry.write();

        let mut held: FxHashMap<u32, (DeviceId, Polarity, Option<LogicalState>)> =
            FxHashMap::default();
        for slot in current.slots() {
            if slot.acquired {
                let device = &slot.device;
                held.insert(
                    device.pin,
                    (device.id.clone(), device.polarity, device.current_state),
                );
            }
        }

        let mut report = StartupReport::default();
        let mut kept_pins = FxHashSet::default();
        for mut slot in next.slots() {
            if let Some((id, polarity, state)) = held.get(&slot.device.pin) {
                slot.acquired = true;
                kept_pins.insert(slot.device.pin);
                if *id == slot.device.id
                    && *polarity == slot.device.polarity
                    && let Some(state) = state
                {
                    debug!("Device {} unchanged, keeping state {state}", slot.device.id);
                    slot.device.current_state = Some(*state);
                    report.initialized.push(slot.device.id.clone());
                    continue;
                }
            }
            self.initialize(&mut slot, &mut report);
        }

        for pin in held.keys().filter(|pin| !kept_pins.contains(*pin)) {
            if let Err(e) = self.backend.release(*pin) {
                warn!("Failed to release pin {pin}: {e}");
            }
        }

        *current = next;
        info!(
            "Reloaded {} devices: {} initialized, {} failed",
            current.len(),
            report.initialized.len(),
            report.failures.len()
        );
        Ok(report)
    }

    fn initialize(&self, slot: &mut DeviceSlot, report: &mut StartupReport) {
        let device = &slot.device;
        info!(
            "Configuring GPIO{} for '{}': {}, default {}",
            device.pin, device.name, device.polarity, device.default_state
        );

        let claimed = if slot.acquired {
            Ok(())
        } else {
            self.backend.acquire(device.pin)
        };
        let result = claimed.and_then(|()| {
            slot.acquired = true;
            let default_state = slot.device.default_state;
            self.actuate(slot, default_state).map(drop)
        });

        match result {
            Ok(()) => report.initialized.push(slot.device.id.clone()),
            Err(e) => {
                let device = &slot.device;
                let e = e.for_device(&device.id, &device.name);
                warn!("{e}");
                report.failures.push(DeviceFailure::new(device, &e));
            }
        }
    }

    fn actuate(&self, slot: &mut DeviceSlot, desired: LogicalState) -> Result<Device, AppError> {
        let device = &mut slot.device;
        if !slot.acquired {
            return Err(AppError::Actuation {
                pin: device.pin,
                reason: "pin not acquired".to_string(),
            }
            .for_device(&device.id, &device.name));
        }
        let level = to_level(desired, device.polarity);

        self.backend
            .write(device.pin, level)
            .map_err(|e| e.for_device(&device.id, &device.name))?;

        device.current_state = Some(desired);
        debug!(
            "Device '{}' on GPIO{} set {desired} ({level})",
            device.name, device.pin
        );

        // no receivers is not an error
        let _ = self.events.send(StateChange {
            id: device.id.clone(),
            state: desired,
            timestamp_ms: epoch_millis(),
        });
        Ok(device.clone())
    }

    fn release(&self, slot: &mut DeviceSlot) {
        if !slot.acquired {
            return;
        }
        match self.backend.release(slot.device.pin) {
            Ok(()) => slot.acquired = false,
            Err(e) => warn!("{}", e.for_device(&slot.device.id, &slot.device.name)),
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
