use std::fmt;

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::config::DeviceConfig;
use crate::device::{Device, DeviceId};
use crate::error::AppError;
use crate::gpio::GpioBackend;
use crate::polarity::{LogicalState, Polarity};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigViolation {
    #[error("device #{index}: id must not be empty")]
    EmptyId { index: usize },
    #[error("device '{id}': duplicate id")]
    DuplicateId { id: DeviceId },
    #[error("device '{id}': name must not be empty")]
    EmptyName { id: DeviceId },
    #[error("device '{id}': invalid pin {pin}")]
    InvalidPin { id: DeviceId, pin: String },
    #[error("device '{id}': pin {pin} already used by device '{owner}'")]
    DuplicatePin {
        id: DeviceId,
        pin: u32,
        owner: DeviceId,
    },
    #[error("device '{id}': unrecognized polarity '{value}'")]
    InvalidPolarity { id: DeviceId, value: String },
    #[error("device '{id}': unrecognized default state '{value}'")]
    InvalidDefaultState { id: DeviceId, value: String },
}

/// Every violation found while loading a device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigViolations(Vec<ConfigViolation>);

impl ConfigViolations {
    pub fn iter(&self) -> impl Iterator<Item = &ConfigViolation> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConfigViolations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

/// Mutable part of a registered device.
pub(crate) struct DeviceSlot {
    pub(crate) device: Device,
    pub(crate) acquired: bool,
}

/// Validated, immutable set of devices. Replaced wholesale on reconfiguration.
pub struct Registry {
    entries: Vec<Mutex<DeviceSlot>>,
    index: FxHashMap<DeviceId, usize>,
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    /// Validates `configs` against `backend` and builds a registry in
    /// configuration order. Ids default to the device's position in the list.
    pub fn load<B: GpioBackend + ?Sized>(
        configs: &[DeviceConfig],
        backend: &B,
    ) -> Result<Self, AppError> {
        let mut violations = Vec::new();
        let mut index = FxHashMap::default();
        let mut pins: FxHashMap<u32, DeviceId> = FxHashMap::default();
        let mut devices = Vec::with_capacity(configs.len());

        for (position, cfg) in configs.iter().enumerate() {
            let id = cfg
                .id
                .clone()
                .unwrap_or_else(|| DeviceId::new(position.to_string()));
            let mut valid = true;

            if id.as_str().trim().is_empty() {
                violations.push(ConfigViolation::EmptyId { index: position });
                valid = false;
            } else if index.contains_key(&id) {
                violations.push(ConfigViolation::DuplicateId { id: id.clone() });
                valid = false;
            } else {
                index.insert(id.clone(), devices.len());
            }

            if cfg.name.trim().is_empty() {
                violations.push(ConfigViolation::EmptyName { id: id.clone() });
                valid = false;
            }

            let pin = match cfg.pin_number().and_then(|n| u32::try_from(n).ok()) {
                Some(pin) if backend.is_valid_pin(pin) => {
                    if let Some(owner) = pins.get(&pin) {
                        violations.push(ConfigViolation::DuplicatePin {
                            id: id.clone(),
                            pin,
                            owner: owner.clone(),
                        });
                        valid = false;
                    } else {
                        pins.insert(pin, id.clone());
                    }
                    Some(pin)
                }
                _ => {
                    let pin = match &cfg.pin {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    };
                    violations.push(ConfigViolation::InvalidPin { id: id.clone(), pin });
                    None
                }
            };

            let polarity = cfg.polarity.parse::<Polarity>().map_err(|_| {
                violations.push(ConfigViolation::InvalidPolarity {
                    id: id.clone(),
                    value: cfg.polarity.clone(),
                })
            });
            let default_state = cfg.default_state.parse::<LogicalState>().map_err(|_| {
                violations.push(ConfigViolation::InvalidDefaultState {
                    id: id.clone(),
                    value: cfg.default_state.clone(),
                })
            });

            if let (true, Some(pin), Ok(polarity), Ok(default_state)) =
                (valid, pin, polarity, default_state)
            {
                devices.push(Device {
                    id,
                    name: cfg.name.trim().to_string(),
                    icon: cfg.icon.clone(),
                    pin,
                    polarity,
                    default_state,
                    current_state: None,
                });
            }
        }

        if !violations.is_empty() {
            return Err(AppError::InvalidConfig(ConfigViolations(violations)));
        }

        Ok(Self {
            entries: devices
                .into_iter()
                .map(|device| {
                    Mutex::new(DeviceSlot {
                        device,
                        acquired: false,
                    })
                })
                .collect(),
            index,
        })
    }

    pub fn get(&self, id: &str) -> Result<Device, AppError> {
        Ok(self.slot(id)?.lock().device.clone())
    }

    pub fn list(&self) -> Vec<Device> {
        self.entries
            .iter()
            .map(|entry| entry.lock().device.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn slot(&self, id: &str) -> Result<&Mutex<DeviceSlot>, AppError> {
        self.index
            .get(id)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| AppError::NotFoundDevice(id.to_string()))
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = MutexGuard<'_, DeviceSlot>> {
        self.entries.iter().map(|entry| entry.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedGpioBackend;

    fn device(id: Option<&str>, pin: i64, polarity: &str, default_state: &str) -> DeviceConfig {
        DeviceConfig {
            id: id.map(DeviceId::from),
            name: format!("Device {pin}"),
            icon: "lightbulb".to_string(),
            pin: pin.into(),
            polarity: polarity.to_string(),
            default_state: default_state.to_string(),
        }
    }

    fn violations(err: AppError) -> Vec<ConfigViolation> {
        match err {
            AppError::InvalidConfig(v) => v.iter().cloned().collect(),
            other => panic!("expected config error, got {other}"),
        }
    }

    #[test]
    fn load_keeps_configuration_order() {
        let backend = SimulatedGpioBackend::default();
        let registry = Registry::load(
            &[
                device(Some("fan"), 22, "active_high", "off"),
                device(Some("light"), 17, "active_low", "default_on"),
            ],
            &backend,
        )
        .unwrap();

        let ids: Vec<_> = registry.list().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![DeviceId::from("fan"), DeviceId::from("light")]);

        let light = registry.get("light").unwrap();
        assert_eq!(light.pin, 17);
        assert_eq!(light.polarity, Polarity::ActiveLow);
        assert_eq!(light.default_state, LogicalState::On);
        assert_eq!(light.current_state, None);
    }

    #[test]
    fn missing_ids_default_to_position() {
        let backend = SimulatedGpioBackend::default();
        let registry = Registry::load(
            &[
                device(None, 4, "active_high", "off"),
                device(None, 5, "active_high", "off"),
            ],
            &backend,
        )
        .unwrap();

        assert_eq!(registry.get("1").unwrap().pin, 5);
    }

    #[test]
    fn duplicate_pin_is_rejected() {
        let backend = SimulatedGpioBackend::default();
        let err = Registry::load(
            &[
                device(Some("a"), 17, "active_high", "off"),
                device(Some("b"), 17, "active_low", "on"),
            ],
            &backend,
        )
        .err()
        .unwrap();

        assert_eq!(
            violations(err),
            vec![ConfigViolation::DuplicatePin {
                id: DeviceId::from("b"),
                pin: 17,
                owner: DeviceId::from("a"),
            }]
        );
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let backend = SimulatedGpioBackend::default();
        let err = Registry::load(
            &[
                device(Some("a"), 17, "active_high", "off"),
                device(Some("a"), 18, "active_high", "off"),
            ],
            &backend,
        )
        .err()
        .unwrap();

        assert_eq!(
            violations(err),
            vec![ConfigViolation::DuplicateId {
                id: DeviceId::from("a")
            }]
        );
    }

    #[test]
    fn every_violation_is_reported() {
        let backend = SimulatedGpioBackend::default();
        let mut nameless = device(Some("c"), 3, "active_high", "off");
        nameless.name = "  ".to_string();

        let err = Registry::load(
            &[
                device(Some("a"), -1, "active_high", "off"),
                device(Some("b"), 99, "sideways", "dim"),
                nameless,
            ],
            &backend,
        )
        .err()
        .unwrap();

        let found = violations(err);
        assert_eq!(found.len(), 5);
        assert!(found.contains(&ConfigViolation::InvalidPin {
            id: DeviceId::from("a"),
            pin: "-1".to_string()
        }));
        assert!(found.contains(&ConfigViolation::InvalidPin {
            id: DeviceId::from("b"),
            pin: "99".to_string()
        }));
        assert!(found.contains(&ConfigViolation::InvalidPolarity {
            id: DeviceId::from("b"),
            value: "sideways".to_string()
        }));
        assert!(found.contains(&ConfigViolation::InvalidDefaultState {
            id: DeviceId::from("b"),
            value: "dim".to_string()
        }));
        assert!(found.contains(&ConfigViolation::EmptyName {
            id: DeviceId::from("c")
        }));
    }

    #[test]
    fn pin_may_be_written_as_text() {
        let backend = SimulatedGpioBackend::default();
        let configs: Vec<DeviceConfig> = serde_json::from_str(
            r#"[{"id":"light","name":"Light","pin":" 17","polarity":"active_high","default_state":"off"}]"#,
        )
        .unwrap();

        let registry = Registry::load(&configs, &backend).unwrap();
        assert_eq!(registry.get("light").unwrap().pin, 17);
    }

    #[test]
    fn malformed_fields_are_reported_together() {
        let backend = SimulatedGpioBackend::default();
        let configs: Vec<DeviceConfig> = serde_json::from_str(
            r#"[
                {"id":"a","name":"A","pin":4,"polarity":"active_high","default_state":"on"},
                {"id":"a","name":"B","pin":-1,"polarity":"sideways","default_state":"on"},
                {"id":"c","pin":"x","polarity":"active_low","default_state":"dim"},
                {"id":"d","name":"D","polarity":"active_low","default_state":"off"}
            ]"#,
        )
        .unwrap();

        let found = violations(Registry::load(&configs, &backend).err().unwrap());
        assert_eq!(
            found,
            vec![
                ConfigViolation::DuplicateId { id: "a".into() },
                ConfigViolation::InvalidPin { id: "a".into(), pin: "-1".to_string() },
                ConfigViolation::InvalidPolarity {
                    id: "a".into(),
                    value: "sideways".to_string()
                },
                ConfigViolation::EmptyName { id: "c".into() },
                ConfigViolation::InvalidPin { id: "c".into(), pin: "x".to_string() },
                ConfigViolation::InvalidDefaultState {
                    id: "c".into(),
                    value: "dim".to_string()
                },
                ConfigViolation::InvalidPin { id: "d".into(), pin: "null".to_string() },
            ]
        );
    }

    #[test]
    fn unknown_id_is_not_found() {
        let registry = Registry::empty();
        assert!(matches!(
            registry.get("ghost"),
            Err(AppError::NotFoundDevice(id)) if id == "ghost"
        ));
    }
}
