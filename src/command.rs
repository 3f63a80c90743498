//! Command interface offered to the host UI.
//!
//! Older front-ends post `turnGpioOn`/`turnGpioOff`/`getGpioState` with a
//! numeric `id`; those names are accepted as aliases.

use serde::{Deserialize, Serialize};

use crate::controller::DeviceController;
use crate::device::{DeviceId, DeviceStateView, DeviceSummary};
use crate::error::AppError;
use crate::gpio::GpioBackend;
use crate::polarity::LogicalState;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Command {
    ListDevices,
    #[serde(alias = "turnGpioOn")]
    TurnOn { id: DeviceId },
    #[serde(alias = "turnGpioOff")]
    TurnOff { id: DeviceId },
    Toggle { id: DeviceId },
    SetState { id: DeviceId, state: LogicalState },
    #[serde(alias = "getGpioState")]
    GetState { id: DeviceId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CommandReply {
    Devices(Vec<DeviceSummary>),
    State(DeviceStateView),
}

impl Command {
    pub fn execute<B: GpioBackend + ?Sized>(
        self,
        controller: &DeviceController<B>,
    ) -> Result<CommandReply, AppError> {
        let device = match self {
            Command::ListDevices => {
                return Ok(CommandReply::Devices(
                    controller
                        .list_devices()
                        .iter()
                        .map(|d| d.summary())
                        .collect(),
                ));
            }
            Command::GetState { id } => {
                let current_state = controller.query_state(id.as_str())?;
                return Ok(CommandReply::State(DeviceStateView { id, current_state }));
            }
            Command::TurnOn { id } => controller.set_state(id.as_str(), LogicalState::On)?,
            Command::TurnOff { id } => controller.set_state(id.as_str(), LogicalState::Off)?,
            Command::SetState { id, state } => controller.set_state(id.as_str(), state)?,
            Command::Toggle { id } => controller.toggle(id.as_str())?,
        };

        Ok(CommandReply::State(device.state_view()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::SimulatedGpioBackend;
    use crate::config::DeviceConfig;
    use crate::registry::Registry;

    fn controller() -> DeviceController<SimulatedGpioBackend> {
        let backend = Arc::new(SimulatedGpioBackend::default());
        let configs = [DeviceConfig {
            id: None,
            name: "Enclosure light".to_string(),
            icon: "lightbulb".to_string(),
            pin: serde_json::json!(17),
            polarity: "active_low".to_string(),
            default_state: "default_off".to_string(),
        }];
        let registry = Registry::load(&configs, backend.as_ref()).unwrap();
        let controller = DeviceController::new(backend, registry, 4);
        controller.startup();
        controller
    }

    #[test]
    fn parses_legacy_command_names() {
        let cmd: Command = serde_json::from_str(r#"{"command":"turnGpioOn","id":0}"#).unwrap();
        assert_eq!(cmd, Command::TurnOn { id: DeviceId::from("0") });

        let cmd: Command =
            serde_json::from_str(r#"{"command":"getGpioState","id":"0"}"#).unwrap();
        assert_eq!(cmd, Command::GetState { id: DeviceId::from("0") });

        let cmd: Command =
            serde_json::from_str(r#"{"command":"setState","id":"0","state":"on"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::SetState {
                id: DeviceId::from("0"),
                state: LogicalState::On
            }
        );
    }

    #[test]
    fn execute_drives_controller() {
        let controller = controller();

        let reply = Command::TurnOn { id: "0".into() }.execute(&controller).unwrap();
        assert_eq!(
            reply,
            CommandReply::State(DeviceStateView {
                id: "0".into(),
                current_state: Some(LogicalState::On)
            })
        );

        let reply = Command::Toggle { id: "0".into() }.execute(&controller).unwrap();
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!({ "id": "0", "current_state": "off" })
        );

        let reply = Command::ListDevices.execute(&controller).unwrap();
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!([
                { "id": "0", "name": "Enclosure light", "icon": "lightbulb", "current_state": "off" }
            ])
        );
    }

    #[test]
    fn unknown_id_is_not_found() {
        let controller = controller();
        let err = Command::TurnOff { id: "7".into() }
            .execute(&controller)
            .unwrap_err();
        assert!(matches!(err, AppError::NotFoundDevice(id) if id == "7"));
    }
}
