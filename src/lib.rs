pub mod backend;
pub mod command;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod gpio;
pub mod polarity;
pub mod registry;
pub mod routes;

pub use command::{Command, CommandReply};
pub use config::{AppConfig, DeviceConfig, GpioConfig, HttpConfig};
pub use controller::{DeviceController, DeviceFailure, PinProbe, StartupReport, StateChange};
pub use device::{Device, DeviceId, DeviceStateView, DeviceSummary};
pub use error::AppError;
pub use gpio::GpioBackend;
pub use polarity::{Level, LogicalState, Polarity, to_level, to_logical};
pub use registry::{ConfigViolation, ConfigViolations, Registry};
pub use routes::AppState;

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::SimulatedGpioBackend;
