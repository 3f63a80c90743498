#[cfg(feature = "hardware-gpio")]
pub mod libgpiod;
pub mod simulated;

#[cfg(feature = "hardware-gpio")]
pub use libgpiod::LibgpiodBackend;
pub use simulated::{PinWrite, SimulatedGpioBackend};
