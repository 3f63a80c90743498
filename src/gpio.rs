use crate::error::AppError;
use crate::polarity::Level;

/// Output capability of a GPIO provider.
///
/// Implementations report claim failures as [`AppError::PinUnavailable`] and
/// I/O failures as [`AppError::Actuation`]. Pins are identified by the
/// provider's own line numbering.
pub trait GpioBackend: Send + Sync {
    /// Whether `pin` exists on this provider at all.
    fn is_valid_pin(&self, pin: u32) -> bool;
    /// Claims exclusive ownership of `pin` without changing its output.
    fn acquire(&self, pin: u32) -> Result<(), AppError>;
    /// Gives up ownership. Releasing a pin that is not held is a no-op.
    fn release(&self, pin: u32) -> Result<(), AppError>;
    fn write(&self, pin: u32, level: Level) -> Result<(), AppError>;
    /// Last written or hardware-reported level.
    fn read(&self, pin: u32) -> Result<Level, AppError>;
}
