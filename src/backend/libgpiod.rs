use log::{debug, info};
use std::path::PathBuf;

use libgpiod::{chip::Chip, line, request};
use parking_lot::{FairMutex, RwLock, RwLockUpgradableReadGuard};
use rustc_hash::FxHashMap;

use crate::error::AppError;
use crate::gpio::GpioBackend;
use crate::polarity::Level;

/// GPIO character-device backend for a single chip.
///
/// Line offsets on the chip are used as pin numbers; on a Raspberry Pi's
/// `gpiochip0` these match BCM numbering.
pub struct LibgpiodBackend {
    chip: String,
    num_lines: u32,
    lines: RwLock<FxHashMap<u32, FairMutex<LineHandle>>>, // keyed by offset
}

struct LineHandle {
    request: request::Request,
    // Lines are requested as-is and only switched to output on the first write,
    // so claiming a line never changes what it is driving.
    driving: bool,
}

impl LibgpiodBackend {
    pub fn new(chip: &str) -> Result<Self, AppError> {
        let handle = Self::open_chip(chip)?;
        let info = handle
            .info()
            .map_err(|e| AppError::Config(format!("chip info {chip}: {e}")))?;
        let num_lines = u32::try_from(info.num_lines()).unwrap_or(u32::MAX);
        info!("Using {chip} with {num_lines} lines");

        Ok(Self {
            chip: chip.to_string(),
            num_lines,
            lines: RwLock::new(FxHashMap::default()),
        })
    }

    fn open_chip(path: &str) -> Result<Chip, AppError> {
        let p = PathBuf::from(path);
        Chip::open(&p).map_err(|e| AppError::Config(format!("open chip {path}: {e}")))
    }

    fn request_line(&self, offset: u32) -> Result<request::Request, AppError> {
        let unavailable = |reason: String| AppError::PinUnavailable {
            pin: offset,
            reason,
        };

        let chip = Self::open_chip(&self.chip).map_err(|e| unavailable(e.to_string()))?;
        let line_info = chip
            .line_info(offset)
            .map_err(|e| unavailable(format!("line info: {e}")))?;
        if line_info.is_used() {
            let consumer = line_info.consumer().unwrap_or("unknown consumer");
            return Err(unavailable(format!("in use by {consumer}")));
        }

        let settings =
            line::Settings::new().map_err(|e| unavailable(format!("line settings: {e}")))?;
        let mut line_cfg =
            line::Config::new().map_err(|e| unavailable(format!("line config: {e}")))?;
        line_cfg
            .add_line_settings(&[offset], settings)
            .map_err(|e| unavailable(format!("line config add settings: {e}")))?;

        let mut req_cfg =
            request::Config::new().map_err(|e| unavailable(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| unavailable(format!("request consumer: {e}")))?;
        chip.request_lines(Some(&req_cfg), &line_cfg)
            .map_err(|e| unavailable(format!("request lines: {e}")))
    }

    fn output_config(offset: u32, value: line::Value) -> Result<line::Config, AppError> {
        let actuation = |reason: String| AppError::Actuation {
            pin: offset,
            reason,
        };

        let mut ls =
            line::Settings::new().map_err(|e| actuation(format!("line settings: {e}")))?;
        ls.set_direction(line::Direction::Output)
            .map_err(|e| actuation(format!("set direction: {e}")))?;
        ls.set_drive(line::Drive::PushPull)
            .map_err(|e| actuation(format!("set drive: {e}")))?;
        ls.set_output_value(value)
            .map_err(|e| actuation(format!("set output value: {e}")))?;

        let mut cfg = line::Config::new().map_err(|e| actuation(format!("line config: {e}")))?;
        cfg.add_line_settings(&[offset], ls)
            .map_err(|e| actuation(format!("line config add settings: {e}")))?;
        Ok(cfg)
    }
}

fn to_value(level: Level) -> line::Value {
    match level {
        Level::Low => line::Value::InActive,
        Level::High => line::Value::Active,
    }
}

impl GpioBackend for LibgpiodBackend {
    fn is_valid_pin(&self, pin: u32) -> bool {
        pin < self.num_lines
    }

    fn acquire(&self, pin: u32) -> Result<(), AppError> {
        if !self.is_valid_pin(pin) {
            return Err(AppError::PinUnavailable {
                pin,
                reason: format!("{} has no line {pin}", self.chip),
            });
        }

        let lines = self.lines.upgradable_read();
        if lines.contains_key(&pin) {
            return Err(AppError::PinUnavailable {
                pin,
                reason: "already claimed".into(),
            });
        }

        // the upgradable guard excludes other writers, so requesting before upgrading is race free
        let request = self.request_line(pin)?;
        let mut lines = RwLockUpgradableReadGuard::upgrade(lines);
        lines.insert(
            pin,
            FairMutex::new(LineHandle {
                request,
                driving: false,
            }),
        );
        debug!("line {pin} requested on {}", self.chip);
        Ok(())
    }

    fn release(&self, pin: u32) -> Result<(), AppError> {
        if self.lines.write().remove(&pin).is_some() {
            debug!("line {pin} released on {}", self.chip);
        }
        Ok(())
    }

    fn write(&self, pin: u32, level: Level) -> Result<(), AppError> {
        let lines = self.lines.read();
        let handle_lock = lines.get(&pin).ok_or_else(|| AppError::Actuation {
            pin,
            reason: "pin not acquired".into(),
        })?;
        let mut handle = handle_lock.lock();

        if handle.driving {
            handle
                .request
                .set_value(pin, to_value(level))
                .map_err(|e| AppError::Actuation {
                    pin,
                    reason: format!("set value: {e}"),
                })?;
        } else {
            let cfg = Self::output_config(pin, to_value(level))?;
            handle
                .request
                .reconfigure_lines(&cfg)
                .map_err(|e| AppError::Actuation {
                    pin,
                    reason: format!("reconfigure lines: {e}"),
                })?;
            handle.driving = true;
        }
        Ok(())
    }

    fn read(&self, pin: u32) -> Result<Level, AppError> {
        let lines = self.lines.read();
        let handle_lock = lines.get(&pin).ok_or_else(|| AppError::Actuation {
            pin,
            reason: "pin not acquired".into(),
        })?;

        let value = handle_lock
            .lock()
            .request
            .value(pin)
            .map_err(|e| AppError::Actuation {
                pin,
                reason: format!("get value: {e}"),
            })?;
        Ok(match value {
            line::Value::InActive => Level::Low,
            line::Value::Active => Level::High,
        })
    }
}
