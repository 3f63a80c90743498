//! Mapping between the logical on/off state a user sees and the electrical
//! level driven onto a pin.

use std::fmt;
use std::ops::Not;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// User-facing switch state, independent of wiring.
#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogicalState {
    On,
    Off,
}

impl LogicalState {
    pub const fn invert(self) -> Self {
        match self {
            LogicalState::On => LogicalState::Off,
            LogicalState::Off => LogicalState::On,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            LogicalState::On => "on",
            LogicalState::Off => "off",
        }
    }
}

impl Not for LogicalState {
    type Output = LogicalState;

    fn not(self) -> Self::Output {
        self.invert()
    }
}

impl fmt::Display for LogicalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogicalState {
    type Err = String;

    /// Accepts `on`/`off` as well as the `default_on`/`default_off` spelling
    /// used by older configuration files.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s
            .strip_prefix("default_")
            .or_else(|| s.strip_prefix("default-"))
            .unwrap_or(s);
        if s.eq_ignore_ascii_case("on") {
            Ok(LogicalState::On)
        } else if s.eq_ignore_ascii_case("off") {
            Ok(LogicalState::Off)
        } else {
            Err(format!("unrecognized state '{s}'"))
        }
    }
}

/// Wiring convention of an output.
#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    ActiveHigh,
    ActiveLow,
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::ActiveHigh => f.write_str("active_high"),
            Polarity::ActiveLow => f.write_str("active_low"),
        }
    }
}

impl FromStr for Polarity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "active_high" => Ok(Polarity::ActiveHigh),
            "active_low" => Ok(Polarity::ActiveLow),
            other => Err(format!("unrecognized polarity '{other}'")),
        }
    }
}

/// Raw electrical level of a pin.
#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub const fn as_u8(self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => f.write_str("low"),
            Level::High => f.write_str("high"),
        }
    }
}

pub const fn to_level(state: LogicalState, polarity: Polarity) -> Level {
    match (state, polarity) {
        (LogicalState::On, Polarity::ActiveHigh) => Level::High,
        (LogicalState::On, Polarity::ActiveLow) => Level::Low,
        (LogicalState::Off, Polarity::ActiveHigh) => Level::Low,
        (LogicalState::Off, Polarity::ActiveLow) => Level::High,
    }
}

/// Inverse of [`to_level`].
pub const fn to_logical(level: Level, polarity: Polarity) -> LogicalState {
    match (level, polarity) {
        (Level::High, Polarity::ActiveHigh) => LogicalState::On,
        (Level::Low, Polarity::ActiveHigh) => LogicalState::Off,
        (Level::Low, Polarity::ActiveLow) => LogicalState::On,
        (Level::High, Polarity::ActiveLow) => LogicalState::Off,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: [LogicalState; 2] = [LogicalState::On, LogicalState::Off];
    const POLARITIES: [Polarity; 2] = [Polarity::ActiveHigh, Polarity::ActiveLow];

    #[test]
    fn truth_table() {
        assert_eq!(to_level(LogicalState::On, Polarity::ActiveHigh), Level::High);
        assert_eq!(to_level(LogicalState::On, Polarity::ActiveLow), Level::Low);
        assert_eq!(to_level(LogicalState::Off, Polarity::ActiveHigh), Level::Low);
        assert_eq!(to_level(LogicalState::Off, Polarity::ActiveLow), Level::High);
    }

    #[test]
    fn to_logical_inverts_to_level() {
        for state in STATES {
            for polarity in POLARITIES {
                assert_eq!(to_logical(to_level(state, polarity), polarity), state);
            }
        }
    }

    #[test]
    fn polarities_disagree_on_every_state() {
        for state in STATES {
            assert_ne!(
                to_level(state, Polarity::ActiveHigh),
                to_level(state, Polarity::ActiveLow)
            );
        }
    }

    #[test]
    fn parses_config_spellings() {
        assert_eq!("default_on".parse::<LogicalState>(), Ok(LogicalState::On));
        assert_eq!("OFF".parse::<LogicalState>(), Ok(LogicalState::Off));
        assert!("maybe".parse::<LogicalState>().is_err());

        assert_eq!("active_low".parse::<Polarity>(), Ok(Polarity::ActiveLow));
        assert_eq!("Active-High".parse::<Polarity>(), Ok(Polarity::ActiveHigh));
        assert!("inverted".parse::<Polarity>().is_err());
    }

    #[test]
    fn invert_flips() {
        assert_eq!(!LogicalState::On, LogicalState::Off);
        assert_eq!(LogicalState::Off.invert(), LogicalState::On);
    }
}
