use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::polarity::{LogicalState, Polarity};

/// Stable device identifier. Configuration may give it as a string or an
/// integer; both are kept in their textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(u64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(text) => Self(text),
            RawId::Number(n) => Self(n.to_string()),
        })
    }
}

impl Borrow<str> for DeviceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A configured output together with its last successfully written state.
///
/// `current_state` is `None` until the device has been driven at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub icon: String,
    pub pin: u32,
    pub polarity: Polarity,
    pub default_state: LogicalState,
    pub current_state: Option<LogicalState>,
}

impl Device {
    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            icon: self.icon.clone(),
            current_state: self.current_state,
        }
    }

    pub fn state_view(&self) -> DeviceStateView {
        DeviceStateView {
            id: self.id.clone(),
            current_state: self.current_state,
        }
    }
}

/// Entry of the device listing shown in the sidebar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSummary {
    pub id: DeviceId,
    pub name: String,
    pub icon: String,
    pub current_state: Option<LogicalState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStateView {
    pub id: DeviceId,
    pub current_state: Option<LogicalState>,
}
