//! Static lookup tables for colors, hub types, device types and ports.
//!
//! Hub-type and device-type codes are open-ended: hubs may report codes this
//! table does not know yet, so they are modelled as integer newtypes that
//! resolve to "Unknown" instead of failing. Colors are user input and resolve
//! strictly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Display name for any code missing from a table
pub const UNKNOWN: &str = "Unknown";

/// LED color names and their hub color codes (exact, case-sensitive match)
pub const COLORS: [(&str, u8); 11] = [
    ("black", 0),
    ("pink", 1),
    ("purple", 2),
    ("blue", 3),
    ("light-blue", 4),
    ("cyan", 5),
    ("green", 6),
    ("yellow", 7),
    ("orange", 8),
    ("red", 9),
    ("white", 10),
];

const HUB_TYPES: &[(u8, &str)] = &[
    (0, UNKNOWN),
    (1, "WeDo2 Smart Hub"),
    (2, "Boost Move Hub"),
    (3, "Powered Up Hub"),
    (4, "Powered Up Remote"),
    (5, "Duplo Train Hub"),
];

const DEVICE_TYPES: &[(u8, &str)] = &[
    (0, UNKNOWN),
    (1, "Basic Motor"),
    (2, "Train Motor"),
    (8, "Led Lights"),
    (22, "Boost Led"),
    (34, "WeDo2 Tilt"),
    (35, "WeDo2 Distance"),
    (37, "Boost Distance"),
    (38, "Boost Tacho Motor"),
    (39, "Boost Move Hub Motor"),
    (40, "Boost Tilt"),
    (41, "Duplo Train Base Motor"),
    (42, "Duplo Train Base Speaker"),
    (43, "Duplo Train Base Color"),
    (44, "Duplo Train Base Speedmeter"),
    (55, "Powered Up Remote Button"),
];

/// Addressable ports, in query order
pub const PORTS: [&str; 2] = ["A", "B"];

/// Numeric LED color code accepted by the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColorCode(pub u8);

impl ColorCode {
    /// Resolve a color name. `None` means the name is not in the table;
    /// `Some(ColorCode(0))` (black) is a valid selection.
    pub fn from_name(name: &str) -> Option<Self> {
        COLORS
            .iter()
            .find(|(color, _)| *color == name)
            .map(|&(_, code)| Self(code))
    }
}

impl fmt::Display for ColorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hardware family reported by a hub
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HubTypeCode(pub u8);

impl HubTypeCode {
    pub const UNKNOWN: Self = Self(0);
    pub const REMOTE: Self = Self(4);

    pub fn name(self) -> &'static str {
        lookup_name(HUB_TYPES, self.0)
    }

    /// Ports this hub family exposes. Remotes only carry buttons.
    pub fn ports(self) -> &'static [&'static str] {
        if self == Self::REMOTE {
            &[]
        } else {
            &PORTS
        }
    }
}

/// Kind of peripheral attached to a port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceTypeCode(pub u8);

impl DeviceTypeCode {
    pub const UNKNOWN: Self = Self(0);
    pub const TRAIN_MOTOR: Self = Self(2);
    pub const LED_LIGHTS: Self = Self(8);

    pub fn name(self) -> &'static str {
        lookup_name(DEVICE_TYPES, self.0)
    }

    /// Whether motor commands may target this device
    pub fn is_motor(self) -> bool {
        self == Self::TRAIN_MOTOR
    }
}

impl fmt::Display for DeviceTypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// `{ "id": 2, "name": "Train Motor" }` as rendered in hub listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeInfo {
    pub id: u8,
    pub name: String,
}

impl From<HubTypeCode> for TypeInfo {
    fn from(code: HubTypeCode) -> Self {
        Self {
            id: code.0,
            name: code.name().to_string(),
        }
    }
}

fn lookup_name(table: &[(u8, &'static str)], code: u8) -> &'static str {
    table
        .iter()
        .find(|(id, _)| *id == code)
        .map(|&(_, name)| name)
        .unwrap_or(UNKNOWN)
}
