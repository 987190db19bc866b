//! Button roles and the keyword table that assigns them from device names.

use serde::Deserialize;

/// `KEY_POWER`
pub const KEY_POWER: u16 = 116;
/// `KEY_RESTART`, reported by most reset buttons.
pub const KEY_RESTART: u16 = 0x198;
/// `KEY_WPS_BUTTON`
pub const KEY_WPS_BUTTON: u16 = 0x211;

/// Logical grouping of a physical button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonRole {
    /// Power / select button.
    Primary,
    /// Secondary scroll / reset button.
    Auxiliary,
    /// Anything else. Events from these devices are ignored.
    Unknown,
}

impl std::fmt::Display for ButtonRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ButtonRole::Primary => write!(f, "PRIMARY"),
            ButtonRole::Auxiliary => write!(f, "AUXILIARY"),
            ButtonRole::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Case-insensitive substrings that classify a device by its name, and key
/// codes used when the name matches nothing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RoleKeywords {
    pub primary: Vec<String>,
    pub auxiliary: Vec<String>,
    pub primary_codes: Vec<u16>,
    pub auxiliary_codes: Vec<u16>,
}

impl Default for RoleKeywords {
    fn default() -> Self {
        Self {
            primary: vec!["pon".to_string(), "power".to_string()],
            auxiliary: vec!["wps".to_string(), "reset".to_string()],
            primary_codes: vec![KEY_POWER],
            auxiliary_codes: vec![KEY_WPS_BUTTON, KEY_RESTART],
        }
    }
}

impl RoleKeywords {
    /// Classify a device from its name, falling back to the keys it
    /// advertises. `supports` answers whether the device can emit a key code.
    pub fn classify_device(&self, name: &str, supports: impl Fn(u16) -> bool) -> ButtonRole {
        match self.classify(name) {
            ButtonRole::Unknown => {}
            role => return role,
        }
        if self.primary_codes.iter().any(|&code| supports(code)) {
            ButtonRole::Primary
        } else if self.auxiliary_codes.iter().any(|&code| supports(code)) {
            ButtonRole::Auxiliary
        } else {
            ButtonRole::Unknown
        }
    }

    /// Classify a device name. Primary keywords win when both tables match.
    pub fn classify(&self, name: &str) -> ButtonRole {
        let name = name.to_lowercase();
        if matches_any(&name, &self.primary) {
            ButtonRole::Primary
        } else if matches_any(&name, &self.auxiliary) {
            ButtonRole::Auxiliary
        } else {
            ButtonRole::Unknown
        }
    }
}

fn matches_any(name: &str, keywords: &[String]) -> bool {
    keywords
        .iter()
        .filter(|k| !k.is_empty())
        .any(|k| name.contains(&k.to_lowercase()))
}
