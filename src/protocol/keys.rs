//! Remote key codes and key actions.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// A remote-control key code such as `KEY_POWER`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(Cow<'static, str>);

impl Key {
    /// Power toggle
    pub const POWER: Key = Key::from_static("KEY_POWER");
    /// Home screen
    pub const HOME: Key = Key::from_static("KEY_HOME");
    /// Menu
    pub const MENU: Key = Key::from_static("KEY_MENU");
    /// Source selection
    pub const SOURCE: Key = Key::from_static("KEY_SOURCE");
    /// Back / return
    pub const RETURN: Key = Key::from_static("KEY_RETURN");
    /// Confirm
    pub const ENTER: Key = Key::from_static("KEY_ENTER");
    /// Navigate up
    pub const UP: Key = Key::from_static("KEY_UP");
    /// Navigate down
    pub const DOWN: Key = Key::from_static("KEY_DOWN");
    /// Navigate left
    pub const LEFT: Key = Key::from_static("KEY_LEFT");
    /// Navigate right
    pub const RIGHT: Key = Key::from_static("KEY_RIGHT");
    /// Volume up
    pub const VOLUME_UP: Key = Key::from_static("KEY_VOLUP");
    /// Volume down
    pub const VOLUME_DOWN: Key = Key::from_static("KEY_VOLDOWN");
    /// Mute toggle
    pub const MUTE: Key = Key::from_static("KEY_MUTE");
    /// Channel up
    pub const CHANNEL_UP: Key = Key::from_static("KEY_CHUP");
    /// Channel down
    pub const CHANNEL_DOWN: Key = Key::from_static("KEY_CHDOWN");
    /// Play
    pub const PLAY: Key = Key::from_static("KEY_PLAY");
    /// Pause
    pub const PAUSE: Key = Key::from_static("KEY_PAUSE");

    /// Key code from a static string, used as-is.
    pub const fn from_static(code: &'static str) -> Self {
        Key(Cow::Borrowed(code))
    }

    /// The wire key code.
    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Key {
    type Err = RemoteError;

    /// Accepts `KEY_POWER`, `key_power` or `power`; digits and underscores only otherwise.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(RemoteError::InvalidMessage("Empty key code".to_string()));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(RemoteError::InvalidMessage(format!("Invalid key code: {}", s)));
        }

        let upper = trimmed.to_ascii_uppercase();
        let code = if upper.starts_with("KEY_") {
            upper
        } else {
            format!("KEY_{}", upper)
        };
        Ok(Key(Cow::Owned(code)))
    }
}

/// What the device should do with a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAction {
    /// Press and release
    #[default]
    Click,
    /// Press and hold
    Press,
    /// Release a held key
    Release,
}

impl KeyAction {
    /// Wire name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Click => "Click",
            Self::Press => "Press",
            Self::Release => "Release",
        }
    }
}
