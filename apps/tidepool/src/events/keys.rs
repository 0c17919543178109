//! Platform modifier mapping and key descriptors such as `Ctrl:c` or
//! `Cmd:Shift:Enter`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{KeyData, PointerData};

/// Host OS family. Decides which raw modifier backs `cmd` and `option`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Mac,
    #[default]
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::Mac
        } else {
            Platform::Other
        }
    }

    /// `(cmd, option)` for the raw `meta`/`alt` flags.
    pub fn logical_modifiers(self, meta: bool, alt: bool) -> (bool, bool) {
        match self {
            Platform::Mac => (meta, alt),
            Platform::Other => (alt, meta),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown platform '{0}' (expected mac or other)")]
pub struct UnknownPlatform(String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mac" | "macos" | "darwin" => Ok(Platform::Mac),
            "other" | "linux" | "windows" => Ok(Platform::Other),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::Mac => "mac",
            Platform::Other => "other",
        })
    }
}

/// Raw keyboard event as the host saw it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawKey {
    pub key_type: String,
    pub key: String,
    pub code: String,
    pub repeat: bool,
    pub location: u32,
    pub shift: bool,
    pub control: bool,
    pub alt: bool,
    pub meta: bool,
}

impl RawKey {
    pub fn keydown(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            key_type: "keydown".into(),
            code: key.clone(),
            key,
            ..Self::default()
        }
    }

    pub fn with_control(mut self) -> Self {
        self.control = true;
        self
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn with_meta(mut self) -> Self {
        self.meta = true;
        self
    }

    pub fn with_alt(mut self) -> Self {
        self.alt = true;
        self
    }

    pub fn annotate(&self, platform: Platform) -> KeyData {
        let (cmd, option) = platform.logical_modifiers(self.meta, self.alt);
        KeyData {
            key_type: self.key_type.clone(),
            key: self.key.clone(),
            code: self.code.clone(),
            repeat: self.repeat,
            location: self.location,
            shift: self.shift,
            control: self.control,
            alt: self.alt,
            meta: self.meta,
            cmd,
            option,
        }
    }
}

/// Raw pointer event: buttons plus absolute and relative coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawPointer {
    pub button: i32,
    pub buttons: i32,
    pub client: (i32, i32),
    pub page: (i32, i32),
    pub screen: (i32, i32),
    pub movement: (i32, i32),
    pub shift: bool,
    pub control: bool,
    pub alt: bool,
    pub meta: bool,
}

impl RawPointer {
    pub fn annotate(&self, platform: Platform) -> PointerData {
        let (cmd, option) = platform.logical_modifiers(self.meta, self.alt);
        PointerData {
            button: self.button,
            buttons: self.buttons,
            client_x: self.client.0,
            client_y: self.client.1,
            page_x: self.page.0,
            page_y: self.page.1,
            screen_x: self.screen.0,
            screen_y: self.screen.1,
            movement_x: self.movement.0,
            movement_y: self.movement.1,
            shift: self.shift,
            control: self.control,
            alt: self.alt,
            meta: self.meta,
            cmd,
            option,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("empty key descriptor")]
    Empty,
    #[error("unknown modifier '{0}' in key descriptor")]
    UnknownModifier(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Modifiers {
    shift: bool,
    ctrl: bool,
    alt: bool,
    meta: bool,
    cmd: bool,
    option: bool,
}

/// A parsed `Mod:Mod:key` pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyDescriptor {
    mods: Modifiers,
    key: String,
}

impl KeyDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let mut parts: Vec<&str> = descriptor.split(':').collect();
        // "Ctrl::" names the colon key itself
        if descriptor.ends_with("::") {
            parts.truncate(parts.len().saturating_sub(2));
            parts.push(":");
        }
        let key = parts.pop().filter(|key| !key.is_empty()).ok_or(DescriptorError::Empty)?;

        let mut mods = Modifiers::default();
        for part in parts {
            match part {
                "Shift" => mods.shift = true,
                "Ctrl" => mods.ctrl = true,
                "Alt" => mods.alt = true,
                "Meta" => mods.meta = true,
                "Cmd" => mods.cmd = true,
                "Option" => mods.option = true,
                other => return Err(DescriptorError::UnknownModifier(other.to_string())),
            }
        }
        Ok(Self {
            mods,
            key: key.to_string(),
        })
    }

    /// True when exactly the named modifiers are down and the key matches.
    /// Single-character keys compare case-insensitively.
    pub fn matches(&self, key: &KeyData, platform: Platform) -> bool {
        let mac = platform == Platform::Mac;
        let want_alt = self.mods.alt || (self.mods.cmd && !mac) || (self.mods.option && mac);
        let want_meta = self.mods.meta || (self.mods.cmd && mac) || (self.mods.option && !mac);
        if key.shift != self.mods.shift
            || key.control != self.mods.ctrl
            || key.alt != want_alt
            || key.meta != want_meta
        {
            return false;
        }
        if self.key.chars().count() == 1 {
            self.key.eq_ignore_ascii_case(&key.key)
        } else {
            self.key == key.key
        }
    }
}

impl FromStr for KeyDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Convenience for one-off checks against a descriptor string. Malformed
/// descriptors never match.
pub fn key_matches(descriptor: &str, key: &KeyData, platform: Platform) -> bool {
    KeyDescriptor::parse(descriptor).is_ok_and(|parsed| parsed.matches(key, platform))
}
