use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

//
// ─── KEY COMBOS ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum KeyComboParseError {
    #[error("key combination is empty")]
    Empty,

    #[error("unknown modifier: {0}")]
    UnknownModifier(String),
}

/// A keyboard shortcut such as `ctrl+shift+i`. Keys compare case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct KeyCombo {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
    pub key: String,
}

impl KeyCombo {
    #[must_use]
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into().to_lowercase(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn ctrl(key: impl Into<String>) -> Self {
        Self {
            ctrl: true,
            ..Self::key(key)
        }
    }
}

impl FromStr for KeyCombo {
    type Err = KeyComboParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts: Vec<String> = s
            .split('+')
            .map(|part| part.trim().to_lowercase())
            .collect();
        let key = parts.pop().filter(|k| !k.is_empty()).ok_or(KeyComboParseError::Empty)?;

        let mut combo = Self::key(key);
        for modifier in parts {
            match modifier.as_str() {
                "ctrl" | "control" => combo.ctrl = true,
                "alt" | "option" => combo.alt = true,
                "shift" => combo.shift = true,
                "meta" | "cmd" | "super" => combo.meta = true,
                _ => return Err(KeyComboParseError::UnknownModifier(modifier)),
            }
        }
        Ok(combo)
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (on, name) in [
            (self.ctrl, "ctrl"),
            (self.alt, "alt"),
            (self.shift, "shift"),
            (self.meta, "meta"),
        ] {
            if on {
                write!(f, "{name}+")?;
            }
        }
        f.write_str(&self.key)
    }
}

impl Serialize for KeyCombo {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for KeyCombo {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

//
// ─── SIGNALS ───────────────────────────────────────────────────────────────────
//

/// Raw environment events published by the host while an exam is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentSignal {
    VisibilityChanged { hidden: bool },
    KeyCombo(KeyCombo),
    ContextMenu,
}

//
// ─── VIOLATIONS ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    VisibilityHidden,
    DisallowedKeyCombo,
    ContextMenu,
}

/// One recorded integrity signal. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub at: DateTime<Utc>,
    pub description: String,
}

impl Violation {
    #[must_use]
    pub fn new(kind: ViolationKind, at: DateTime<Utc>, description: impl Into<String>) -> Self {
        Self {
            kind,
            at,
            description: description.into(),
        }
    }
}
