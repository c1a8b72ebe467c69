use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::violation::KeyCombo;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("timer poll interval must be > 0 seconds")]
    InvalidPollInterval,

    #[error("autosave interval must be > 0 seconds")]
    InvalidAutosaveInterval,

    #[error("final warning must be > 0 seconds")]
    InvalidFinalWarning,

    #[error("first warning ({first}s) must be later than final warning ({last}s)")]
    InvalidWarningOrder { first: u32, last: u32 },
}

//
// ─── SETTINGS ──────────────────────────────────────────────────────────────────
//

/// Runtime tuning for an exam session: cadences, warning thresholds and the key
/// combinations that count as integrity violations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSessionSettings")]
pub struct SessionSettings {
    poll_interval_secs: u32,
    autosave_interval_secs: u32,
    first_warning_secs: u32,
    final_warning_secs: u32,
    disallowed_keys: Vec<KeyCombo>,
}

impl SessionSettings {
    /// Creates custom session settings.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if an interval is zero or the warnings are out of order.
    pub fn new(
        poll_interval_secs: u32,
        autosave_interval_secs: u32,
        first_warning_secs: u32,
        final_warning_secs: u32,
        disallowed_keys: Vec<KeyCombo>,
    ) -> Result<Self, SettingsError> {
        if poll_interval_secs == 0 {
            return Err(SettingsError::InvalidPollInterval);
        }
        if autosave_interval_secs == 0 {
            return Err(SettingsError::InvalidAutosaveInterval);
        }
        if final_warning_secs == 0 {
            return Err(SettingsError::InvalidFinalWarning);
        }
        if first_warning_secs <= final_warning_secs {
            return Err(SettingsError::InvalidWarningOrder {
                first: first_warning_secs,
                last: final_warning_secs,
            });
        }

        Ok(Self {
            poll_interval_secs,
            autosave_interval_secs,
            first_warning_secs,
            final_warning_secs,
            disallowed_keys,
        })
    }

    #[must_use]
    pub fn with_autosave_interval_secs(mut self, secs: u32) -> Self {
        if secs > 0 {
            self.autosave_interval_secs = secs;
        }
        self
    }

    #[must_use]
    pub fn poll_interval_secs(&self) -> u32 {
        self.poll_interval_secs
    }

    #[must_use]
    pub fn autosave_interval_secs(&self) -> u32 {
        self.autosave_interval_secs
    }

    #[must_use]
    pub fn first_warning_secs(&self) -> u32 {
        self.first_warning_secs
    }

    #[must_use]
    pub fn final_warning_secs(&self) -> u32 {
        self.final_warning_secs
    }

    #[must_use]
    pub fn disallowed_keys(&self) -> &[KeyCombo] {
        &self.disallowed_keys
    }

    #[must_use]
    pub fn is_disallowed(&self, combo: &KeyCombo) -> bool {
        self.disallowed_keys.contains(combo)
    }

    #[must_use]
    pub fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(u64::from(self.poll_interval_secs))
    }

    #[must_use]
    pub fn autosave_interval(&self) -> StdDuration {
        StdDuration::from_secs(u64::from(self.autosave_interval_secs))
    }

    #[must_use]
    pub fn first_warning(&self) -> Duration {
        Duration::seconds(i64::from(self.first_warning_secs))
    }

    #[must_use]
    pub fn final_warning(&self) -> Duration {
        Duration::seconds(i64::from(self.final_warning_secs))
    }
}

impl Default for SessionSettings {
    /// 1s timer poll, 30s autosave, warnings at 15 and 5 minutes remaining.
    fn default() -> Self {
        Self {
            poll_interval_secs: 1,
            autosave_interval_secs: 30,
            first_warning_secs: 15 * 60,
            final_warning_secs: 5 * 60,
            disallowed_keys: default_disallowed_keys(),
        }
    }
}

fn default_disallowed_keys() -> Vec<KeyCombo> {
    let mut keys: Vec<KeyCombo> = ["c", "v", "x", "p", "u"]
        .into_iter()
        .map(KeyCombo::ctrl)
        .collect();
    keys.push(KeyCombo {
        ctrl: true,
        shift: true,
        ..KeyCombo::key("i")
    });
    keys.push(KeyCombo::key("f12"));
    keys.push(KeyCombo::key("printscreen"));
    keys
}

/// Deserialization shape; missing fields fall back to the defaults.
#[derive(Deserialize)]
#[serde(default)]
struct RawSessionSettings {
    poll_interval_secs: u32,
    autosave_interval_secs: u32,
    first_warning_secs: u32,
    final_warning_secs: u32,
    disallowed_keys: Vec<KeyCombo>,
}

impl Default for RawSessionSettings {
    fn default() -> Self {
        let d = SessionSettings::default();
        Self {
            poll_interval_secs: d.poll_interval_secs,
            autosave_interval_secs: d.autosave_interval_secs,
            first_warning_secs: d.first_warning_secs,
            final_warning_secs: d.final_warning_secs,
            disallowed_keys: d.disallowed_keys,
        }
    }
}

impl TryFrom<RawSessionSettings> for SessionSettings {
    type Error = SettingsError;

    fn try_from(raw: RawSessionSettings) -> Result<Self, Self::Error> {
        Self::new(
            raw.poll_interval_secs,
            raw.autosave_interval_secs,
            raw.first_warning_secs,
            raw.final_warning_secs,
            raw.disallowed_keys,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_exam_cadences() {
        let settings = SessionSettings::default();
        assert_eq!(settings.poll_interval(), StdDuration::from_secs(1));
        assert_eq!(settings.autosave_interval(), StdDuration::from_secs(30));
        assert_eq!(settings.first_warning(), Duration::minutes(15));
        assert_eq!(settings.final_warning(), Duration::minutes(5));
        assert!(settings.is_disallowed(&KeyCombo::ctrl("c")));
        assert!(!settings.is_disallowed(&KeyCombo::key("a")));
    }

    #[test]
    fn rejects_out_of_order_warnings() {
        let err = SessionSettings::new(1, 30, 60, 60, Vec::new()).unwrap_err();
        assert_eq!(err, SettingsError::InvalidWarningOrder { first: 60, last: 60 });
    }

    #[test]
    fn rejects_zero_intervals() {
        assert_eq!(
            SessionSettings::new(0, 30, 900, 300, Vec::new()),
            Err(SettingsError::InvalidPollInterval)
        );
        assert_eq!(
            SessionSettings::new(1, 0, 900, 300, Vec::new()),
            Err(SettingsError::InvalidAutosaveInterval)
        );
    }

    #[test]
    fn partial_json_fills_defaults_and_validates() {
        let settings: SessionSettings =
            serde_json::from_str(r#"{"autosave_interval_secs": 10, "disallowed_keys": ["alt+tab"]}"#)
                .unwrap();
        assert_eq!(settings.autosave_interval_secs(), 10);
        assert_eq!(settings.first_warning_secs(), 900);
        assert_eq!(settings.disallowed_keys().len(), 1);

        let bad = serde_json::from_str::<SessionSettings>(r#"{"final_warning_secs": 0}"#);
        assert!(bad.is_err());
    }
}
