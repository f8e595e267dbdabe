//! Global key binding that wipes the persisted cache.

use color_eyre::{eyre::eyre, Report, Result};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::cache::QueryCache;

/// A modifier + character key combination, written like `ctrl+shift+k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct KeyCombo {
  pub ctrl: bool,
  pub shift: bool,
  pub alt: bool,
  /// Lowercase ASCII character
  pub key: char,
}

/// Binding that opens developer tools; never used for anything else.
pub const DEVTOOLS_COMBO: KeyCombo = KeyCombo {
  ctrl: true,
  shift: true,
  alt: false,
  key: 'i',
};

/// Default binding for clearing the cache.
pub const DEFAULT_CLEAR_COMBO: KeyCombo = KeyCombo {
  ctrl: true,
  shift: true,
  alt: false,
  key: 'k',
};

impl KeyCombo {
  /// Whether a terminal key event is this combination.
  ///
  /// Terminals report a shifted letter either as an uppercase char, as the
  /// SHIFT modifier, or both; all three count as shift.
  pub fn matches(&self, event: &KeyEvent) -> bool {
    if event.kind != KeyEventKind::Press {
      return false;
    }
    let KeyCode::Char(c) = event.code else {
      return false;
    };

    let shift = event.modifiers.contains(KeyModifiers::SHIFT) || c.is_ascii_uppercase();
    c.to_ascii_lowercase() == self.key
      && event.modifiers.contains(KeyModifiers::CONTROL) == self.ctrl
      && event.modifiers.contains(KeyModifiers::ALT) == self.alt
      && shift == self.shift
  }
}

impl FromStr for KeyCombo {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self> {
    let mut combo = KeyCombo {
      ctrl: false,
      shift: false,
      alt: false,
      key: '\0',
    };

    for part in s.split('+').map(|p| p.trim().to_lowercase()) {
      match part.as_str() {
        "ctrl" | "control" => combo.ctrl = true,
        "shift" => combo.shift = true,
        "alt" | "option" => combo.alt = true,
        other => {
          let mut chars = other.chars();
          match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphanumeric() && combo.key == '\0' => combo.key = c,
            _ => return Err(eyre!("Invalid key combination '{}'", s)),
          }
        }
      }
    }

    if combo.key == '\0' {
      return Err(eyre!("Key combination '{}' has no key", s));
    }
    Ok(combo)
  }
}

impl TryFrom<String> for KeyCombo {
  type Error = Report;

  fn try_from(value: String) -> Result<Self> {
    value.parse()
  }
}

impl fmt::Display for KeyCombo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.ctrl {
      write!(f, "Ctrl+")?;
    }
    if self.alt {
      write!(f, "Alt+")?;
    }
    if self.shift {
      write!(f, "Shift+")?;
    }
    write!(f, "{}", self.key.to_ascii_uppercase())
  }
}

/// Clears the persisted cache when its key combination is pressed.
#[derive(Debug, Clone, Copy)]
pub struct ClearTrigger {
  combo: KeyCombo,
}

impl ClearTrigger {
  /// Rejects the developer-tools binding.
  pub fn new(combo: KeyCombo) -> Result<Self> {
    if combo == DEVTOOLS_COMBO {
      return Err(eyre!(
        "{} is reserved for developer tools and can't clear the cache",
        combo
      ));
    }
    Ok(Self { combo })
  }

  pub fn combo(&self) -> KeyCombo {
    self.combo
  }

  pub fn matches(&self, event: &KeyEvent) -> bool {
    !DEVTOOLS_COMBO.matches(event) && self.combo.matches(event)
  }

  /// Delete the active snapshot and every in-memory record. Safe to repeat.
  ///
  /// The caller is responsible for reloading afterwards.
  pub fn fire(&self, cache: &QueryCache) {
    cache.clear();
    info!(key = cache.storage_key(), "Cache cleared from keyboard");
  }
}

impl Default for ClearTrigger {
  fn default() -> Self {
    Self {
      combo: DEFAULT_CLEAR_COMBO,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSettings, MemoryStorage, QueryKey, SnapshotStore};
  use serde_json::json;
  use std::sync::Arc;

  fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
    KeyEvent::new(code, modifiers)
  }

  #[test]
  fn test_parse_combo() {
    let combo: KeyCombo = "Ctrl+Shift+K".parse().unwrap();
    assert_eq!(combo, DEFAULT_CLEAR_COMBO);
    assert_eq!(combo.to_string(), "Ctrl+Shift+K");

    let combo: KeyCombo = "alt + r".parse().unwrap();
    assert!(combo.alt && !combo.ctrl && !combo.shift);
    assert_eq!(combo.key, 'r');
  }

  #[test]
  fn test_parse_rejects_garbage() {
    assert!("ctrl+shift".parse::<KeyCombo>().is_err());
    assert!("ctrl+kk".parse::<KeyCombo>().is_err());
    assert!("ctrl+k+j".parse::<KeyCombo>().is_err());
    assert!("".parse::<KeyCombo>().is_err());
  }

  #[test]
  fn test_matches_shift_variants() {
    let trigger = ClearTrigger::default();
    let ctrl_shift = KeyModifiers::CONTROL | KeyModifiers::SHIFT;

    assert!(trigger.matches(&key(KeyCode::Char('K'), ctrl_shift)));
    assert!(trigger.matches(&key(KeyCode::Char('k'), ctrl_shift)));
    assert!(trigger.matches(&key(KeyCode::Char('K'), KeyModifiers::CONTROL)));
  }

  #[test]
  fn test_does_not_match_neighbours() {
    let trigger = ClearTrigger::default();

    assert!(!trigger.matches(&key(KeyCode::Char('k'), KeyModifiers::CONTROL)));
    assert!(!trigger.matches(&key(KeyCode::Char('k'), KeyModifiers::NONE)));
    assert!(!trigger.matches(&key(KeyCode::Char('K'), KeyModifiers::SHIFT)));
    assert!(!trigger.matches(&key(
      KeyCode::Char('K'),
      KeyModifiers::CONTROL | KeyModifiers::SHIFT | KeyModifiers::ALT
    )));
  }

  #[test]
  fn test_ignores_release_events() {
    let trigger = ClearTrigger::default();
    let mut event = key(
      KeyCode::Char('K'),
      KeyModifiers::CONTROL | KeyModifiers::SHIFT,
    );
    event.kind = KeyEventKind::Release;
    assert!(!trigger.matches(&event));
  }

  #[test]
  fn test_devtools_binding_is_never_intercepted() {
    assert!(ClearTrigger::new("ctrl+shift+i".parse().unwrap()).is_err());

    let trigger = ClearTrigger::default();
    assert!(!trigger.matches(&key(
      KeyCode::Char('I'),
      KeyModifiers::CONTROL | KeyModifiers::SHIFT
    )));
  }

  #[test]
  fn test_fire_twice_is_same_as_once() {
    let storage = Arc::new(MemoryStorage::new());
    let cache = crate::cache::QueryCache::new(storage.clone(), CacheSettings::default());
    cache.set(&QueryKey::new(["home"]), json!({"hero": "Studio"}), false);
    storage.set_item("theme", "dark").unwrap();

    let trigger = ClearTrigger::default();
    trigger.fire(&cache);
    let once = storage.keys().unwrap();
    trigger.fire(&cache);
    let twice = storage.keys().unwrap();

    assert_eq!(once, vec!["theme"]);
    assert_eq!(once, twice);
    assert!(!cache.has_data(&QueryKey::new(["home"])));
  }
}
