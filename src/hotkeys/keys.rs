//! Key and modifier types for global hotkeys
//!
//! Both types persist as human-readable strings (`"Ctrl+Shift"`, `"L"`, `"F5"`)
//! so config files stay hand-editable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// Bit-set of {Shift, Control, Alt, Win}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Modifiers(u8);

impl Modifiers {
    pub const NONE: Modifiers = Modifiers(0);
    pub const SHIFT: Modifiers = Modifiers(1 << 0);
    pub const CONTROL: Modifiers = Modifiers(1 << 1);
    pub const ALT: Modifiers = Modifiers(1 << 2);
    pub const WIN: Modifiers = Modifiers(1 << 3);

    const NAMES: [(Modifiers, &'static str); 4] = [
        (Modifiers::CONTROL, "Ctrl"),
        (Modifiers::SHIFT, "Shift"),
        (Modifiers::ALT, "Alt"),
        (Modifiers::WIN, "Win"),
    ];

    pub fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    fn parse_name(name: &str) -> Option<Modifiers> {
        match name.trim().to_ascii_uppercase().as_str() {
            "SHIFT" => Some(Modifiers::SHIFT),
            "CTRL" | "CONTROL" => Some(Modifiers::CONTROL),
            "ALT" => Some(Modifiers::ALT),
            "WIN" | "SUPER" | "META" => Some(Modifiers::WIN),
            _ => None,
        }
    }
}

impl BitOr for Modifiers {
    type Output = Modifiers;

    fn bitor(self, rhs: Modifiers) -> Modifiers {
        Modifiers(self.0 | rhs.0)
    }
}

impl BitOrAssign for Modifiers {
    fn bitor_assign(&mut self, rhs: Modifiers) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join("+"))
    }
}

impl FromStr for Modifiers {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut modifiers = Modifiers::NONE;
        for part in s.split('+').filter(|p| !p.trim().is_empty()) {
            modifiers |= Modifiers::parse_name(part)
                .ok_or_else(|| format!("unknown modifier '{}'", part.trim()))?;
        }
        Ok(modifiers)
    }
}

impl From<Modifiers> for String {
    fn from(modifiers: Modifiers) -> Self {
        modifiers.to_string()
    }
}

impl TryFrom<String> for Modifiers {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Key code of a global hotkey. `None` means "no hotkey bound".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Key {
    #[default]
    None,
    /// ASCII letter or digit, stored upper-case
    Char(char),
    /// Function key F1..=F24
    F(u8),
    Space,
    Tab,
    Escape,
    Insert,
    Delete,
    Home,
    End,
    PageUp,
    PageDown,
    Pause,
    ScrollLock,
}

impl Key {
    /// Letters compare upper-case; both cases share one physical key
    pub fn normalized(self) -> Key {
        match self {
            Key::Char(c) => Key::Char(c.to_ascii_uppercase()),
            other => other,
        }
    }

    /// X11 keysym for this key, `None` for [`Key::None`]
    pub fn keysym(self) -> Option<u32> {
        let sym = match self {
            Key::None => return None,
            // Latin-1 keysyms equal their lower-case ASCII codes
            Key::Char(c) => c.to_ascii_lowercase() as u32,
            Key::F(n) => 0xffbe + (n as u32).saturating_sub(1),
            Key::Space => 0x0020,
            Key::Tab => 0xff09,
            Key::Escape => 0xff1b,
            Key::Insert => 0xff63,
            Key::Delete => 0xffff,
            Key::Home => 0xff50,
            Key::End => 0xff57,
            Key::PageUp => 0xff55,
            Key::PageDown => 0xff56,
            Key::Pause => 0xff13,
            Key::ScrollLock => 0xff14,
        };
        Some(sym)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::None => f.write_str("None"),
            Key::Char(c) => write!(f, "{}", c),
            Key::F(n) => write!(f, "F{}", n),
            Key::Space => f.write_str("Space"),
            Key::Tab => f.write_str("Tab"),
            Key::Escape => f.write_str("Escape"),
            Key::Insert => f.write_str("Insert"),
            Key::Delete => f.write_str("Delete"),
            Key::Home => f.write_str("Home"),
            Key::End => f.write_str("End"),
            Key::PageUp => f.write_str("PageUp"),
            Key::PageDown => f.write_str("PageDown"),
            Key::Pause => f.write_str("Pause"),
            Key::ScrollLock => f.write_str("ScrollLock"),
        }
    }
}

impl FromStr for Key {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let key = match upper.as_str() {
            "" | "NONE" => Key::None,
            "SPACE" => Key::Space,
            "TAB" => Key::Tab,
            "ESC" | "ESCAPE" => Key::Escape,
            "INS" | "INSERT" => Key::Insert,
            "DEL" | "DELETE" => Key::Delete,
            "HOME" => Key::Home,
            "END" => Key::End,
            "PAGEUP" | "PGUP" => Key::PageUp,
            "PAGEDOWN" | "PGDN" => Key::PageDown,
            "PAUSE" => Key::Pause,
            "SCROLLLOCK" => Key::ScrollLock,
            _ if upper.len() > 1 && upper.starts_with('F') => match upper[1..].parse::<u8>() {
                Ok(n) if (1..=24).contains(&n) => Key::F(n),
                _ => return Err(format!("unknown key '{}'", s.trim())),
            },
            _ => {
                let mut chars = upper.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_alphanumeric() => Key::Char(c),
                    _ => return Err(format!("unknown key '{}'", s.trim())),
                }
            }
        };
        Ok(key)
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for Key {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Resolved (modifier-set, key) combination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hotkey {
    pub modifiers: Modifiers,
    pub key: Key,
}

impl Hotkey {
    pub fn new(modifiers: Modifiers, key: Key) -> Self {
        Self {
            modifiers,
            key: key.normalized(),
        }
    }

    pub fn normalized(self) -> Self {
        Self::new(self.modifiers, self.key)
    }
}

impl fmt::Display for Hotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.modifiers.is_empty() {
            write!(f, "{}", self.key)
        } else {
            write!(f, "{}+{}", self.modifiers, self.key)
        }
    }
}

impl FromStr for Hotkey {
    type Err = String;

    /// Parse "Ctrl+Shift+L" style strings; the last part is the key
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (modifiers, key) = match s.rsplit_once('+') {
            Some((mods, key)) => (mods.parse()?, key.parse()?),
            None => (Modifiers::NONE, s.parse()?),
        };
        Ok(Hotkey::new(modifiers, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hotkey_with_modifiers() {
        let hotkey: Hotkey = "Ctrl+Shift+L".parse().unwrap();
        assert_eq!(hotkey.modifiers, Modifiers::CONTROL | Modifiers::SHIFT);
        assert_eq!(hotkey.key, Key::Char('L'));
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let hotkey: Hotkey = "control+alt+f5".parse().unwrap();
        assert_eq!(hotkey.modifiers, Modifiers::CONTROL | Modifiers::ALT);
        assert_eq!(hotkey.key, Key::F(5));
    }

    #[test]
    fn test_parse_rejects_unknown_parts() {
        assert!("Hyper+L".parse::<Hotkey>().is_err());
        assert!("Ctrl+F30".parse::<Hotkey>().is_err());
        assert!("Ctrl+Enterprise".parse::<Hotkey>().is_err());
    }

    #[test]
    fn test_display_orders_modifiers() {
        let hotkey = Hotkey::new(Modifiers::SHIFT | Modifiers::CONTROL | Modifiers::WIN, Key::Home);
        assert_eq!(hotkey.to_string(), "Ctrl+Shift+Win+Home");
        assert_eq!(Hotkey::new(Modifiers::NONE, Key::F(12)).to_string(), "F12");
    }

    #[test]
    fn test_letter_case_is_normalized() {
        assert_eq!(Hotkey::new(Modifiers::CONTROL, Key::Char('l')).key, Key::Char('L'));
        let literal = Hotkey {
            modifiers: Modifiers::NONE,
            key: Key::Char('q'),
        };
        assert_eq!(literal.normalized(), Hotkey::new(Modifiers::NONE, Key::Char('Q')));
        assert_eq!(Key::F(3).normalized(), Key::F(3));
    }

    #[test]
    fn test_keysyms() {
        assert_eq!(Key::Char('L').keysym(), Some(0x6c));
        assert_eq!(Key::Char('7').keysym(), Some(0x37));
        assert_eq!(Key::F(1).keysym(), Some(0xffbe));
        assert_eq!(Key::F(12).keysym(), Some(0xffc9));
        assert_eq!(Key::None.keysym(), None);
    }

    #[test]
    fn test_serde_uses_strings() {
        let json = serde_json::to_string(&(Modifiers::CONTROL | Modifiers::ALT)).unwrap();
        assert_eq!(json, "\"Ctrl+Alt\"");
        let key: Key = serde_json::from_str("\"PageUp\"").unwrap();
        assert_eq!(key, Key::PageUp);
        let none: Modifiers = serde_json::from_str("\"\"").unwrap();
        assert!(none.is_empty());
    }
}
