//! Global hotkeys: chord parsing and the registration table.
//!
//! The OS registration call lives behind `HotkeyBackend`. `HotkeyRegistry`
//! keeps callbacks in a slab, so the slab key doubles as the id handed to
//! the OS and carried back in its hotkey message.

use std::fmt;
use std::str::FromStr;

use slab::Slab;

pub const CAPTURE_HOTKEY: &str = "Ctrl+Alt+I";
pub const QUICK_EDIT_HOTKEY: &str = "Ctrl+Alt+E";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

impl Modifiers {
    pub const CTRL_ALT: Modifiers = Modifiers {
        ctrl: true,
        alt: true,
        shift: false,
        meta: false,
    };
}

/// Windows virtual-key code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyCode(pub u32);

const NAMED_KEYS: &[(&str, u32)] = &[
    ("Backspace", 0x08),
    ("Tab", 0x09),
    ("Enter", 0x0D),
    ("Esc", 0x1B),
    ("Space", 0x20),
    ("PageUp", 0x21),
    ("PageDown", 0x22),
    ("End", 0x23),
    ("Home", 0x24),
    ("Left", 0x25),
    ("Up", 0x26),
    ("Right", 0x27),
    ("Down", 0x28),
    ("PrintScreen", 0x2C),
    ("Insert", 0x2D),
    ("Delete", 0x2E),
];

const VK_F1: u32 = 0x70;

impl KeyCode {
    /// Parse a key name: a letter, a digit, `F1`-`F24`, or a named key.
    pub fn from_name(name: &str) -> Option<KeyCode> {
        let upper = name.trim().to_ascii_uppercase();
        let alias = match upper.as_str() {
            "RETURN" => "ENTER",
            "ESCAPE" => "ESC",
            "DEL" => "DELETE",
            "PGUP" => "PAGEUP",
            "PGDN" => "PAGEDOWN",
            "INS" => "INSERT",
            "PRTSC" => "PRINTSCREEN",
            other => other,
        };

        if let Some((_, code)) = NAMED_KEYS
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(alias))
        {
            return Some(KeyCode(*code));
        }

        let mut chars = alias.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphanumeric() => Some(KeyCode(c as u32)),
            (Some('F'), Some(_)) => match alias[1..].parse::<u32>() {
                Ok(n @ 1..=24) => Some(KeyCode(VK_F1 + n - 1)),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn name(self) -> String {
        if let Some((name, _)) = NAMED_KEYS.iter().find(|(_, c)| *c == self.0) {
            return name.to_string();
        }
        match self.0 {
            c @ (0x30..=0x39 | 0x41..=0x5A) => char::from_u32(c).map(String::from).unwrap_or_default(),
            c @ 0x70..=0x87 => format!("F{}", c - VK_F1 + 1),
            c => format!("0x{:02X}", c),
        }
    }
}

/// A modifier set plus one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chord {
    pub modifiers: Modifiers,
    pub key: KeyCode,
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.modifiers;
        for (held, name) in [(m.ctrl, "Ctrl"), (m.alt, "Alt"), (m.shift, "Shift"), (m.meta, "Win")] {
            if held {
                write!(f, "{}+", name)?;
            }
        }
        write!(f, "{}", self.key.name())
    }
}

impl FromStr for Chord {
    type Err = HotkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_chord(s)
    }
}

/// Parse a chord string like `"Ctrl+Alt+I"` or `"Cmd+Shift+F5"`.
pub fn parse_chord(s: &str) -> Result<Chord, HotkeyError> {
    let mut modifiers = Modifiers::default();
    let mut key: Option<KeyCode> = None;

    for part in s.split('+') {
        let upper = part.trim().to_ascii_uppercase();
        match upper.as_str() {
            "CTRL" | "CONTROL" => modifiers.ctrl = true,
            "ALT" | "OPTION" => modifiers.alt = true,
            "SHIFT" => modifiers.shift = true,
            "WIN" | "META" | "CMD" | "COMMAND" | "SUPER" => modifiers.meta = true,
            "" => {}
            _ => {
                let parsed = KeyCode::from_name(&upper)
                    .ok_or_else(|| HotkeyError::Parse(format!("unknown key '{}' in '{}'", part.trim(), s)))?;
                if key.replace(parsed).is_some() {
                    return Err(HotkeyError::Parse(format!("more than one key in '{}'", s)));
                }
            }
        }
    }

    let key = key.ok_or_else(|| HotkeyError::Parse(format!("no key in '{}'", s)))?;
    Ok(Chord { modifiers, key })
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HotkeyError {
    #[error("Invalid hotkey: {0}")]
    Parse(String),

    #[error("Hotkey {0} is already registered")]
    Duplicate(Chord),

    #[error("OS rejected hotkey: {0}")]
    Backend(String),

    #[error("No hotkey registered with id {0:?}")]
    UnknownId(HotkeyId),
}

/// Opaque registration handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HotkeyId(usize);

impl HotkeyId {
    /// The integer id passed to the OS.
    pub fn raw(self) -> usize {
        self.0
    }
}

/// OS-level registration.
pub trait HotkeyBackend {
    fn register(&mut self, id: HotkeyId, chord: &Chord) -> Result<(), HotkeyError>;
    fn unregister(&mut self, id: HotkeyId, chord: &Chord) -> Result<(), HotkeyError>;
}

struct Registration {
    chord: Chord,
    callback: Box<dyn FnMut() + Send>,
}

/// Table of live hotkeys. Everything still registered is released on drop.
pub struct HotkeyRegistry<H: HotkeyBackend> {
    backend: H,
    entries: Slab<Registration>,
}

impl<H: HotkeyBackend> HotkeyRegistry<H> {
    pub fn new(backend: H) -> Self {
        Self {
            backend,
            entries: Slab::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn chord(&self, id: HotkeyId) -> Option<Chord> {
        self.entries.get(id.0).map(|r| r.chord)
    }

    /// Register `chord`. Nothing is stored if the OS refuses it.
    pub fn register<F>(&mut self, chord: Chord, callback: F) -> Result<HotkeyId, HotkeyError>
    where
        F: FnMut() + Send + 'static,
    {
        if self.entries.iter().any(|(_, r)| r.chord == chord) {
            return Err(HotkeyError::Duplicate(chord));
        }

        let entry = self.entries.vacant_entry();
        let id = HotkeyId(entry.key());
        if let Err(e) = self.backend.register(id, &chord) {
            log::error!("[HOTKEY] Failed to register {}: {}", chord, e);
            return Err(e);
        }
        entry.insert(Registration {
            chord,
            callback: Box::new(callback),
        });
        log::info!("[HOTKEY] Registered {} as {}", chord, id.0);
        Ok(id)
    }

    /// Run the callback bound to the given OS id. Returns false if unknown.
    pub fn dispatch_id(&mut self, id: usize) -> bool {
        match self.entries.get_mut(id) {
            Some(registration) => {
                log::debug!("[HOTKEY] {} pressed", registration.chord);
                (registration.callback)();
                true
            }
            None => {
                log::warn!("[HOTKEY] Message for unknown id {}", id);
                false
            }
        }
    }

    /// Run the callback bound to `chord`. Returns false if nothing matches.
    pub fn dispatch(&mut self, chord: &Chord) -> bool {
        let found = self
            .entries
            .iter()
            .find(|(_, r)| r.chord == *chord)
            .map(|(key, _)| key);
        match found {
            Some(key) => self.dispatch_id(key),
            None => false,
        }
    }

    /// Release one hotkey. If the OS refuses, the entry stays so a later
    /// `unregister_all` can retry it.
    pub fn unregister(&mut self, id: HotkeyId) -> Result<(), HotkeyError> {
        let chord = self.chord(id).ok_or(HotkeyError::UnknownId(id))?;
        self.backend.unregister(id, &chord)?;
        self.entries.remove(id.0);
        log::info!("[HOTKEY] Unregistered {}", chord);
        Ok(())
    }

    /// Release every registration. Backend failures are logged, not returned,
    /// so one stuck hotkey does not keep the rest registered.
    pub fn unregister_all(&mut self) {
        let keys: Vec<usize> = self.entries.iter().map(|(key, _)| key).collect();
        for key in keys {
            let registration = self.entries.remove(key);
            if let Err(e) = self.backend.unregister(HotkeyId(key), &registration.chord) {
                log::warn!("[HOTKEY] Failed to unregister {}: {}", registration.chord, e);
            }
        }
    }
}

impl<H: HotkeyBackend> Drop for HotkeyRegistry<H> {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            self.unregister_all();
        }
    }
}
