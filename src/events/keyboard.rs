use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

/// Каноническая клавиша, независимая от платформы
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    N,
    O,
    P,
    Q,
    R,
    S,
    T,
    U,
    V,
    W,
    X,
    Y,
    Z,
    Unsupported,
}

impl Key {
    /// Все буквенные клавиши в алфавитном порядке
    pub const LETTERS: [Key; 26] = [
        Key::A, Key::B, Key::C, Key::D, Key::E, Key::F, Key::G, Key::H, Key::I, Key::J, Key::K,
        Key::L, Key::M, Key::N, Key::O, Key::P, Key::Q, Key::R, Key::S, Key::T, Key::U, Key::V,
        Key::W, Key::X, Key::Y, Key::Z,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Key::A => "a",
            Key::B => "b",
            Key::C => "c",
            Key::D => "d",
            Key::E => "e",
            Key::F => "f",
            Key::G => "g",
            Key::H => "h",
            Key::I => "i",
            Key::J => "j",
            Key::K => "k",
            Key::L => "l",
            Key::M => "m",
            Key::N => "n",
            Key::O => "o",
            Key::P => "p",
            Key::Q => "q",
            Key::R => "r",
            Key::S => "s",
            Key::T => "t",
            Key::U => "u",
            Key::V => "v",
            Key::W => "w",
            Key::X => "x",
            Key::Y => "y",
            Key::Z => "z",
            Key::Unsupported => "unsupported",
        }
    }

    /// Получить клавишу по имени (регистронезависимо)
    pub fn from_name(name: &str) -> Option<Key> {
        let normalized = name.to_lowercase();
        KEY_BY_NAME.get(normalized.as_str()).copied()
    }

    pub fn is_supported(&self) -> bool {
        *self != Key::Unsupported
    }
}

static KEY_BY_NAME: Lazy<HashMap<&'static str, Key>> = Lazy::new(|| {
    Key::LETTERS
        .iter()
        .chain(std::iter::once(&Key::Unsupported))
        .map(|key| (key.as_str(), *key))
        .collect()
});

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Состояние клавиши в нативном событии
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyState {
    Pressed,
    Released,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for key in Key::LETTERS {
            assert_eq!(Key::from_name(key.as_str()), Some(key));
        }
        assert_eq!(Key::from_name("unsupported"), Some(Key::Unsupported));
    }

    #[test]
    fn test_case_insensitive_name() {
        assert_eq!(Key::from_name("Q"), Some(Key::Q));
        assert_eq!(Key::from_name("space"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Key::A.to_string(), "a");
        assert!(!Key::Unsupported.is_supported());
    }
}
