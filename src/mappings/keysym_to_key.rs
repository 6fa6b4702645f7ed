use crate::events::Key;

/// XK_A .. XK_Z
const XK_A: u32 = 0x41;
const XK_Z: u32 = 0x5a;

/// Преобразование keysym платформы в каноническую клавишу.
/// Функция тотальная: всё, что не буква, становится `Key::Unsupported`.
pub struct KeysymToKey;

impl KeysymToKey {
    /// Получить клавишу по keysym (регистр нормализуется до поиска)
    pub fn translate(keysym: u32) -> Key {
        let (_, upper) = Self::convert_case(keysym);
        if (XK_A..=XK_Z).contains(&upper) {
            Key::LETTERS[(upper - XK_A) as usize]
        } else {
            Key::Unsupported
        }
    }

    /// Правило смены регистра X11 для Latin-1: возвращает (lower, upper).
    /// Для keysym вне Latin-1 обе половины равны входу.
    pub fn convert_case(keysym: u32) -> (u32, u32) {
        match keysym {
            0x41..=0x5a => (keysym + 0x20, keysym),
            0x61..=0x7a => (keysym, keysym - 0x20),
            0xc0..=0xde if keysym != 0xd7 => (keysym + 0x20, keysym),
            0xe0..=0xfe if keysym != 0xf7 => (keysym, keysym - 0x20),
            _ => (keysym, keysym),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letter_keys() {
        assert_eq!(KeysymToKey::translate(0x61), Key::A);
        assert_eq!(KeysymToKey::translate(0x7a), Key::Z);
    }

    #[test]
    fn test_case_insensitive() {
        for offset in 0..26u32 {
            let lower = KeysymToKey::translate(0x61 + offset);
            let upper = KeysymToKey::translate(0x41 + offset);
            assert_eq!(lower, upper);
            assert!(lower.is_supported());
        }
    }

    #[test]
    fn test_unknown_keys() {
        // XK_space, XK_1, XK_Return, XK_F1, XK_agrave
        for keysym in [0x20, 0x31, 0xff0d, 0xffbe, 0xe0] {
            assert_eq!(KeysymToKey::translate(keysym), Key::Unsupported);
        }
    }

    #[test]
    fn test_latin1_case_conversion() {
        assert_eq!(KeysymToKey::convert_case(0xe0), (0xe0, 0xc0));
        assert_eq!(KeysymToKey::convert_case(0xd7), (0xd7, 0xd7));
        assert_eq!(KeysymToKey::convert_case(0xff0d), (0xff0d, 0xff0d));
    }
}
