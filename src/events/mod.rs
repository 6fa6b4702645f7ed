pub mod keyboard;
pub mod window;

pub use keyboard::{Key, KeyState};
pub use window::{
    CloseToken, Configure, Event, EventKind, LoopState, NativeEvent, WindowArea, WindowId,
    WindowState,
};

/// Режим отображения экрана
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
}

impl DisplayMode {
    pub fn new(width: u32, height: u32, bits_per_pixel: u32) -> Self {
        Self { width, height, bits_per_pixel }
    }
}

impl std::fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.bits_per_pixel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mode_format() {
        assert_eq!(DisplayMode::new(1920, 1080, 24).to_string(), "1920x1080@24");
    }
}
