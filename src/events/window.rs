use super::keyboard::{Key, KeyState};
use std::fmt;

/// Идентификатор окна, выданный платформой
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Значение, которое платформа возвращает в запросе закрытия окна.
/// Сравнивается по значению (атом WM_DELETE_WINDOW в X11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseToken(pub u32);

/// Геометрия окна
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowArea {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl WindowArea {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Прямоугольник заданного размера по центру экрана
    pub fn centered(screen_width: u32, screen_height: u32, width: u32, height: u32) -> Self {
        let x = (screen_width as i32 - width as i32) / 2;
        let y = (screen_height as i32 - height as i32) / 2;
        Self::new(x, y, width, height)
    }
}

impl fmt::Display for WindowArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Частичное изменение геометрии: None означает "не трогать"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Configure {
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Configure {
    pub fn position(x: i32, y: i32) -> Self {
        Self { x: Some(x), y: Some(y), ..Self::default() }
    }

    pub fn size(width: u32, height: u32) -> Self {
        Self { width: Some(width), height: Some(height), ..Self::default() }
    }

    pub fn area(area: WindowArea) -> Self {
        Self {
            x: Some(area.x),
            y: Some(area.y),
            width: Some(area.width),
            height: Some(area.height),
        }
    }

    /// Применить изменения к текущей геометрии
    pub fn apply_to(&self, area: WindowArea) -> WindowArea {
        WindowArea {
            x: self.x.unwrap_or(area.x),
            y: self.y.unwrap_or(area.y),
            width: self.width.unwrap_or(area.width),
            height: self.height.unwrap_or(area.height),
        }
    }
}

/// Тип канонического события
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EventKind {
    Close,
    KeyPress,
    KeyRelease,
}

impl EventKind {
    /// Принимает ли обработчик этого типа аргумент-клавишу
    pub fn carries_key(&self) -> bool {
        matches!(self, EventKind::KeyPress | EventKind::KeyRelease)
    }
}

/// Каноническое событие окна
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub key: Option<Key>,
    pub window: WindowId,
}

impl Event {
    pub fn close(window: WindowId) -> Self {
        Self { kind: EventKind::Close, key: None, window }
    }

    pub fn key(window: WindowId, key: Key, state: KeyState) -> Self {
        let kind = match state {
            KeyState::Pressed => EventKind::KeyPress,
            KeyState::Released => EventKind::KeyRelease,
        };
        Self { kind, key: Some(key), window }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key {
            Some(key) => write!(f, "{:?}({}) @ {}", self.kind, key, self.window),
            None => write!(f, "{:?} @ {}", self.kind, self.window),
        }
    }
}

/// Событие в представлении платформы, до трансляции
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeEvent {
    /// Окно уничтожается сервером
    DestroyNotify { window: WindowId },
    /// Клиентское сообщение; `data0` - первое 32-битное слово данных
    ClientMessage { window: WindowId, format: u8, data0: u32 },
    /// Нажатие или отпускание клавиши, уже разрешённое в keysym
    Key { window: WindowId, keysym: u32, state: KeyState },
    /// Любое другое событие, код типа по протоколу
    Other { window: WindowId, code: u8 },
}

impl NativeEvent {
    pub fn window(&self) -> WindowId {
        match *self {
            NativeEvent::DestroyNotify { window }
            | NativeEvent::ClientMessage { window, .. }
            | NativeEvent::Key { window, .. }
            | NativeEvent::Other { window, .. } => window,
        }
    }
}

/// Состояние нативного окна
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowState {
    Uninitialized,
    Created,
    Destroyed,
}

/// Состояние цикла событий окна
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopState {
    Stopped,
    Running,
    StopRequested,
}
