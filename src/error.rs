use crate::events::{EventKind, WindowId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MgError {
    #[error("Ошибка соединения с дисплеем: {0}")]
    Connection(String),

    #[error("Платформа не поддерживает рендеринг: {0}")]
    UnsupportedPlatform(String),

    #[error("Нет подходящего визуального формата: {0}")]
    NoMatchingFormat(String),

    #[error("Недопустимое состояние: {0}")]
    InvalidState(String),

    #[error("Недопустимый аргумент: {0}")]
    InvalidArgument(String),

    #[error("Ошибка обработчика {kind:?} окна {window}: {message}")]
    Handler {
        window: WindowId,
        kind: EventKind,
        message: String,
    },

    #[error("Ошибка нативного вызова: {0}")]
    Native(String),

    #[error("Ошибка конфигурации: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),
}

impl MgError {
    /// Ошибки, которые означают потерю соединения с сервером
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, MgError::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, MgError>;

#[cfg(feature = "x11")]
mod x11_conversions {
    use super::MgError;
    use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};

    impl From<ConnectError> for MgError {
        fn from(e: ConnectError) -> Self {
            MgError::Connection(e.to_string())
        }
    }

    impl From<ConnectionError> for MgError {
        fn from(e: ConnectionError) -> Self {
            MgError::Connection(e.to_string())
        }
    }

    impl From<ReplyError> for MgError {
        fn from(e: ReplyError) -> Self {
            match e {
                ReplyError::ConnectionError(e) => MgError::Connection(e.to_string()),
                ReplyError::X11Error(e) => MgError::Native(format!("{:?}", e)),
            }
        }
    }

    impl From<ReplyOrIdError> for MgError {
        fn from(e: ReplyOrIdError) -> Self {
            match e {
                ReplyOrIdError::ConnectionError(e) => MgError::Connection(e.to_string()),
                other => MgError::Native(other.to_string()),
            }
        }
    }
}

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! mg_error {
    (connection, $($arg:tt)*) => {
        $crate::error::MgError::Connection(format!($($arg)*))
    };
    (unsupported_platform, $($arg:tt)*) => {
        $crate::error::MgError::UnsupportedPlatform(format!($($arg)*))
    };
    (no_matching_format, $($arg:tt)*) => {
        $crate::error::MgError::NoMatchingFormat(format!($($arg)*))
    };
    (invalid_state, $($arg:tt)*) => {
        $crate::error::MgError::InvalidState(format!($($arg)*))
    };
    (invalid_argument, $($arg:tt)*) => {
        $crate::error::MgError::InvalidArgument(format!($($arg)*))
    };
    (native, $($arg:tt)*) => {
        $crate::error::MgError::Native(format!($($arg)*))
    };
}
