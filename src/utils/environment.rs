use crate::error::Result;
use crate::mg_error;
use tracing::{info, warn};

/// Тип графической сессии по переменным окружения
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    X11,
    /// Wayland с XWayland: X11 доступен через совместимый сервер
    XWayland,
    Unknown,
}

/// Снимок переменных окружения, влияющих на подключение к дисплею
#[derive(Debug, Clone, Default)]
pub struct DisplayEnvironment {
    pub display: Option<String>,
    pub session_type: Option<String>,
    pub wayland_display: Option<String>,
}

impl DisplayEnvironment {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            display: var("DISPLAY"),
            session_type: var("XDG_SESSION_TYPE"),
            wayland_display: var("WAYLAND_DISPLAY"),
        }
    }

    /// Определить тип сессии. Явно заданный дисплей заменяет DISPLAY.
    pub fn assess(&self, explicit_display: Option<&str>) -> Result<SessionKind> {
        let target = explicit_display
            .filter(|d| !d.is_empty())
            .or(self.display.as_deref());

        let Some(target) = target else {
            return Err(mg_error!(
                connection,
                "переменная DISPLAY не задана, X сервер недоступен"
            ));
        };

        let wayland = self.wayland_display.is_some()
            || self.session_type.as_deref() == Some("wayland");
        if wayland {
            warn!("Сессия Wayland, подключение к {} через XWayland", target);
            return Ok(SessionKind::XWayland);
        }

        match self.session_type.as_deref() {
            Some("x11") => Ok(SessionKind::X11),
            Some(other) => {
                warn!("Неизвестный тип сессии '{}', пробуем X11 ({})", other, target);
                Ok(SessionKind::Unknown)
            }
            None => Ok(SessionKind::Unknown),
        }
    }
}

/// Проверить, что окружение позволяет подключиться к X серверу
pub fn check_display_environment(explicit_display: Option<&str>) -> Result<()> {
    info!("Проверка окружения дисплея...");
    let kind = DisplayEnvironment::from_env().assess(explicit_display)?;
    info!("Тип сессии: {:?}", kind);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MgError;

    fn env(display: Option<&str>, session: Option<&str>, wayland: Option<&str>) -> DisplayEnvironment {
        DisplayEnvironment {
            display: display.map(str::to_string),
            session_type: session.map(str::to_string),
            wayland_display: wayland.map(str::to_string),
        }
    }

    #[test]
    fn test_missing_display_is_connection_error() {
        let result = env(None, Some("x11"), None).assess(None);
        assert!(matches!(result, Err(MgError::Connection(_))));
    }

    #[test]
    fn test_explicit_display_overrides_env() {
        let kind = env(None, Some("x11"), None).assess(Some(":1")).unwrap();
        assert_eq!(kind, SessionKind::X11);
    }

    #[test]
    fn test_wayland_session_uses_xwayland() {
        let kind = env(Some(":0"), Some("wayland"), Some("wayland-0")).assess(None).unwrap();
        assert_eq!(kind, SessionKind::XWayland);
    }

    #[test]
    fn test_unknown_session() {
        let kind = env(Some(":0"), None, None).assess(None).unwrap();
        assert_eq!(kind, SessionKind::Unknown);
    }
}
