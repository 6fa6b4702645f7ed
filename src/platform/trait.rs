use crate::config::PlatformConfig;
use crate::error::Result;
use crate::mg_error;
use crate::events::{CloseToken, Configure, DisplayMode, NativeEvent, WindowArea, WindowId};
use std::sync::Arc;
use tracing::info;

/// Визуальный формат окна, пригодный для рендеринга
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFormat {
    pub visual: u32,
    pub depth: u8,
    pub bits_per_rgb: u8,
    pub double_buffered: bool,
}

impl PixelFormat {
    /// Минимальные требования: 24 бита цвета, по 8 на канал
    pub fn is_suitable(&self) -> bool {
        self.depth >= 24 && self.bits_per_rgb >= 8
    }
}

/// Идентификатор контекста рендеринга
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u32);

/// Платформа: фабрика соединений и запросы режимов экрана
pub trait Platform: Send + Sync {
    fn name(&self) -> &'static str;

    /// Открыть новое соединение с дисплеем
    fn connect(&self) -> Result<Arc<dyn NativeConnection>>;

    fn current_display_mode(&self) -> Result<DisplayMode>;

    fn display_modes(&self) -> Result<Vec<DisplayMode>>;
}

/// Соединение с дисплейным сервером.
///
/// Implementations serialize every call per connection. `wait_for_event` is the
/// only blocking call and must not hold that serialization while parked, so
/// that getters, setters and `wake` from other threads make progress.
pub trait NativeConnection: Send + Sync {
    /// Поддерживает ли сервер расширение рендеринга
    fn supports_rendering(&self) -> Result<bool>;

    /// Выбрать подходящий визуальный формат, если он есть
    fn choose_format(&self) -> Result<Option<PixelFormat>>;

    fn create_window(&self, format: &PixelFormat, area: WindowArea) -> Result<WindowId>;

    fn create_context(&self, window: WindowId, format: &PixelFormat) -> Result<ContextId>;

    /// Зарегистрировать токен закрытия (WM_DELETE_WINDOW) для окна
    fn register_close_token(&self, window: WindowId) -> Result<CloseToken>;

    /// Сделать контекст текущим для вызывающего потока; None отвязывает
    fn make_current(&self, window: WindowId, context: Option<ContextId>) -> Result<()>;

    /// Контекст, текущий для вызывающего потока
    fn current_context(&self) -> Option<ContextId>;

    fn destroy_context(&self, context: ContextId) -> Result<()>;

    fn destroy_window(&self, window: WindowId) -> Result<()>;

    /// Закрыть соединение. Последующие вызовы возвращают `MgError::Connection`.
    fn close(&self) -> Result<()>;

    fn area(&self, window: WindowId) -> Result<WindowArea>;

    fn name(&self, window: WindowId) -> Result<String>;

    fn is_mapped(&self, window: WindowId) -> Result<bool>;

    fn configure(&self, window: WindowId, changes: Configure) -> Result<()>;

    fn set_name(&self, window: WindowId, name: &str) -> Result<()>;

    fn set_mapped(&self, window: WindowId, mapped: bool) -> Result<()>;

    /// Подсказка до отображения окна (_NET_WM_STATE на самом окне)
    fn set_fullscreen_hint(&self, window: WindowId, fullscreen: bool) -> Result<()>;

    /// Запрос оконному менеджеру для уже отображённого окна
    fn request_fullscreen(&self, window: WindowId, fullscreen: bool) -> Result<()>;

    fn flush(&self) -> Result<()>;

    /// Блокирующее ожидание следующего события, адресованного окну
    fn wait_for_event(&self, window: WindowId) -> Result<NativeEvent>;

    /// Разбудить `wait_for_event` для окна пустым клиентским сообщением
    fn wake(&self, window: WindowId) -> Result<()>;
}

/// Factory function to create an appropriate platform based on the config and the headless flag
pub fn create_platform(config: &PlatformConfig, headless: bool) -> Result<Arc<dyn Platform>> {
    if headless || config.backend == "headless" {
        info!("Используется headless платформа");
        return Ok(Arc::new(super::headless::HeadlessPlatform::new(
            super::headless::HeadlessServer::new(),
        )));
    }

    match config.backend.as_str() {
        "x11" => create_x11_platform(config),
        other => Err(mg_error!(
            unsupported_platform,
            "Неизвестная платформа: {}",
            other
        )),
    }
}

#[cfg(feature = "x11")]
fn create_x11_platform(config: &PlatformConfig) -> Result<Arc<dyn Platform>> {
    crate::utils::environment::check_display_environment(config.display.as_deref())?;
    info!("Используется платформа X11");
    Ok(Arc::new(super::x11::X11Platform::new(config.display.clone())))
}

#[cfg(not(feature = "x11"))]
fn create_x11_platform(_config: &PlatformConfig) -> Result<Arc<dyn Platform>> {
    Err(mg_error!(
        unsupported_platform,
        "поддержка X11 не включена при сборке (feature \"x11\")"
    ))
}
