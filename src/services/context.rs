use super::dispatcher::{CallbackInvoker, ErrorReporter, ReportedError};
use super::event_loop;
use super::registry::{CallbackRegistry, Handler, HandlerResult};
use super::window_handle::Window;
use crate::config::{PlatformConfig, WindowConfig};
use crate::error::Result;
use crate::mg_error;
use crate::events::{DisplayMode, EventKind, Key, WindowArea, WindowId};
use crate::platform::{create_platform, Platform};
use crossbeam_channel::{unbounded, Receiver};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Точка входа: платформа, реестр обработчиков, поток колбэков и канал ошибок.
///
/// Every window created through a context is tracked by it. Dropping the
/// context stops all running loops, destroys the remaining windows and shuts
/// the callback thread down.
pub struct Context {
    platform: Arc<dyn Platform>,
    registry: Arc<CallbackRegistry>,
    invoker: CallbackInvoker,
    windows: DashMap<WindowId, Window>,
    errors: Receiver<ReportedError>,
}

impl Context {
    pub fn new(platform: Arc<dyn Platform>) -> Result<Self> {
        info!("Инициализация контекста (платформа: {})", platform.name());
        let registry = Arc::new(CallbackRegistry::new());
        let (errors_tx, errors) = unbounded();
        let invoker = CallbackInvoker::new(registry.clone(), ErrorReporter::new(errors_tx))?;
        Ok(Self {
            platform,
            registry,
            invoker,
            windows: DashMap::new(),
            errors,
        })
    }

    /// Контекст поверх платформы из конфигурации
    pub fn from_config(config: &PlatformConfig, headless: bool) -> Result<Self> {
        Self::new(create_platform(config, headless)?)
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    /// Канал асинхронных ошибок: сбои обработчиков и рабочих потоков
    pub fn errors(&self) -> &Receiver<ReportedError> {
        &self.errors
    }

    pub fn create_window(&self, name: &str, x: i32, y: i32, width: u32, height: u32) -> Result<Window> {
        let window = Window::create(self.platform.as_ref(), name, WindowArea::new(x, y, width, height))?;
        self.windows.insert(window.id(), window.clone());
        Ok(window)
    }

    /// Окно по настройкам; без координат оно центрируется на текущем режиме экрана
    pub fn create_configured_window(&self, config: &WindowConfig) -> Result<Window> {
        let area = match (config.x, config.y) {
            (Some(x), Some(y)) => WindowArea::new(x, y, config.width, config.height),
            (x, y) => {
                let mode = self.current_display_mode()?;
                let centered = WindowArea::centered(mode.width, mode.height, config.width, config.height);
                WindowArea::new(x.unwrap_or(centered.x), y.unwrap_or(centered.y), config.width, config.height)
            }
        };
        let window = self.create_window(&config.name, area.x, area.y, area.width, area.height)?;
        if config.fullscreen {
            window.set_fullscreen(true)?;
        }
        Ok(window)
    }

    /// Уничтожить окно и забыть его обработчики. Цикл должен быть остановлен.
    pub fn destroy_window(&self, window: &Window) -> Result<()> {
        window.destroy()?;
        self.forget(window.id());
        Ok(())
    }

    fn forget(&self, id: WindowId) {
        self.windows.remove(&id);
        self.invoker.close_gate(id);
        let removed = self.registry.remove_window(id);
        if removed > 0 {
            crate::debug_if_enabled!("Окно {}: удалено обработчиков: {}", id, removed);
        }
    }

    pub fn windows(&self) -> Vec<Window> {
        self.windows.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Зарегистрировать обработчик. true, если заменён существующий.
    pub fn register_handler(&self, window: &Window, kind: EventKind, handler: Handler) -> Result<bool> {
        if !window.is_created() {
            return Err(mg_error!(
                invalid_state,
                "окно {} не создано или уже уничтожено",
                window.id()
            ));
        }
        self.registry.register(window.id(), kind, handler)
    }

    pub fn on_close(
        &self,
        window: &Window,
        handler: impl FnMut() -> HandlerResult + Send + 'static,
    ) -> Result<bool> {
        self.register_handler(window, EventKind::Close, Handler::close(handler))
    }

    pub fn on_key_press(
        &self,
        window: &Window,
        handler: impl FnMut(Key) -> HandlerResult + Send + 'static,
    ) -> Result<bool> {
        self.register_handler(window, EventKind::KeyPress, Handler::key(handler))
    }

    pub fn on_key_release(
        &self,
        window: &Window,
        handler: impl FnMut(Key) -> HandlerResult + Send + 'static,
    ) -> Result<bool> {
        self.register_handler(window, EventKind::KeyRelease, Handler::key(handler))
    }

    pub fn unregister_handler(&self, window: &Window, kind: EventKind) -> bool {
        self.registry.unregister(window.id(), kind)
    }

    pub fn start_event_loop(&self, window: &Window) -> Result<()> {
        event_loop::start(&window.shared, &self.invoker)
    }

    /// Остановить цикл окна. После возврата обработчики этого окна не вызываются.
    pub fn stop_event_loop(&self, window: &Window) -> Result<()> {
        event_loop::stop(&window.shared, &self.invoker)
    }

    pub fn current_display_mode(&self) -> Result<DisplayMode> {
        self.platform.current_display_mode()
    }

    pub fn display_modes(&self) -> Result<Vec<DisplayMode>> {
        self.platform.display_modes()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let windows = self.windows();
        for window in &windows {
            if let Err(e) = self.stop_event_loop(window) {
                warn!("Не удалось остановить цикл окна {}: {}", window.id(), e);
            }
        }
        for window in &windows {
            if window.is_created() {
                if let Err(e) = self.destroy_window(window) {
                    warn!("Не удалось уничтожить окно {}: {}", window.id(), e);
                }
            }
        }
        self.invoker.shutdown();
        info!("Контекст освобождён");
    }
}
