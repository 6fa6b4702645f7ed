use crate::error::{MgError, Result};
use crate::mg_error;
use crate::events::{CloseToken, Configure, LoopState, WindowArea, WindowId, WindowState};
use crate::mappings::{PropertyNames, PropertyValue, WindowProperty};
use crate::platform::{ContextId, NativeConnection, PixelFormat, Platform};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Изменяемое состояние окна под замком дескриптора
pub(crate) struct HandleState {
    pub(crate) window: WindowState,
    pub(crate) loop_state: LoopState,
    /// Флаг цикла: меняется только под этим замком
    pub(crate) running: bool,
    pub(crate) worker: Option<JoinHandle<()>>,
    pub(crate) context: Option<ContextId>,
    /// Последнее запрошенное полноэкранное состояние
    pub(crate) fullscreen: bool,
}

/// Общая часть дескриптора окна: принадлежит `Window` и рабочему потоку.
pub(crate) struct WindowShared {
    pub(crate) id: WindowId,
    pub(crate) close_token: CloseToken,
    pub(crate) connection: Arc<dyn NativeConnection>,
    pub(crate) state: Mutex<HandleState>,
    /// Упорядочивает start/stop/destroy между собой
    pub(crate) control: Mutex<()>,
}

impl WindowShared {
    /// Освободить нативные ресурсы. Вызывается под замком состояния.
    fn release(&self, state: &mut HandleState) -> Result<()> {
        let mut first_error = None;
        let mut keep = |result: Result<()>| {
            if let Err(e) = result {
                warn!("Ошибка при освобождении окна {}: {}", self.id, e);
                first_error.get_or_insert(e);
            }
        };

        if let Some(context) = state.context.take() {
            if self.connection.current_context() == Some(context) {
                keep(self.connection.make_current(self.id, None));
            }
            keep(self.connection.destroy_context(context));
        }
        keep(self.connection.destroy_window(self.id));
        keep(self.connection.close());
        state.window = WindowState::Destroyed;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for WindowShared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.window == WindowState::Created {
            debug!("Окно {} освобождается при удалении дескриптора", self.id);
            let mut state = std::mem::replace(
                state,
                HandleState {
                    window: WindowState::Destroyed,
                    loop_state: LoopState::Stopped,
                    running: false,
                    worker: None,
                    context: None,
                    fullscreen: false,
                },
            );
            let _ = self.release(&mut state);
        }
    }
}

/// Нативное окно с контекстом рендеринга.
///
/// Cloning yields another handle to the same window. All accessors and
/// mutators require the `Created` state and fail with `InvalidState` otherwise.
#[derive(Clone)]
pub struct Window {
    pub(crate) shared: Arc<WindowShared>,
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("loop_state", &self.loop_state())
            .finish()
    }
}

impl Window {
    /// Создать окно: соединение, проверка рендеринга, формат, окно, контекст,
    /// токен закрытия, привязка контекста к текущему потоку, имя.
    /// При ошибке всё созданное освобождается.
    pub fn create(platform: &dyn Platform, name: &str, area: WindowArea) -> Result<Self> {
        let connection = platform.connect()?;
        match Self::build(&connection, name, area) {
            Ok((id, close_token, context)) => {
                info!("Создано окно {} '{}' {}", id, name, area);
                Ok(Self {
                    shared: Arc::new(WindowShared {
                        id,
                        close_token,
                        connection,
                        state: Mutex::new(HandleState {
                            window: WindowState::Created,
                            loop_state: LoopState::Stopped,
                            running: false,
                            worker: None,
                            context: Some(context),
                            fullscreen: false,
                        }),
                        control: Mutex::new(()),
                    }),
                })
            }
            Err(e) => {
                if let Err(close_error) = connection.close() {
                    warn!("Не удалось закрыть соединение после ошибки: {}", close_error);
                }
                Err(e)
            }
        }
    }

    fn build(
        connection: &Arc<dyn NativeConnection>,
        name: &str,
        area: WindowArea,
    ) -> Result<(WindowId, CloseToken, ContextId)> {
        if !connection.supports_rendering()? {
            return Err(mg_error!(
                unsupported_platform,
                "сервер не поддерживает расширение рендеринга"
            ));
        }
        let format: PixelFormat = connection.choose_format()?.ok_or_else(|| {
            mg_error!(no_matching_format, "нужен RGBA, двойная буферизация, глубина 24")
        })?;
        debug!("Выбран формат {:?}", format);

        let id = connection.create_window(&format, area)?;
        let context = match connection.create_context(id, &format) {
            Ok(context) => context,
            Err(e) => {
                let _ = connection.destroy_window(id);
                return Err(e);
            }
        };

        let finish = || -> Result<CloseToken> {
            let close_token = connection.register_close_token(id)?;
            connection.make_current(id, Some(context))?;
            connection.set_name(id, name)?;
            connection.flush()?;
            Ok(close_token)
        };
        match finish() {
            Ok(close_token) => Ok((id, close_token, context)),
            Err(e) => {
                if connection.current_context() == Some(context) {
                    let _ = connection.make_current(id, None);
                }
                let _ = connection.destroy_context(context);
                let _ = connection.destroy_window(id);
                Err(e)
            }
        }
    }

    /// Уничтожить окно. Цикл событий должен быть остановлен.
    pub(crate) fn destroy(&self) -> Result<()> {
        let _control = self.shared.control.lock();
        let finished_worker = {
            let mut state = self.shared.state.lock();
            match state.window {
                WindowState::Created => {}
                other => {
                    return Err(mg_error!(
                        invalid_state,
                        "окно {} нельзя уничтожить в состоянии {:?}",
                        self.shared.id, other
                    ))
                }
            }
            if state.running {
                return Err(mg_error!(
                    invalid_state,
                    "цикл событий окна {} запущен, сначала остановите его",
                    self.shared.id
                ));
            }
            state.worker.take()
        };

        // Поток, завершившийся из-за ошибки, ещё не присоединён
        if let Some(worker) = finished_worker {
            let _ = worker.join();
        }

        let mut state = self.shared.state.lock();
        state.loop_state = LoopState::Stopped;
        let result = self.shared.release(&mut state);
        info!("Окно {} уничтожено", self.shared.id);
        result
    }

    pub fn id(&self) -> WindowId {
        self.shared.id
    }

    pub fn close_token(&self) -> CloseToken {
        self.shared.close_token
    }

    pub fn state(&self) -> WindowState {
        self.shared.state.lock().window
    }

    pub fn loop_state(&self) -> LoopState {
        self.shared.state.lock().loop_state
    }

    pub fn is_created(&self) -> bool {
        self.state() == WindowState::Created
    }

    /// Замок состояния, только для созданного окна
    fn created(&self) -> Result<MutexGuard<'_, HandleState>> {
        let state = self.shared.state.lock();
        if state.window != WindowState::Created {
            return Err(mg_error!(
                invalid_state,
                "окно {} в состоянии {:?}",
                self.shared.id, state.window
            ));
        }
        Ok(state)
    }

    fn native(&self) -> &dyn NativeConnection {
        self.shared.connection.as_ref()
    }

    pub fn area(&self) -> Result<WindowArea> {
        let _state = self.created()?;
        self.native().area(self.shared.id)
    }

    pub fn x(&self) -> Result<i32> {
        Ok(self.area()?.x)
    }

    pub fn y(&self) -> Result<i32> {
        Ok(self.area()?.y)
    }

    pub fn width(&self) -> Result<u32> {
        Ok(self.area()?.width)
    }

    pub fn height(&self) -> Result<u32> {
        Ok(self.area()?.height)
    }

    pub fn name(&self) -> Result<String> {
        let _state = self.created()?;
        self.native().name(self.shared.id)
    }

    pub fn visible(&self) -> Result<bool> {
        let _state = self.created()?;
        self.native().is_mapped(self.shared.id)
    }

    /// Последнее запрошенное полноэкранное состояние
    pub fn fullscreen(&self) -> Result<bool> {
        Ok(self.created()?.fullscreen)
    }

    fn configure(&self, changes: Configure) -> Result<()> {
        let _state = self.created()?;
        self.native().configure(self.shared.id, changes)?;
        self.native().flush()
    }

    pub fn set_position(&self, x: i32, y: i32) -> Result<()> {
        self.configure(Configure::position(x, y))
    }

    pub fn set_size(&self, width: u32, height: u32) -> Result<()> {
        self.configure(Configure::size(width, height))
    }

    pub fn set_area(&self, area: WindowArea) -> Result<()> {
        self.configure(Configure::area(area))
    }

    pub fn set_x(&self, x: i32) -> Result<()> {
        self.configure(Configure { x: Some(x), ..Configure::default() })
    }

    pub fn set_y(&self, y: i32) -> Result<()> {
        self.configure(Configure { y: Some(y), ..Configure::default() })
    }

    pub fn set_width(&self, width: u32) -> Result<()> {
        self.configure(Configure { width: Some(width), ..Configure::default() })
    }

    pub fn set_height(&self, height: u32) -> Result<()> {
        self.configure(Configure { height: Some(height), ..Configure::default() })
    }

    pub fn set_name(&self, name: &str) -> Result<()> {
        let _state = self.created()?;
        self.native().set_name(self.shared.id, name)?;
        self.native().flush()
    }

    pub fn set_visible(&self, visible: bool) -> Result<()> {
        let state = self.created()?;
        let id = self.shared.id;
        self.native().set_mapped(id, visible)?;
        // Оконный менеджер сбрасывает _NET_WM_STATE при скрытии окна
        if !visible && state.fullscreen {
            self.native().set_fullscreen_hint(id, true)?;
        }
        self.native().flush()
    }

    pub fn show(&self) -> Result<()> {
        self.set_visible(true)
    }

    pub fn hide(&self) -> Result<()> {
        self.set_visible(false)
    }

    /// Полноэкранный режим: подсказка до отображения или запрос оконному
    /// менеджеру для уже отображённого окна. Ровно одна стратегия за вызов.
    pub fn set_fullscreen(&self, fullscreen: bool) -> Result<()> {
        let mut state = self.created()?;
        let id = self.shared.id;
        if self.native().is_mapped(id)? {
            self.native().request_fullscreen(id, fullscreen)?;
        } else {
            self.native().set_fullscreen_hint(id, fullscreen)?;
        }
        state.fullscreen = fullscreen;
        debug!("Окно {}: fullscreen = {}", id, fullscreen);
        self.native().flush()
    }

    /// Прочитать свойство окна
    pub fn get(&self, property: WindowProperty) -> Result<PropertyValue> {
        Ok(match property {
            WindowProperty::X => PropertyValue::Int(self.x()?),
            WindowProperty::Y => PropertyValue::Int(self.y()?),
            WindowProperty::Width => PropertyValue::UInt(self.width()?),
            WindowProperty::Height => PropertyValue::UInt(self.height()?),
            WindowProperty::Name => PropertyValue::Text(self.name()?),
            WindowProperty::Visible => PropertyValue::Bool(self.visible()?),
            WindowProperty::Fullscreen => PropertyValue::Bool(self.fullscreen()?),
        })
    }

    /// Изменить свойство окна. Значение должно подходить по форме.
    pub fn set(&self, property: WindowProperty, value: PropertyValue) -> Result<()> {
        let mismatch = |value: &PropertyValue| {
            mg_error!(
                invalid_argument,
                "значение '{}' не подходит для свойства {}",
                value,
                PropertyNames::canonical_name(property)
            )
        };
        match (property, value) {
            (WindowProperty::X, PropertyValue::Int(x)) => self.set_x(x),
            (WindowProperty::Y, PropertyValue::Int(y)) => self.set_y(y),
            (WindowProperty::Width, PropertyValue::UInt(w)) => self.set_width(w),
            (WindowProperty::Height, PropertyValue::UInt(h)) => self.set_height(h),
            (WindowProperty::Name, PropertyValue::Text(name)) => self.set_name(&name),
            (WindowProperty::Visible, PropertyValue::Bool(visible)) => self.set_visible(visible),
            (WindowProperty::Fullscreen, PropertyValue::Bool(fs)) => self.set_fullscreen(fs),
            (_, value) => Err(mismatch(&value)),
        }
    }

    /// Прочитать свойство по имени или синониму (`w`, `title`, `visible?` ...)
    pub fn get_by_name(&self, name: &str) -> Result<PropertyValue> {
        let property = PropertyNames::translate(name).map_err(MgError::InvalidArgument)?;
        self.get(property)
    }

    /// Изменить свойство по имени, значение задаётся строкой
    pub fn set_by_name(&self, name: &str, raw: &str) -> Result<()> {
        let property = PropertyNames::translate(name).map_err(MgError::InvalidArgument)?;
        let value = PropertyNames::parse_value(property, raw).map_err(MgError::InvalidArgument)?;
        self.set(property, value)
    }
}
