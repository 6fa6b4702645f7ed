//! X11 binding on top of x11rb.
//!
//! Every connection owns exactly one `RustConnection`. Request sequences go
//! through `state` so that read-then-write operations (keymap lookup, context
//! binding) stay atomic. `wait_for_event` parks inside x11rb, whose connection
//! releases its internal lock while blocked on the socket, so requests from
//! other threads keep flowing during the wait.

use super::r#trait::{ContextId, NativeConnection, PixelFormat, Platform};
use crate::error::{MgError, Result};
use crate::mg_error;
use crate::events::{
    CloseToken, Configure, DisplayMode, KeyState, NativeEvent, WindowArea, WindowId,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::errors::ReplyError;
use x11rb::protocol::glx::ConnectionExt as _;
use x11rb::protocol::randr::ConnectionExt as _;
use x11rb::protocol::xproto::{
    self, AtomEnum, ClientMessageEvent, ColormapAlloc, ConfigureWindowAux, ConnectionExt as _,
    CreateWindowAux, EventMask, KeyButMask, MapState, PropMode, VisualClass, WindowClass,
};
use x11rb::protocol::{ErrorKind, Event};
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

const NET_WM_STATE_REMOVE: u32 = 0;
const NET_WM_STATE_ADD: u32 = 1;

/// Индексы фиксированных свойств в ответе GLXGetVisualConfigs
const GLX_PROP_VISUAL_ID: usize = 0;
const GLX_PROP_RGBA: usize = 2;
const GLX_PROP_DOUBLE_BUFFER: usize = 11;
const GLX_PROP_DEPTH_SIZE: usize = 14;
const GLX_FIXED_PROPS: usize = 18;

fn event_mask() -> EventMask {
    EventMask::FOCUS_CHANGE
        | EventMask::BUTTON_PRESS
        | EventMask::BUTTON_RELEASE
        | EventMask::BUTTON_MOTION
        | EventMask::POINTER_MOTION
        | EventMask::KEY_PRESS
        | EventMask::KEY_RELEASE
        | EventMask::STRUCTURE_NOTIFY
        | EventMask::ENTER_WINDOW
        | EventMask::LEAVE_WINDOW
}

fn to_i16(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn to_u16(value: u32) -> u16 {
    value.clamp(1, u16::MAX as u32) as u16
}

#[derive(Debug, Clone, Copy)]
struct Atoms {
    wm_protocols: u32,
    wm_delete_window: u32,
    net_wm_state: u32,
    net_wm_state_fullscreen: u32,
    net_wm_name: u32,
    utf8_string: u32,
    wake: u32,
}

impl Atoms {
    fn intern(conn: &RustConnection) -> Result<Self> {
        let atom = |name: &[u8]| -> Result<u32> {
            Ok(conn.intern_atom(false, name)?.reply()?.atom)
        };
        Ok(Self {
            wm_protocols: atom(b"WM_PROTOCOLS")?,
            wm_delete_window: atom(b"WM_DELETE_WINDOW")?,
            net_wm_state: atom(b"_NET_WM_STATE")?,
            net_wm_state_fullscreen: atom(b"_NET_WM_STATE_FULLSCREEN")?,
            net_wm_name: atom(b"_NET_WM_NAME")?,
            utf8_string: atom(b"UTF8_STRING")?,
            wake: atom(b"_MGWIN_WAKE")?,
        })
    }
}

/// Таблица keycode -> keysym, загруженная при подключении
#[derive(Debug, Default)]
struct KeyboardMap {
    min_keycode: u8,
    per_keycode: u8,
    keysyms: Vec<u32>,
}

impl KeyboardMap {
    fn load(conn: &RustConnection) -> Result<Self> {
        let setup = conn.setup();
        let min = setup.min_keycode;
        let count = setup.max_keycode - min + 1;
        let reply = conn.get_keyboard_mapping(min, count)?.reply()?;
        Ok(Self {
            min_keycode: min,
            per_keycode: reply.keysyms_per_keycode,
            keysyms: reply.keysyms,
        })
    }

    /// Первая группа: индекс 0 без Shift, индекс 1 с Shift (если задан)
    fn keysym(&self, keycode: u8, shifted: bool) -> u32 {
        if keycode < self.min_keycode || self.per_keycode == 0 {
            return 0;
        }
        let base = (keycode - self.min_keycode) as usize * self.per_keycode as usize;
        let plain = self.keysyms.get(base).copied().unwrap_or(0);
        if shifted && self.per_keycode > 1 {
            match self.keysyms.get(base + 1).copied() {
                Some(sym) if sym != 0 => sym,
                _ => plain,
            }
        } else {
            plain
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CurrentContext {
    thread: ThreadId,
    context: ContextId,
    tag: u32,
}

#[derive(Debug, Default)]
struct X11State {
    colormaps: HashMap<WindowId, u32>,
    current: Option<CurrentContext>,
    /// События других окон этого соединения, отложенные фильтром
    deferred: VecDeque<NativeEvent>,
}

/// Платформа X11.
///
/// GL контекст создаётся через протокол GLX и поэтому всегда непрямой.
/// Xorg начиная с 1.17 и XWayland по умолчанию запрещают непрямой GLX
/// и отвечают BadValue; такой отказ возвращается как
/// `MgError::UnsupportedPlatform`. Серверу нужен флаг `+iglx`.
pub struct X11Platform {
    display: Option<String>,
}

impl X11Platform {
    pub fn new(display_name: Option<String>) -> Self {
        info!("Инициализация X11Platform (display: {:?})", display_name);
        Self { display: display_name }
    }

    fn open(&self) -> Result<(RustConnection, usize)> {
        x11rb::connect(self.display.as_deref()).map_err(|e| {
            mg_error!(connection, "не удалось подключиться к X серверу: {}", e)
        })
    }

    /// Открыть соединение, проверить RANDR и выполнить запрос к конфигурации экрана.
    /// Соединение закрывается по выходу из функции.
    fn with_screen_configuration<T>(
        &self,
        f: impl FnOnce(&xproto::Screen, &x11rb::protocol::randr::GetScreenInfoReply) -> T,
    ) -> Result<T> {
        let (conn, screen_num) = self.open()?;
        if !conn.query_extension(b"RANDR")?.reply()?.present {
            return Err(mg_error!(unsupported_platform, "расширение RANDR отсутствует"));
        }
        let screen = &conn.setup().roots[screen_num];
        let info = conn.randr_get_screen_info(screen.root)?.reply()?;
        Ok(f(screen, &info))
    }
}

impl Platform for X11Platform {
    fn name(&self) -> &'static str {
        "x11"
    }

    fn connect(&self) -> Result<Arc<dyn NativeConnection>> {
        let (conn, screen) = self.open()?;
        let atoms = Atoms::intern(&conn)?;
        let keymap = KeyboardMap::load(&conn)?;
        debug!("Подключено к X серверу, экран {}", screen);
        Ok(Arc::new(X11Connection {
            conn: RwLock::new(Some(conn)),
            screen,
            atoms,
            keymap,
            state: Mutex::new(X11State::default()),
        }))
    }

    fn current_display_mode(&self) -> Result<DisplayMode> {
        self.with_screen_configuration(|screen, info| {
            info.sizes.get(info.size_id as usize).map(|size| {
                DisplayMode::new(size.width as u32, size.height as u32, screen.root_depth as u32)
            })
        })?
        .ok_or_else(|| mg_error!(native, "не удалось получить текущий размер экрана"))
    }

    fn display_modes(&self) -> Result<Vec<DisplayMode>> {
        self.with_screen_configuration(|screen, info| {
            screen
                .allowed_depths
                .iter()
                .flat_map(|depth| {
                    info.sizes.iter().map(move |size| {
                        DisplayMode::new(size.width as u32, size.height as u32, depth.depth as u32)
                    })
                })
                .collect()
        })
    }
}

/// Ошибка CreateContext. BadValue означает выключенный на сервере IGLX
fn context_refused(kind: ErrorKind) -> MgError {
    match kind {
        ErrorKind::Value => mg_error!(
            unsupported_platform,
            "сервер отклонил непрямой GLX контекст, запустите X сервер с +iglx"
        ),
        other => mg_error!(native, "GLX CreateContext: {:?}", other),
    }
}

/// Соединение с X сервером
pub struct X11Connection {
    conn: RwLock<Option<RustConnection>>,
    screen: usize,
    atoms: Atoms,
    keymap: KeyboardMap,
    state: Mutex<X11State>,
}

impl X11Connection {
    fn with_conn<T>(&self, f: impl FnOnce(&RustConnection) -> Result<T>) -> Result<T> {
        let guard = self.conn.read();
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(mg_error!(connection, "соединение с X сервером закрыто")),
        }
    }

    fn root(&self, conn: &RustConnection) -> u32 {
        conn.setup().roots[self.screen].root
    }

    /// GLX визуалы с двойной буферизацией и буфером глубины не меньше 24 бит
    fn glx_visuals(&self, conn: &RustConnection) -> Result<Vec<u32>> {
        let reply = conn.glx_get_visual_configs(self.screen as u32)?.reply()?;
        let stride = reply.num_properties as usize;
        if stride < GLX_FIXED_PROPS {
            return Ok(Vec::new());
        }
        Ok(reply
            .property_list
            .chunks(stride)
            .filter(|props| {
                props[GLX_PROP_RGBA] != 0
                    && props[GLX_PROP_DOUBLE_BUFFER] != 0
                    && props[GLX_PROP_DEPTH_SIZE] >= 24
            })
            .map(|props| props[GLX_PROP_VISUAL_ID])
            .collect())
    }

    fn translate(&self, event: Event) -> Option<NativeEvent> {
        let shifted = |state: KeyButMask| u16::from(state) & u16::from(KeyButMask::SHIFT) != 0;
        match event {
            Event::KeyPress(e) => Some(NativeEvent::Key {
                window: WindowId(e.event),
                keysym: self.keymap.keysym(e.detail, shifted(e.state)),
                state: KeyState::Pressed,
            }),
            Event::KeyRelease(e) => Some(NativeEvent::Key {
                window: WindowId(e.event),
                keysym: self.keymap.keysym(e.detail, shifted(e.state)),
                state: KeyState::Released,
            }),
            Event::ClientMessage(e) => Some(NativeEvent::ClientMessage {
                window: WindowId(e.window),
                format: e.format,
                data0: e.data.as_data32()[0],
            }),
            Event::DestroyNotify(e) => Some(NativeEvent::DestroyNotify { window: WindowId(e.window) }),
            Event::ConfigureNotify(e) => Some(NativeEvent::Other {
                window: WindowId(e.window),
                code: xproto::CONFIGURE_NOTIFY_EVENT,
            }),
            Event::MapNotify(e) => Some(NativeEvent::Other {
                window: WindowId(e.window),
                code: xproto::MAP_NOTIFY_EVENT,
            }),
            Event::UnmapNotify(e) => Some(NativeEvent::Other {
                window: WindowId(e.window),
                code: xproto::UNMAP_NOTIFY_EVENT,
            }),
            Event::FocusIn(e) => Some(NativeEvent::Other {
                window: WindowId(e.event),
                code: xproto::FOCUS_IN_EVENT,
            }),
            Event::FocusOut(e) => Some(NativeEvent::Other {
                window: WindowId(e.event),
                code: xproto::FOCUS_OUT_EVENT,
            }),
            Event::ButtonPress(e) => Some(NativeEvent::Other {
                window: WindowId(e.event),
                code: xproto::BUTTON_PRESS_EVENT,
            }),
            Event::ButtonRelease(e) => Some(NativeEvent::Other {
                window: WindowId(e.event),
                code: xproto::BUTTON_RELEASE_EVENT,
            }),
            Event::MotionNotify(e) => Some(NativeEvent::Other {
                window: WindowId(e.event),
                code: xproto::MOTION_NOTIFY_EVENT,
            }),
            Event::EnterNotify(e) => Some(NativeEvent::Other {
                window: WindowId(e.event),
                code: xproto::ENTER_NOTIFY_EVENT,
            }),
            Event::LeaveNotify(e) => Some(NativeEvent::Other {
                window: WindowId(e.event),
                code: xproto::LEAVE_NOTIFY_EVENT,
            }),
            Event::Error(e) => {
                warn!("Ошибка X11: {:?}", e);
                None
            }
            other => {
                debug!("Пропуск события X11: {:?}", other);
                None
            }
        }
    }
}

impl NativeConnection for X11Connection {
    fn supports_rendering(&self) -> Result<bool> {
        let _state = self.state.lock();
        self.with_conn(|conn| Ok(conn.query_extension(b"GLX")?.reply()?.present))
    }

    fn choose_format(&self) -> Result<Option<PixelFormat>> {
        let _state = self.state.lock();
        self.with_conn(|conn| {
            let glx = self.glx_visuals(conn)?;
            let screen = &conn.setup().roots[self.screen];
            let format = screen
                .allowed_depths
                .iter()
                .filter(|depth| depth.depth >= 24)
                .flat_map(|depth| depth.visuals.iter().map(move |visual| (depth.depth, visual)))
                .filter(|(_, visual)| visual.class == VisualClass::TRUE_COLOR)
                .map(|(depth, visual)| PixelFormat {
                    visual: visual.visual_id,
                    depth,
                    bits_per_rgb: visual.bits_per_rgb_value,
                    double_buffered: true,
                })
                .filter(|format| format.is_suitable() && glx.contains(&format.visual))
                // Визуал корневого окна предпочтительнее
                .min_by_key(|format| format.visual != screen.root_visual);
            Ok(format)
        })
    }

    fn create_window(&self, format: &PixelFormat, area: WindowArea) -> Result<WindowId> {
        let mut state = self.state.lock();
        self.with_conn(|conn| {
            let screen = &conn.setup().roots[self.screen];
            let window = conn.generate_id()?;
            let colormap = conn.generate_id()?;
            conn.create_colormap(ColormapAlloc::NONE, colormap, screen.root, format.visual)?;
            let aux = CreateWindowAux::new()
                .event_mask(event_mask())
                .background_pixel(screen.white_pixel)
                .border_pixel(screen.white_pixel)
                .colormap(colormap);
            conn.create_window(
                format.depth,
                window,
                screen.root,
                to_i16(area.x),
                to_i16(area.y),
                to_u16(area.width),
                to_u16(area.height),
                0,
                WindowClass::INPUT_OUTPUT,
                format.visual,
                &aux,
            )?
            .check()?;
            state.colormaps.insert(WindowId(window), colormap);
            Ok(WindowId(window))
        })
    }

    fn create_context(&self, _window: WindowId, format: &PixelFormat) -> Result<ContextId> {
        let _state = self.state.lock();
        self.with_conn(|conn| {
            let context = conn.generate_id()?;
            conn.glx_create_context(context, format.visual, self.screen as u32, 0, false)?
                .check()
                .map_err(|e| match e {
                    ReplyError::X11Error(e) => context_refused(e.error_kind),
                    other => other.into(),
                })?;
            Ok(ContextId(context))
        })
    }

    fn register_close_token(&self, window: WindowId) -> Result<CloseToken> {
        let _state = self.state.lock();
        self.with_conn(|conn| {
            conn.change_property32(
                PropMode::REPLACE,
                window.0,
                self.atoms.wm_protocols,
                AtomEnum::ATOM,
                &[self.atoms.wm_delete_window],
            )?;
            Ok(CloseToken(self.atoms.wm_delete_window))
        })
    }

    fn make_current(&self, window: WindowId, context: Option<ContextId>) -> Result<()> {
        let mut state = self.state.lock();
        self.with_conn(|conn| {
            let old_tag = state.current.map(|c| c.tag).unwrap_or(0);
            match context {
                Some(context) => {
                    let tag = conn
                        .glx_make_current(window.0, context.0, old_tag)?
                        .reply()?
                        .context_tag;
                    state.current = Some(CurrentContext {
                        thread: thread::current().id(),
                        context,
                        tag,
                    });
                }
                None => {
                    conn.glx_make_current(0, 0, old_tag)?.reply()?;
                    state.current = None;
                }
            }
            Ok(())
        })
    }

    fn current_context(&self) -> Option<ContextId> {
        let state = self.state.lock();
        state
            .current
            .filter(|c| c.thread == thread::current().id())
            .map(|c| c.context)
    }

    fn destroy_context(&self, context: ContextId) -> Result<()> {
        let _state = self.state.lock();
        self.with_conn(|conn| {
            conn.glx_destroy_context(context.0)?.check()?;
            Ok(())
        })
    }

    fn destroy_window(&self, window: WindowId) -> Result<()> {
        let mut state = self.state.lock();
        self.with_conn(|conn| {
            conn.destroy_window(window.0)?;
            if let Some(colormap) = state.colormaps.remove(&window) {
                conn.free_colormap(colormap)?;
            }
            state.deferred.retain(|e| e.window() != window);
            conn.flush()?;
            Ok(())
        })
    }

    fn close(&self) -> Result<()> {
        let _state = self.state.lock();
        match self.conn.write().take() {
            // Сокет закрывается при освобождении RustConnection
            Some(conn) => {
                drop(conn);
                Ok(())
            }
            None => Err(mg_error!(connection, "соединение с X сервером уже закрыто")),
        }
    }

    fn area(&self, window: WindowId) -> Result<WindowArea> {
        let _state = self.state.lock();
        self.with_conn(|conn| {
            let geometry = conn.get_geometry(window.0)?.reply()?;
            Ok(WindowArea::new(
                geometry.x as i32,
                geometry.y as i32,
                geometry.width as u32,
                geometry.height as u32,
            ))
        })
    }

    fn name(&self, window: WindowId) -> Result<String> {
        let _state = self.state.lock();
        self.with_conn(|conn| {
            let utf8 = conn
                .get_property(false, window.0, self.atoms.net_wm_name, self.atoms.utf8_string, 0, 1024)?
                .reply()?;
            if !utf8.value.is_empty() {
                return Ok(String::from_utf8_lossy(&utf8.value).into_owned());
            }
            let latin = conn
                .get_property(false, window.0, AtomEnum::WM_NAME, AtomEnum::STRING, 0, 1024)?
                .reply()?;
            Ok(String::from_utf8_lossy(&latin.value).into_owned())
        })
    }

    fn is_mapped(&self, window: WindowId) -> Result<bool> {
        let _state = self.state.lock();
        self.with_conn(|conn| {
            let attributes = conn.get_window_attributes(window.0)?.reply()?;
            Ok(attributes.map_state != MapState::UNMAPPED)
        })
    }

    fn configure(&self, window: WindowId, changes: Configure) -> Result<()> {
        let _state = self.state.lock();
        self.with_conn(|conn| {
            let aux = ConfigureWindowAux::new()
                .x(changes.x)
                .y(changes.y)
                .width(changes.width.map(|w| to_u16(w) as u32))
                .height(changes.height.map(|h| to_u16(h) as u32));
            conn.configure_window(window.0, &aux)?;
            Ok(())
        })
    }

    fn set_name(&self, window: WindowId, name: &str) -> Result<()> {
        let _state = self.state.lock();
        self.with_conn(|conn| {
            conn.change_property8(
                PropMode::REPLACE,
                window.0,
                AtomEnum::WM_NAME,
                AtomEnum::STRING,
                name.as_bytes(),
            )?;
            conn.change_property8(
                PropMode::REPLACE,
                window.0,
                self.atoms.net_wm_name,
                self.atoms.utf8_string,
                name.as_bytes(),
            )?;
            Ok(())
        })
    }

    fn set_mapped(&self, window: WindowId, mapped: bool) -> Result<()> {
        let _state = self.state.lock();
        self.with_conn(|conn| {
            if mapped {
                conn.map_window(window.0)?;
            } else {
                conn.unmap_window(window.0)?;
            }
            Ok(())
        })
    }

    fn set_fullscreen_hint(&self, window: WindowId, fullscreen: bool) -> Result<()> {
        let _state = self.state.lock();
        self.with_conn(|conn| {
            if fullscreen {
                conn.change_property32(
                    PropMode::REPLACE,
                    window.0,
                    self.atoms.net_wm_state,
                    AtomEnum::ATOM,
                    &[self.atoms.net_wm_state_fullscreen],
                )?;
            } else {
                conn.delete_property(window.0, self.atoms.net_wm_state)?;
            }
            Ok(())
        })
    }

    fn request_fullscreen(&self, window: WindowId, fullscreen: bool) -> Result<()> {
        let _state = self.state.lock();
        self.with_conn(|conn| {
            let action = if fullscreen { NET_WM_STATE_ADD } else { NET_WM_STATE_REMOVE };
            let event = ClientMessageEvent::new(
                32,
                window.0,
                self.atoms.net_wm_state,
                [action, self.atoms.net_wm_state_fullscreen, 0, 1, 0],
            );
            conn.send_event(
                false,
                self.root(conn),
                EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
                event,
            )?;
            Ok(())
        })
    }

    fn flush(&self) -> Result<()> {
        let _state = self.state.lock();
        self.with_conn(|conn| Ok(conn.flush()?))
    }

    fn wait_for_event(&self, window: WindowId) -> Result<NativeEvent> {
        {
            let mut state = self.state.lock();
            if let Some(position) = state.deferred.iter().position(|e| e.window() == window) {
                if let Some(event) = state.deferred.remove(position) {
                    return Ok(event);
                }
            }
        }

        self.with_conn(|conn| loop {
            let event = conn.wait_for_event()?;
            let Some(native) = self.translate(event) else {
                continue;
            };
            if native.window() == window {
                return Ok(native);
            }
            self.state.lock().deferred.push_back(native);
        })
    }

    fn wake(&self, window: WindowId) -> Result<()> {
        let _state = self.state.lock();
        self.with_conn(|conn| {
            let event = ClientMessageEvent::new(32, window.0, self.atoms.wake, [0u32; 5]);
            // Пустая маска: событие получает клиент, создавший окно
            conn.send_event(false, window.0, EventMask::NO_EVENT, event)?;
            conn.flush()?;
            Ok(())
        })
    }
}
