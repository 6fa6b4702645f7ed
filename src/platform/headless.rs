//! In-memory display server used for dry runs and tests.
//!
//! The server mimics the parts of an X server the crate relies on: per-connection
//! event queues filtered by window, atoms, a window manager that honours
//! `_NET_WM_STATE` hints on map and clears them on unmap, and per-thread current
//! rendering contexts. Events are injected from any thread through
//! [`HeadlessServer`].

use super::r#trait::{ContextId, NativeConnection, PixelFormat, Platform};
use crate::error::Result;
use crate::mg_error;
use crate::events::{
    CloseToken, Configure, DisplayMode, KeyState, NativeEvent, WindowArea, WindowId,
};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, info};

pub const WM_PROTOCOLS: &str = "WM_PROTOCOLS";
pub const WM_DELETE_WINDOW: &str = "WM_DELETE_WINDOW";
pub const NET_WM_STATE: &str = "_NET_WM_STATE";
pub const NET_WM_STATE_FULLSCREEN: &str = "_NET_WM_STATE_FULLSCREEN";
pub const WAKE_MESSAGE: &str = "_MGWIN_WAKE";

/// Настройки эмулируемого сервера
#[derive(Debug, Clone)]
pub struct HeadlessOptions {
    pub rendering_supported: bool,
    pub formats: Vec<PixelFormat>,
    pub screen_sizes: Vec<(u32, u32)>,
    pub depths: Vec<u32>,
    pub current_size: usize,
    pub default_depth: u32,
}

impl Default for HeadlessOptions {
    fn default() -> Self {
        Self {
            rendering_supported: true,
            formats: vec![
                PixelFormat { visual: 0x21, depth: 24, bits_per_rgb: 8, double_buffered: true },
                PixelFormat { visual: 0x22, depth: 32, bits_per_rgb: 8, double_buffered: true },
            ],
            screen_sizes: vec![(1920, 1080), (1280, 720), (800, 600)],
            depths: vec![24, 32],
            current_size: 0,
            default_depth: 24,
        }
    }
}

#[derive(Debug)]
struct HeadlessWindow {
    connection: u32,
    area: WindowArea,
    name: String,
    mapped: bool,
    fullscreen: bool,
    protocols: Vec<u32>,
    net_wm_state: Vec<u32>,
    fullscreen_requests: Vec<bool>,
}

#[derive(Debug, Default)]
struct ConnectionState {
    open: bool,
    queue: VecDeque<NativeEvent>,
}

#[derive(Debug, Default)]
struct ServerState {
    next_id: u32,
    options: HeadlessOptions,
    atoms: HashMap<String, u32>,
    connections: HashMap<u32, ConnectionState>,
    windows: HashMap<WindowId, HeadlessWindow>,
    contexts: HashMap<ContextId, WindowId>,
    current: HashMap<ThreadId, ContextId>,
    waiters: HashMap<WindowId, usize>,
    max_waiters: HashMap<WindowId, usize>,
    failing_waits: HashSet<WindowId>,
    calls_after_close: usize,
}

impl ServerState {
    fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        0x0040_0000 + self.next_id
    }

    fn intern(&mut self, name: &str) -> u32 {
        if let Some(atom) = self.atoms.get(name) {
            return *atom;
        }
        let atom = 0x100 + self.atoms.len() as u32;
        self.atoms.insert(name.to_string(), atom);
        atom
    }

    fn ensure_open(&mut self, connection: u32) -> Result<()> {
        let open = self
            .connections
            .get(&connection)
            .map(|c| c.open)
            .unwrap_or(false);
        if open {
            Ok(())
        } else {
            self.calls_after_close += 1;
            Err(mg_error!(connection, "соединение {} закрыто", connection))
        }
    }

    fn window_mut(&mut self, connection: u32, window: WindowId) -> Result<&mut HeadlessWindow> {
        self.ensure_open(connection)?;
        match self.windows.get_mut(&window) {
            Some(w) if w.connection == connection => Ok(w),
            _ => Err(mg_error!(native, "BadWindow: {}", window)),
        }
    }

    fn push_event(&mut self, event: NativeEvent) -> bool {
        let Some(connection) = self.windows.get(&event.window()).map(|w| w.connection) else {
            return false;
        };
        match self.connections.get_mut(&connection) {
            Some(state) if state.open => {
                state.queue.push_back(event);
                true
            }
            _ => false,
        }
    }
}

struct ServerInner {
    state: Mutex<ServerState>,
    events: Condvar,
}

/// Эмулируемый дисплейный сервер. Клонирование даёт ещё одну ссылку на тот же сервер.
#[derive(Clone)]
pub struct HeadlessServer {
    inner: Arc<ServerInner>,
}

impl Default for HeadlessServer {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessServer {
    pub fn new() -> Self {
        Self::with_options(HeadlessOptions::default())
    }

    pub fn with_options(options: HeadlessOptions) -> Self {
        let state = ServerState { options, ..ServerState::default() };
        Self {
            inner: Arc::new(ServerInner {
                state: Mutex::new(state),
                events: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.inner.state.lock()
    }

    /// Изменить настройки сервера (влияет на последующие соединения)
    pub fn configure(&self, f: impl FnOnce(&mut HeadlessOptions)) {
        f(&mut self.lock().options);
    }

    pub fn atom(&self, name: &str) -> u32 {
        self.lock().intern(name)
    }

    /// Поставить нативное событие в очередь соединения, которому принадлежит окно
    pub fn inject(&self, event: NativeEvent) -> bool {
        let delivered = self.lock().push_event(event);
        if delivered {
            self.inner.events.notify_all();
        } else {
            debug!("Событие {:?} некому доставить", event);
        }
        delivered
    }

    pub fn press_key(&self, window: WindowId, keysym: u32) -> bool {
        self.inject(NativeEvent::Key { window, keysym, state: KeyState::Pressed })
    }

    pub fn release_key(&self, window: WindowId, keysym: u32) -> bool {
        self.inject(NativeEvent::Key { window, keysym, state: KeyState::Released })
    }

    /// Запрос закрытия от оконного менеджера (если окно подписано на WM_DELETE_WINDOW)
    pub fn request_close(&self, window: WindowId) -> bool {
        let delete = {
            let mut state = self.lock();
            let delete = state.intern(WM_DELETE_WINDOW);
            let subscribed = state
                .windows
                .get(&window)
                .map(|w| w.protocols.contains(&delete))
                .unwrap_or(false);
            if !subscribed {
                return false;
            }
            delete
        };
        self.inject(NativeEvent::ClientMessage { window, format: 32, data0: delete })
    }

    pub fn send_destroy_notify(&self, window: WindowId) -> bool {
        self.inject(NativeEvent::DestroyNotify { window })
    }

    /// Следующее ожидание событий этого окна завершится ошибкой
    pub fn fail_next_wait(&self, window: WindowId) {
        self.lock().failing_waits.insert(window);
        self.inner.events.notify_all();
    }

    pub fn window_exists(&self, window: WindowId) -> bool {
        self.lock().windows.contains_key(&window)
    }

    pub fn open_connections(&self) -> usize {
        self.lock().connections.values().filter(|c| c.open).count()
    }

    pub fn live_contexts(&self) -> usize {
        self.lock().contexts.len()
    }

    /// Сколько потоков сейчас ждут событий окна
    pub fn active_waiters(&self, window: WindowId) -> usize {
        self.lock().waiters.get(&window).copied().unwrap_or(0)
    }

    /// Максимум одновременно ждущих потоков за всё время жизни окна
    pub fn max_concurrent_waiters(&self, window: WindowId) -> usize {
        self.lock().max_waiters.get(&window).copied().unwrap_or(0)
    }

    pub fn pending_events(&self, window: WindowId) -> usize {
        let state = self.lock();
        let Some(connection) = state.windows.get(&window).map(|w| w.connection) else {
            return 0;
        };
        state
            .connections
            .get(&connection)
            .map(|c| c.queue.iter().filter(|e| e.window() == window).count())
            .unwrap_or(0)
    }

    /// Значение свойства _NET_WM_STATE на окне
    pub fn net_wm_state(&self, window: WindowId) -> Vec<u32> {
        self.lock()
            .windows
            .get(&window)
            .map(|w| w.net_wm_state.clone())
            .unwrap_or_default()
    }

    /// Клиентские сообщения _NET_WM_STATE, отправленные корневому окну
    pub fn fullscreen_requests(&self, window: WindowId) -> Vec<bool> {
        self.lock()
            .windows
            .get(&window)
            .map(|w| w.fullscreen_requests.clone())
            .unwrap_or_default()
    }

    /// Полноэкранное ли окно с точки зрения оконного менеджера
    pub fn is_fullscreen(&self, window: WindowId) -> bool {
        self.lock().windows.get(&window).map(|w| w.fullscreen).unwrap_or(false)
    }

    /// Число текущих контекстов по всем потокам
    pub fn bound_contexts(&self) -> usize {
        self.lock().current.len()
    }

    /// Вызовы через уже закрытые соединения
    pub fn calls_after_close(&self) -> usize {
        self.lock().calls_after_close
    }

    fn open_connection(&self) -> Result<HeadlessConnection> {
        let id = {
            let mut state = self.lock();
            let id = state.allocate_id();
            state.connections.insert(id, ConnectionState { open: true, ..Default::default() });
            id
        };
        debug!("Открыто headless соединение {}", id);
        Ok(HeadlessConnection { id, server: self.clone() })
    }
}

/// Платформа поверх эмулируемого сервера
pub struct HeadlessPlatform {
    server: HeadlessServer,
}

impl HeadlessPlatform {
    pub fn new(server: HeadlessServer) -> Self {
        info!("Инициализация HeadlessPlatform");
        Self { server }
    }

    pub fn server(&self) -> &HeadlessServer {
        &self.server
    }
}

impl Platform for HeadlessPlatform {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn connect(&self) -> Result<Arc<dyn NativeConnection>> {
        Ok(Arc::new(self.server.open_connection()?))
    }

    fn current_display_mode(&self) -> Result<DisplayMode> {
        let state = self.server.lock();
        let options = &state.options;
        options
            .screen_sizes
            .get(options.current_size)
            .map(|(w, h)| DisplayMode::new(*w, *h, options.default_depth))
            .ok_or_else(|| mg_error!(native, "нет ни одного размера экрана"))
    }

    fn display_modes(&self) -> Result<Vec<DisplayMode>> {
        let state = self.server.lock();
        let options = &state.options;
        Ok(options
            .depths
            .iter()
            .flat_map(|depth| {
                options
                    .screen_sizes
                    .iter()
                    .map(move |(w, h)| DisplayMode::new(*w, *h, *depth))
            })
            .collect())
    }
}

/// Соединение с эмулируемым сервером
pub struct HeadlessConnection {
    id: u32,
    server: HeadlessServer,
}

impl HeadlessConnection {
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl NativeConnection for HeadlessConnection {
    fn supports_rendering(&self) -> Result<bool> {
        let mut state = self.server.lock();
        state.ensure_open(self.id)?;
        Ok(state.options.rendering_supported)
    }

    fn choose_format(&self) -> Result<Option<PixelFormat>> {
        let mut state = self.server.lock();
        state.ensure_open(self.id)?;
        Ok(state
            .options
            .formats
            .iter()
            .find(|f| f.is_suitable() && f.double_buffered)
            .copied())
    }

    fn create_window(&self, _format: &PixelFormat, area: WindowArea) -> Result<WindowId> {
        let mut state = self.server.lock();
        state.ensure_open(self.id)?;
        let window = WindowId(state.allocate_id());
        state.windows.insert(
            window,
            HeadlessWindow {
                connection: self.id,
                area,
                name: String::new(),
                mapped: false,
                fullscreen: false,
                protocols: Vec::new(),
                net_wm_state: Vec::new(),
                fullscreen_requests: Vec::new(),
            },
        );
        Ok(window)
    }

    fn create_context(&self, window: WindowId, _format: &PixelFormat) -> Result<ContextId> {
        let mut state = self.server.lock();
        state.window_mut(self.id, window)?;
        let context = ContextId(state.allocate_id());
        state.contexts.insert(context, window);
        Ok(context)
    }

    fn register_close_token(&self, window: WindowId) -> Result<CloseToken> {
        let mut state = self.server.lock();
        let delete = state.intern(WM_DELETE_WINDOW);
        state.intern(WM_PROTOCOLS);
        let w = state.window_mut(self.id, window)?;
        if !w.protocols.contains(&delete) {
            w.protocols.push(delete);
        }
        Ok(CloseToken(delete))
    }

    fn make_current(&self, window: WindowId, context: Option<ContextId>) -> Result<()> {
        let mut state = self.server.lock();
        state.ensure_open(self.id)?;
        let thread = thread::current().id();
        match context {
            Some(context) => {
                if state.contexts.get(&context) != Some(&window) {
                    return Err(mg_error!(native, "BadContext: {:?}", context));
                }
                state.current.insert(thread, context);
            }
            None => {
                state.current.remove(&thread);
            }
        }
        Ok(())
    }

    fn current_context(&self) -> Option<ContextId> {
        self.server.lock().current.get(&thread::current().id()).copied()
    }

    fn destroy_context(&self, context: ContextId) -> Result<()> {
        let mut state = self.server.lock();
        state.ensure_open(self.id)?;
        state
            .contexts
            .remove(&context)
            .map(|_| ())
            .ok_or_else(|| mg_error!(native, "BadContext: {:?}", context))
    }

    fn destroy_window(&self, window: WindowId) -> Result<()> {
        let mut state = self.server.lock();
        state.window_mut(self.id, window)?;
        state.windows.remove(&window);
        if let Some(connection) = state.connections.get_mut(&self.id) {
            connection.queue.retain(|e| e.window() != window);
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        {
            let mut state = self.server.lock();
            state.ensure_open(self.id)?;
            let owned: Vec<WindowId> = state
                .windows
                .iter()
                .filter(|(_, w)| w.connection == self.id)
                .map(|(id, _)| *id)
                .collect();
            for window in owned {
                state.windows.remove(&window);
                state.contexts.retain(|_, w| *w != window);
            }
            if let Some(connection) = state.connections.get_mut(&self.id) {
                connection.open = false;
                connection.queue.clear();
            }
        }
        // Будим всех, кто ждёт на закрытом соединении
        self.server.inner.events.notify_all();
        debug!("Закрыто headless соединение {}", self.id);
        Ok(())
    }

    fn area(&self, window: WindowId) -> Result<WindowArea> {
        Ok(self.server.lock().window_mut(self.id, window)?.area)
    }

    fn name(&self, window: WindowId) -> Result<String> {
        Ok(self.server.lock().window_mut(self.id, window)?.name.clone())
    }

    fn is_mapped(&self, window: WindowId) -> Result<bool> {
        Ok(self.server.lock().window_mut(self.id, window)?.mapped)
    }

    fn configure(&self, window: WindowId, changes: Configure) -> Result<()> {
        let mut state = self.server.lock();
        let w = state.window_mut(self.id, window)?;
        w.area = changes.apply_to(w.area);
        Ok(())
    }

    fn set_name(&self, window: WindowId, name: &str) -> Result<()> {
        self.server.lock().window_mut(self.id, window)?.name = name.to_string();
        Ok(())
    }

    fn set_mapped(&self, window: WindowId, mapped: bool) -> Result<()> {
        let mut state = self.server.lock();
        let fullscreen_atom = state.intern(NET_WM_STATE_FULLSCREEN);
        let w = state.window_mut(self.id, window)?;
        if w.mapped == mapped {
            return Ok(());
        }
        w.mapped = mapped;
        if mapped {
            // Оконный менеджер читает подсказку при отображении
            w.fullscreen = w.net_wm_state.contains(&fullscreen_atom);
        } else {
            // ...и удаляет её при скрытии окна
            w.net_wm_state.clear();
            w.fullscreen = false;
        }
        Ok(())
    }

    fn set_fullscreen_hint(&self, window: WindowId, fullscreen: bool) -> Result<()> {
        let mut state = self.server.lock();
        let fullscreen_atom = state.intern(NET_WM_STATE_FULLSCREEN);
        let w = state.window_mut(self.id, window)?;
        if fullscreen {
            w.net_wm_state = vec![fullscreen_atom];
        } else {
            w.net_wm_state.clear();
        }
        Ok(())
    }

    fn request_fullscreen(&self, window: WindowId, fullscreen: bool) -> Result<()> {
        let mut state = self.server.lock();
        let w = state.window_mut(self.id, window)?;
        w.fullscreen_requests.push(fullscreen);
        if w.mapped {
            w.fullscreen = fullscreen;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.server.lock().ensure_open(self.id)
    }

    fn wait_for_event(&self, window: WindowId) -> Result<NativeEvent> {
        let mut state = self.server.lock();
        *state.waiters.entry(window).or_insert(0) += 1;
        let waiting = state.waiters[&window];
        let max = state.max_waiters.entry(window).or_insert(0);
        *max = (*max).max(waiting);

        let result = loop {
            if state.failing_waits.remove(&window) {
                break Err(mg_error!(native, "сбой чтения событий окна {}", window));
            }
            // Закрытие соединения во время ожидания не считается обращением после закрытия
            let connection = match state.connections.get_mut(&self.id) {
                Some(connection) if connection.open => connection,
                _ => break Err(mg_error!(connection, "соединение {} закрыто", self.id)),
            };
            if let Some(position) = connection.queue.iter().position(|e| e.window() == window) {
                if let Some(event) = connection.queue.remove(position) {
                    break Ok(event);
                }
            }
            self.server.inner.events.wait(&mut state);
        };

        if let Some(count) = state.waiters.get_mut(&window) {
            *count -= 1;
        }
        result
    }

    fn wake(&self, window: WindowId) -> Result<()> {
        let mut state = self.server.lock();
        state.ensure_open(self.id)?;
        let wake = state.intern(WAKE_MESSAGE);
        state.push_event(NativeEvent::ClientMessage { window, format: 32, data0: wake });
        drop(state);
        self.server.inner.events.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MgError;

    fn connection(server: &HeadlessServer) -> HeadlessConnection {
        server.open_connection().unwrap()
    }

    fn window(conn: &HeadlessConnection) -> WindowId {
        let format = conn.choose_format().unwrap().unwrap();
        conn.create_window(&format, WindowArea::new(0, 0, 100, 100)).unwrap()
    }

    #[test]
    fn test_wait_filters_by_window() {
        let server = HeadlessServer::new();
        let conn = connection(&server);
        let a = window(&conn);
        let b = window(&conn);

        server.press_key(a, 0x61);
        server.press_key(b, 0x62);
        server.release_key(a, 0x61);

        assert!(matches!(conn.wait_for_event(b).unwrap(), NativeEvent::Key { keysym: 0x62, .. }));
        assert!(matches!(
            conn.wait_for_event(a).unwrap(),
            NativeEvent::Key { keysym: 0x61, state: KeyState::Pressed, .. }
        ));
        assert!(matches!(
            conn.wait_for_event(a).unwrap(),
            NativeEvent::Key { state: KeyState::Released, .. }
        ));
        assert_eq!(server.pending_events(a), 0);
    }

    #[test]
    fn test_wake_unblocks_waiter() {
        let server = HeadlessServer::new();
        let conn = Arc::new(connection(&server));
        let w = window(&conn);

        let waiter = {
            let conn = conn.clone();
            thread::spawn(move || conn.wait_for_event(w))
        };
        while server.active_waiters(w) == 0 {
            thread::yield_now();
        }
        conn.wake(w).unwrap();

        let event = waiter.join().unwrap().unwrap();
        let wake = server.atom(WAKE_MESSAGE);
        assert_eq!(event, NativeEvent::ClientMessage { window: w, format: 32, data0: wake });
    }

    #[test]
    fn test_close_fails_pending_wait() {
        let server = HeadlessServer::new();
        let conn = Arc::new(connection(&server));
        let w = window(&conn);

        let waiter = {
            let conn = conn.clone();
            thread::spawn(move || conn.wait_for_event(w))
        };
        while server.active_waiters(w) == 0 {
            thread::yield_now();
        }
        conn.close().unwrap();

        assert!(matches!(waiter.join().unwrap(), Err(MgError::Connection(_))));
        assert!(!server.window_exists(w));
        assert_eq!(server.open_connections(), 0);
    }

    #[test]
    fn test_close_request_requires_protocol() {
        let server = HeadlessServer::new();
        let conn = connection(&server);
        let w = window(&conn);

        assert!(!server.request_close(w));
        let token = conn.register_close_token(w).unwrap();
        assert!(server.request_close(w));
        assert_eq!(
            conn.wait_for_event(w).unwrap(),
            NativeEvent::ClientMessage { window: w, format: 32, data0: token.0 }
        );
    }

    #[test]
    fn test_window_manager_honours_hint_on_map() {
        let server = HeadlessServer::new();
        let conn = connection(&server);
        let w = window(&conn);

        conn.set_fullscreen_hint(w, true).unwrap();
        assert!(!server.is_fullscreen(w));
        conn.set_mapped(w, true).unwrap();
        assert!(server.is_fullscreen(w));

        conn.set_mapped(w, false).unwrap();
        assert!(server.net_wm_state(w).is_empty());
    }

    #[test]
    fn test_current_context_is_per_thread() {
        let server = HeadlessServer::new();
        let conn = Arc::new(connection(&server));
        let w = window(&conn);
        let format = conn.choose_format().unwrap().unwrap();
        let context = conn.create_context(w, &format).unwrap();

        conn.make_current(w, Some(context)).unwrap();
        assert_eq!(conn.current_context(), Some(context));

        let other = {
            let conn = conn.clone();
            thread::spawn(move || conn.current_context())
        };
        assert_eq!(other.join().unwrap(), None);

        conn.make_current(w, None).unwrap();
        assert_eq!(server.bound_contexts(), 0);
    }

    #[test]
    fn test_display_modes_are_depth_major() {
        let platform = HeadlessPlatform::new(HeadlessServer::new());
        let modes = platform.display_modes().unwrap();
        assert_eq!(modes.len(), 6);
        assert_eq!(modes[0], DisplayMode::new(1920, 1080, 24));
        assert_eq!(modes[3], DisplayMode::new(1920, 1080, 32));
        assert_eq!(platform.current_display_mode().unwrap(), DisplayMode::new(1920, 1080, 24));
    }
}
