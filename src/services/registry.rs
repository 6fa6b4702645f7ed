use crate::error::Result;
use crate::mg_error;
use crate::events::{Event, EventKind, Key, WindowId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Результат обработчика: ошибка уходит в канал ошибок контекста
pub type HandlerResult = anyhow::Result<()>;

/// Обработчик события окна
pub enum Handler {
    /// Обработчик без аргументов (Close)
    Close(Box<dyn FnMut() -> HandlerResult + Send>),
    /// Обработчик клавиатурных событий, получает каноническую клавишу
    Key(Box<dyn FnMut(Key) -> HandlerResult + Send>),
}

impl Handler {
    pub fn close(f: impl FnMut() -> HandlerResult + Send + 'static) -> Self {
        Handler::Close(Box::new(f))
    }

    pub fn key(f: impl FnMut(Key) -> HandlerResult + Send + 'static) -> Self {
        Handler::Key(Box::new(f))
    }

    /// Подходит ли форма обработчика для типа события
    pub fn accepts(&self, kind: EventKind) -> bool {
        match self {
            Handler::Close(_) => !kind.carries_key(),
            Handler::Key(_) => kind.carries_key(),
        }
    }

    pub(crate) fn call(&mut self, event: &Event) -> HandlerResult {
        match self {
            Handler::Close(f) => f(),
            Handler::Key(f) => f(event.key.unwrap_or(Key::Unsupported)),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Close(_) => f.write_str("Handler::Close"),
            Handler::Key(_) => f.write_str("Handler::Key"),
        }
    }
}

pub type SharedHandler = Arc<Mutex<Handler>>;

/// Реестр обработчиков: (окно, тип события) -> обработчик.
///
/// Lookups clone the `Arc` out of the map so no shard lock is held while a
/// handler runs; a handler may therefore register or replace handlers itself.
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: DashMap<(WindowId, EventKind), SharedHandler>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Зарегистрировать обработчик. Возвращает true, если заменён существующий.
    pub fn register(&self, window: WindowId, kind: EventKind, handler: Handler) -> Result<bool> {
        if !handler.accepts(kind) {
            return Err(mg_error!(
                invalid_argument,
                "{:?} не подходит для события {:?}",
                handler, kind
            ));
        }
        let replaced = self
            .handlers
            .insert((window, kind), Arc::new(Mutex::new(handler)))
            .is_some();
        crate::debug_if_enabled!(
            "Обработчик {:?} окна {} {}",
            kind,
            window,
            if replaced { "заменён" } else { "зарегистрирован" }
        );
        Ok(replaced)
    }

    pub fn unregister(&self, window: WindowId, kind: EventKind) -> bool {
        self.handlers.remove(&(window, kind)).is_some()
    }

    pub fn lookup(&self, window: WindowId, kind: EventKind) -> Option<SharedHandler> {
        self.handlers.get(&(window, kind)).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, window: WindowId, kind: EventKind) -> bool {
        self.handlers.contains_key(&(window, kind))
    }

    /// Удалить все обработчики окна, вернуть их количество
    pub fn remove_window(&self, window: WindowId) -> usize {
        let before = self.handlers.len();
        self.handlers.retain(|(w, _), _| *w != window);
        before - self.handlers.len()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MgError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_register_replaces() {
        let registry = CallbackRegistry::new();
        let window = WindowId(1);
        assert!(!registry.register(window, EventKind::Close, Handler::close(|| Ok(()))).unwrap());
        assert!(registry.register(window, EventKind::Close, Handler::close(|| Ok(()))).unwrap());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_handler_shape_must_match_kind() {
        let registry = CallbackRegistry::new();
        let result = registry.register(WindowId(1), EventKind::KeyPress, Handler::close(|| Ok(())));
        assert!(matches!(result, Err(MgError::InvalidArgument(_))));
        let result = registry.register(WindowId(1), EventKind::Close, Handler::key(|_| Ok(())));
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lookup_and_call() {
        let registry = CallbackRegistry::new();
        let window = WindowId(7);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        registry
            .register(
                window,
                EventKind::KeyPress,
                Handler::key(move |key| {
                    assert_eq!(key, Key::Q);
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();

        let handler = registry.lookup(window, EventKind::KeyPress).unwrap();
        let event = Event::key(window, Key::Q, crate::events::KeyState::Pressed);
        handler.lock().call(&event).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(registry.lookup(window, EventKind::KeyRelease).is_none());
    }

    #[test]
    fn test_remove_window() {
        let registry = CallbackRegistry::new();
        registry.register(WindowId(1), EventKind::Close, Handler::close(|| Ok(()))).unwrap();
        registry.register(WindowId(1), EventKind::KeyPress, Handler::key(|_| Ok(()))).unwrap();
        registry.register(WindowId(2), EventKind::Close, Handler::close(|| Ok(()))).unwrap();

        assert_eq!(registry.remove_window(WindowId(1)), 2);
        assert!(!registry.contains(WindowId(1), EventKind::Close));
        assert!(registry.contains(WindowId(2), EventKind::Close));
        assert!(registry.unregister(WindowId(2), EventKind::Close));
        assert!(!registry.unregister(WindowId(2), EventKind::Close));
    }
}
