use super::registry::CallbackRegistry;
use crate::debug_if_enabled;
use crate::error::{MgError, Result};
use crate::events::{Event, WindowId};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{error, info, warn};

/// Асинхронная ошибка: сбой обработчика или рабочего потока окна
#[derive(Debug)]
pub struct ReportedError {
    pub window: WindowId,
    pub error: MgError,
}

impl fmt::Display for ReportedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "окно {}: {}", self.window, self.error)
    }
}

enum Message {
    Deliver { event: Event, generation: u64 },
    Barrier(Sender<()>),
    Shutdown,
}

/// Отправитель ошибок в канал контекста с записью в лог
#[derive(Clone)]
pub struct ErrorReporter {
    sender: Sender<ReportedError>,
}

impl ErrorReporter {
    pub fn new(sender: Sender<ReportedError>) -> Self {
        Self { sender }
    }

    pub fn report(&self, window: WindowId, error: MgError) {
        error!("Ошибка окна {}: {}", window, error);
        // Получатель мог быть уже освобождён вместе с контекстом
        let _ = self.sender.send(ReportedError { window, error });
    }
}

/// Канал, через который рабочий поток окна передаёт события диспетчеру
#[derive(Clone)]
pub struct EventSink {
    sender: Sender<Message>,
    reporter: ErrorReporter,
    window: WindowId,
    generation: u64,
}

impl EventSink {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Передать событие. false, если диспетчер уже остановлен.
    pub fn forward(&self, event: Event) -> bool {
        self.sender
            .send(Message::Deliver { event, generation: self.generation })
            .is_ok()
    }

    pub fn report(&self, error: MgError) {
        self.reporter.report(self.window, error);
    }
}

/// Поток колбэков: получает события из рабочих потоков всех окон и вызывает
/// обработчики по очереди, в порядке поступления.
///
/// Each running loop is admitted through a gate holding its generation. Events
/// from a stopped or superseded loop fail the gate check and are dropped.
pub struct CallbackInvoker {
    sender: Sender<Message>,
    reporter: ErrorReporter,
    gates: Arc<DashMap<WindowId, u64>>,
    next_generation: AtomicU64,
    thread_id: ThreadId,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CallbackInvoker {
    pub fn new(registry: Arc<CallbackRegistry>, reporter: ErrorReporter) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let gates = Arc::new(DashMap::new());

        let dispatch = Dispatcher {
            receiver,
            registry,
            gates: gates.clone(),
            reporter: reporter.clone(),
        };
        let handle = thread::Builder::new()
            .name("mgwin-dispatch".to_string())
            .spawn(move || dispatch.run())?;
        info!("Поток колбэков запущен");

        Ok(Self {
            sender,
            reporter,
            gates,
            next_generation: AtomicU64::new(0),
            thread_id: handle.thread().id(),
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Открыть доступ новому запуску цикла окна; старый запуск отсекается
    pub fn open_gate(&self, window: WindowId) -> EventSink {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.gates.insert(window, generation);
        debug_if_enabled!("Окно {}: поколение цикла {}", window, generation);
        EventSink {
            sender: self.sender.clone(),
            reporter: self.reporter.clone(),
            window,
            generation,
        }
    }

    pub fn close_gate(&self, window: WindowId) {
        self.gates.remove(&window);
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    pub fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Дождаться, пока диспетчер обработает всё, что уже стоит в очереди.
    /// На самом потоке колбэков возвращается сразу.
    pub fn flush(&self) {
        if self.is_dispatch_thread() {
            return;
        }
        let (done, wait) = bounded(1);
        if self.sender.send(Message::Barrier(done)).is_ok() {
            // Ошибка означает, что поток колбэков уже завершился
            let _ = wait.recv();
        }
    }

    pub fn shutdown(&self) {
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        let _ = self.sender.send(Message::Shutdown);
        if self.is_dispatch_thread() {
            // Поток завершится сам после текущего обработчика
            return;
        }
        if handle.join().is_err() {
            warn!("Поток колбэков завершился паникой");
        }
        info!("Поток колбэков остановлен");
    }
}

impl Drop for CallbackInvoker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Dispatcher {
    receiver: Receiver<Message>,
    registry: Arc<CallbackRegistry>,
    gates: Arc<DashMap<WindowId, u64>>,
    reporter: ErrorReporter,
}

impl Dispatcher {
    fn run(self) {
        for message in self.receiver.iter() {
            match message {
                Message::Deliver { event, generation } => self.deliver(event, generation),
                Message::Barrier(done) => {
                    let _ = done.send(());
                }
                Message::Shutdown => break,
            }
        }
    }

    fn deliver(&self, event: Event, generation: u64) {
        let admitted = self
            .gates
            .get(&event.window)
            .map(|gate| *gate == generation)
            .unwrap_or(false);
        if !admitted {
            debug_if_enabled!("Событие {} от остановленного цикла отброшено", event);
            return;
        }

        let Some(handler) = self.registry.lookup(event.window, event.kind) else {
            debug_if_enabled!("Нет обработчика для {}", event);
            return;
        };

        debug_if_enabled!("Доставка {}", event);
        let outcome = catch_unwind(AssertUnwindSafe(|| handler.lock().call(&event)));
        let message = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{:#}", e),
            Err(panic) => format!("паника: {}", panic_message(panic.as_ref())),
        };
        self.reporter.report(
            event.window,
            MgError::Handler { window: event.window, kind: event.kind, message },
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "неизвестная причина".to_string()
    }
}
