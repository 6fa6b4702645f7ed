//! Per-window event loop.
//!
//! One worker thread per running loop blocks in the connection's filtered wait,
//! translates native events and forwards them to the callback thread. The
//! `running` flag lives under the handle lock; `stop` clears it and injects a
//! wake message while still holding that lock, then joins the worker.

use super::dispatcher::{CallbackInvoker, EventSink};
use super::window_handle::WindowShared;
use crate::error::Result;
use crate::mg_error;
use crate::events::{CloseToken, Event, LoopState, NativeEvent, WindowId, WindowState};
use crate::mappings::KeysymToKey;
use crate::{debug_if_enabled, trace_if_enabled};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

/// Трансляция нативного события в каноническое. None - событие отбрасывается.
pub fn translate(native: &NativeEvent, window: WindowId, close_token: CloseToken) -> Option<Event> {
    if native.window() != window {
        return None;
    }
    match *native {
        NativeEvent::DestroyNotify { .. } => None,
        NativeEvent::ClientMessage { format: 32, data0, .. } if data0 == close_token.0 => {
            Some(Event::close(window))
        }
        NativeEvent::ClientMessage { .. } => None,
        NativeEvent::Key { keysym, state, .. } => {
            Some(Event::key(window, KeysymToKey::translate(keysym), state))
        }
        NativeEvent::Other { .. } => None,
    }
}

/// Запустить цикл событий окна. Уже запущенный цикл сначала останавливается.
pub(crate) fn start(shared: &Arc<WindowShared>, invoker: &CallbackInvoker) -> Result<()> {
    let (restarted, result) = {
        let _control = shared.control.lock();
        let restarted = stop_locked(shared, invoker);
        (restarted, spawn_locked(shared, invoker))
    };
    // Барьер вне `control`, как в stop
    if restarted {
        invoker.flush();
    }
    result
}

fn spawn_locked(shared: &Arc<WindowShared>, invoker: &CallbackInvoker) -> Result<()> {
    let id = shared.id;
    {
        let mut state = shared.state.lock();
        if state.window != WindowState::Created {
            return Err(mg_error!(
                invalid_state,
                "нельзя запустить цикл окна {} в состоянии {:?}",
                id, state.window
            ));
        }
        state.running = true;
        state.loop_state = LoopState::Running;
    }

    let sink = invoker.open_gate(id);
    let worker_shared = shared.clone();
    let spawned = thread::Builder::new()
        .name(format!("mgwin-events-{}", id))
        .spawn(move || run_worker(worker_shared, sink));

    let mut state = shared.state.lock();
    match spawned {
        Ok(handle) => {
            state.worker = Some(handle);
            info!("Цикл событий окна {} запущен", id);
            Ok(())
        }
        Err(e) => {
            state.running = false;
            state.loop_state = LoopState::Stopped;
            drop(state);
            invoker.close_gate(id);
            Err(e.into())
        }
    }
}

/// Остановить цикл событий окна и дождаться рабочего потока. Идемпотентно.
pub(crate) fn stop(shared: &Arc<WindowShared>, invoker: &CallbackInvoker) -> Result<()> {
    let stopped = {
        let _control = shared.control.lock();
        stop_locked(shared, invoker)
    };
    if stopped {
        // Обработчики этого окна, уже стоящие в очереди, отработают до возврата.
        // Барьер ждётся вне `control`: обработчик может управлять своим окном
        invoker.flush();
        info!("Цикл событий окна {} остановлен", shared.id);
    }
    Ok(())
}

/// Остановить рабочий поток и закрыть шлюз. Вызывается под `control`,
/// поэтому барьер диспетчера здесь не ждётся. Возвращает `true`, если поток был.
fn stop_locked(shared: &WindowShared, invoker: &CallbackInvoker) -> bool {
    let id = shared.id;
    let worker = {
        let mut state = shared.state.lock();
        if state.running {
            state.running = false;
            state.loop_state = LoopState::StopRequested;
            // Будим рабочий поток, пока флаг и пробуждение под одним замком
            if let Err(e) = shared.connection.wake(id) {
                warn!("Не удалось разбудить цикл окна {}: {}", id, e);
            }
        }
        state.worker.take()
    };

    let Some(worker) = worker else {
        return false;
    };
    if worker.join().is_err() {
        invoker
            .reporter()
            .report(id, mg_error!(native, "рабочий поток цикла событий завершился паникой"));
    }

    invoker.close_gate(id);
    shared.state.lock().loop_state = LoopState::Stopped;
    true
}

fn run_worker(shared: Arc<WindowShared>, sink: EventSink) {
    let id = shared.id;
    let close_token = shared.close_token;
    debug_if_enabled!("Рабочий поток окна {} (поколение {})", id, sink.generation());

    loop {
        if !shared.state.lock().running {
            break;
        }

        match shared.connection.wait_for_event(id) {
            Ok(native) => {
                trace_if_enabled!("Окно {}: {:?}", id, native);
                if let Some(event) = translate(&native, id, close_token) {
                    if !sink.forward(event) {
                        warn!("Поток колбэков остановлен, событие {} потеряно", event);
                    }
                }
            }
            Err(e) => {
                if e.is_connection_lost() {
                    warn!("Соединение окна {} потеряно, цикл событий завершается", id);
                } else {
                    error!("Сбой ожидания событий окна {}: {}", id, e);
                }
                {
                    let mut state = shared.state.lock();
                    if state.running {
                        state.running = false;
                        state.loop_state = LoopState::StopRequested;
                    }
                }
                sink.report(e);
                break;
            }
        }
    }

    debug_if_enabled!("Рабочий поток окна {} завершён", id);
}
