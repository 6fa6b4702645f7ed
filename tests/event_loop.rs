use crossbeam_channel::{unbounded, Receiver};
use mgwin::platform::{HeadlessPlatform, HeadlessServer};
use mgwin::{Context, EventKind, Key, LoopState, MgError, Window, WindowState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn setup() -> (HeadlessServer, Context) {
    let server = HeadlessServer::new();
    let context = Context::new(Arc::new(HeadlessPlatform::new(server.clone()))).unwrap();
    (server, context)
}

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seen {
    Press(Key),
    Release(Key),
    Close,
}

/// Обработчики всех трёх типов, пишущие в канал
fn record(context: &Context, window: &Window) -> Receiver<Seen> {
    let (tx, rx) = unbounded();
    let press = tx.clone();
    context
        .on_key_press(window, move |key| Ok(press.send(Seen::Press(key))?))
        .unwrap();
    let release = tx.clone();
    context
        .on_key_release(window, move |key| Ok(release.send(Seen::Release(key))?))
        .unwrap();
    context.on_close(window, move || Ok(tx.send(Seen::Close)?)).unwrap();
    rx
}

#[test]
fn test_demo_scenario() {
    let (server, context) = setup();
    let window = context.create_window("Demo", 0, 0, 640, 480).unwrap();
    let seen = record(&context, &window);

    context.start_event_loop(&window).unwrap();
    assert_eq!(window.loop_state(), LoopState::Running);

    assert!(server.press_key(window.id(), 0x61));
    assert!(server.press_key(window.id(), 0x41));
    assert!(server.request_close(window.id()));

    assert_eq!(seen.recv_timeout(TIMEOUT).unwrap(), Seen::Press(Key::A));
    assert_eq!(seen.recv_timeout(TIMEOUT).unwrap(), Seen::Press(Key::A));
    assert_eq!(seen.recv_timeout(TIMEOUT).unwrap(), Seen::Close);

    context.stop_event_loop(&window).unwrap();
    assert_eq!(window.loop_state(), LoopState::Stopped);
    context.destroy_window(&window).unwrap();
    assert_eq!(window.state(), WindowState::Destroyed);
    assert!(!server.window_exists(window.id()));
    assert_eq!(server.open_connections(), 0);
    assert!(context.errors().try_recv().is_err());
}

#[test]
fn test_stop_is_idempotent() {
    let (server, context) = setup();
    let window = context.create_window("a", 0, 0, 100, 100).unwrap();

    context.stop_event_loop(&window).unwrap();
    context.start_event_loop(&window).unwrap();
    assert!(wait_until(|| server.active_waiters(window.id()) == 1));

    context.stop_event_loop(&window).unwrap();
    context.stop_event_loop(&window).unwrap();
    assert_eq!(window.loop_state(), LoopState::Stopped);
    assert_eq!(server.active_waiters(window.id()), 0);
}

#[test]
fn test_restart_never_runs_two_loops() {
    let (server, context) = setup();
    let window = context.create_window("a", 0, 0, 100, 100).unwrap();
    let seen = record(&context, &window);

    context.start_event_loop(&window).unwrap();
    assert!(wait_until(|| server.active_waiters(window.id()) == 1));
    context.start_event_loop(&window).unwrap();
    assert!(wait_until(|| server.active_waiters(window.id()) == 1));
    assert_eq!(server.max_concurrent_waiters(window.id()), 1);

    // Новый цикл доставляет события
    server.press_key(window.id(), 0x62);
    assert_eq!(seen.recv_timeout(TIMEOUT).unwrap(), Seen::Press(Key::B));

    context.stop_event_loop(&window).unwrap();
    context.destroy_window(&window).unwrap();
}

#[test]
fn test_lifecycle_stress() {
    let (server, context) = setup();
    for i in 0..50u32 {
        let window = context.create_window("stress", 0, 0, 50, 50).unwrap();
        let seen = record(&context, &window);
        context.start_event_loop(&window).unwrap();
        if i % 2 == 0 {
            server.press_key(window.id(), 0x61 + (i % 26));
            seen.recv_timeout(TIMEOUT).unwrap();
        }
        context.stop_event_loop(&window).unwrap();
        context.destroy_window(&window).unwrap();
    }
    assert_eq!(server.calls_after_close(), 0);
    assert_eq!(server.open_connections(), 0);
    assert_eq!(server.live_contexts(), 0);
    assert!(context.windows().is_empty());
    assert!(context.registry().is_empty());
}

#[test]
fn test_windows_do_not_share_events() {
    let (server, context) = setup();
    let first = context.create_window("first", 0, 0, 100, 100).unwrap();
    let second = context.create_window("second", 0, 0, 100, 100).unwrap();
    let first_seen = record(&context, &first);
    let second_seen = record(&context, &second);

    context.start_event_loop(&first).unwrap();
    context.start_event_loop(&second).unwrap();

    for (offset, window) in [first.id(), second.id(), first.id(), second.id()].iter().enumerate() {
        server.press_key(*window, 0x61 + offset as u32);
    }

    assert_eq!(first_seen.recv_timeout(TIMEOUT).unwrap(), Seen::Press(Key::A));
    assert_eq!(first_seen.recv_timeout(TIMEOUT).unwrap(), Seen::Press(Key::C));
    assert_eq!(second_seen.recv_timeout(TIMEOUT).unwrap(), Seen::Press(Key::B));
    assert_eq!(second_seen.recv_timeout(TIMEOUT).unwrap(), Seen::Press(Key::D));

    context.stop_event_loop(&first).unwrap();
    context.stop_event_loop(&second).unwrap();
    assert!(first_seen.try_recv().is_err());
    assert!(second_seen.try_recv().is_err());
}

#[test]
fn test_close_handler_runs_once_and_can_be_replaced() {
    let (server, context) = setup();
    let window = context.create_window("a", 0, 0, 100, 100).unwrap();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let counter = first.clone();
    context
        .on_close(&window, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    context.start_event_loop(&window).unwrap();

    server.request_close(window.id());
    assert!(wait_until(|| first.load(Ordering::SeqCst) == 1));

    let counter = second.clone();
    assert!(context
        .on_close(&window, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap());
    server.request_close(window.id());
    assert!(wait_until(|| second.load(Ordering::SeqCst) == 1));

    context.stop_event_loop(&window).unwrap();
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[test]
fn test_non_input_events_are_discarded() {
    let (server, context) = setup();
    let window = context.create_window("a", 0, 0, 100, 100).unwrap();
    let seen = record(&context, &window);
    context.start_event_loop(&window).unwrap();

    server.send_destroy_notify(window.id());
    server.inject(mgwin::events::NativeEvent::Other { window: window.id(), code: 22 });
    server.release_key(window.id(), 0xff0d);

    assert_eq!(seen.recv_timeout(TIMEOUT).unwrap(), Seen::Release(Key::Unsupported));
    context.stop_event_loop(&window).unwrap();
    assert!(seen.try_recv().is_err());
}

#[test]
fn test_handler_failures_do_not_stop_delivery() {
    let (server, context) = setup();
    let window = context.create_window("a", 0, 0, 100, 100).unwrap();
    let delivered = Arc::new(AtomicUsize::new(0));

    let counter = delivered.clone();
    context
        .on_key_press(&window, move |key| {
            counter.fetch_add(1, Ordering::SeqCst);
            match key {
                Key::E => anyhow::bail!("ошибка обработчика"),
                Key::P => panic!("паника обработчика"),
                _ => Ok(()),
            }
        })
        .unwrap();
    context.start_event_loop(&window).unwrap();

    // e, p, a
    for keysym in [0x65, 0x70, 0x61] {
        server.press_key(window.id(), keysym);
    }
    assert!(wait_until(|| delivered.load(Ordering::SeqCst) == 3));

    let errors: Vec<_> = (0..2)
        .map(|_| context.errors().recv_timeout(TIMEOUT).unwrap())
        .collect();
    assert!(errors.iter().all(|e| e.window == window.id()));
    assert!(errors.iter().all(|e| matches!(
        e.error,
        MgError::Handler { kind: EventKind::KeyPress, .. }
    )));

    context.stop_event_loop(&window).unwrap();
}

#[test]
fn test_worker_native_error_is_reported() {
    let (server, context) = setup();
    let window = context.create_window("a", 0, 0, 100, 100).unwrap();
    server.fail_next_wait(window.id());
    context.start_event_loop(&window).unwrap();

    let reported = context.errors().recv_timeout(TIMEOUT).unwrap();
    assert_eq!(reported.window, window.id());
    assert!(matches!(reported.error, MgError::Native(_)));
    assert!(wait_until(|| window.loop_state() == LoopState::StopRequested));

    context.stop_event_loop(&window).unwrap();
    assert_eq!(window.loop_state(), LoopState::Stopped);
    context.destroy_window(&window).unwrap();
    assert_eq!(server.open_connections(), 0);
}

#[test]
fn test_no_handler_runs_after_stop_returns() {
    let (server, context) = setup();
    let window = context.create_window("a", 0, 0, 100, 100).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    context
        .on_key_press(&window, move |_| {
            thread::sleep(Duration::from_millis(1));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    context.start_event_loop(&window).unwrap();

    for _ in 0..200 {
        server.press_key(window.id(), 0x61);
    }
    assert!(wait_until(|| calls.load(Ordering::SeqCst) > 0));
    context.stop_event_loop(&window).unwrap();

    let after_stop = calls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(calls.load(Ordering::SeqCst), after_stop);
}

#[test]
fn test_stop_from_handler_does_not_deadlock() {
    let (server, context) = setup();
    let context = Arc::new(context);
    let window = context.create_window("a", 0, 0, 100, 100).unwrap();
    let (done_tx, done_rx) = unbounded();

    let weak: Weak<Context> = Arc::downgrade(&context);
    let handle = window.clone();
    context
        .on_close(&window, move || {
            if let Some(context) = weak.upgrade() {
                context.stop_event_loop(&handle)?;
            }
            done_tx.send(handle.loop_state())?;
            Ok(())
        })
        .unwrap();
    context.start_event_loop(&window).unwrap();

    server.request_close(window.id());
    assert_eq!(done_rx.recv_timeout(TIMEOUT).unwrap(), LoopState::Stopped);
    assert_eq!(window.loop_state(), LoopState::Stopped);
    context.destroy_window(&window).unwrap();
}

/// Обработчик закрытия, который после паузы вызывает `act` на своём окне
fn slow_close_handler(
    context: &Arc<Context>,
    window: &Window,
    act: fn(&Context, &Window) -> mgwin::Result<()>,
) -> (Receiver<()>, Receiver<LoopState>) {
    let (entered_tx, entered_rx) = unbounded();
    let (done_tx, done_rx) = unbounded();
    let weak: Weak<Context> = Arc::downgrade(context);
    let handle = window.clone();
    context
        .on_close(window, move || {
            entered_tx.send(())?;
            thread::sleep(Duration::from_millis(200));
            if let Some(context) = weak.upgrade() {
                act(&context, &handle)?;
            }
            done_tx.send(handle.loop_state())?;
            Ok(())
        })
        .unwrap();
    (entered_rx, done_rx)
}

/// Остановить цикл из другого потока, пока обработчик ещё работает
fn stop_concurrently(context: &Arc<Context>, window: &Window) -> Receiver<()> {
    let (stopped_tx, stopped_rx) = unbounded();
    let context = context.clone();
    let window = window.clone();
    thread::spawn(move || {
        context.stop_event_loop(&window).unwrap();
        let _ = stopped_tx.send(());
    });
    stopped_rx
}

#[test]
fn test_handler_stop_races_owner_stop() {
    let (server, context) = setup();
    let context = Arc::new(context);
    let window = context.create_window("a", 0, 0, 100, 100).unwrap();
    let (entered, done) = slow_close_handler(&context, &window, |context: &Context, window: &Window| {
        context.stop_event_loop(window)
    });
    context.start_event_loop(&window).unwrap();

    server.request_close(window.id());
    entered.recv_timeout(TIMEOUT).unwrap();
    let owner = stop_concurrently(&context, &window);

    assert_eq!(done.recv_timeout(TIMEOUT).unwrap(), LoopState::Stopped);
    owner.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(window.loop_state(), LoopState::Stopped);
    context.destroy_window(&window).unwrap();
    assert_eq!(server.open_connections(), 0);
}

#[test]
fn test_handler_restart_races_owner_stop() {
    let (server, context) = setup();
    let context = Arc::new(context);
    let window = context.create_window("a", 0, 0, 100, 100).unwrap();
    let (entered, done) = slow_close_handler(&context, &window, |context: &Context, window: &Window| {
        context.start_event_loop(window)
    });
    context.start_event_loop(&window).unwrap();

    server.request_close(window.id());
    entered.recv_timeout(TIMEOUT).unwrap();
    let owner = stop_concurrently(&context, &window);

    assert_eq!(done.recv_timeout(TIMEOUT).unwrap(), LoopState::Running);
    owner.recv_timeout(TIMEOUT).unwrap();
    assert!(server.max_concurrent_waiters(window.id()) <= 1);

    context.stop_event_loop(&window).unwrap();
    context.destroy_window(&window).unwrap();
    assert_eq!(server.open_connections(), 0);
}

#[test]
fn test_destroy_requires_stopped_loop() {
    let (_server, context) = setup();
    let window = context.create_window("a", 0, 0, 100, 100).unwrap();
    context.start_event_loop(&window).unwrap();

    assert!(matches!(context.destroy_window(&window), Err(MgError::InvalidState(_))));
    assert_eq!(window.state(), WindowState::Created);

    context.stop_event_loop(&window).unwrap();
    context.destroy_window(&window).unwrap();
    assert!(matches!(context.destroy_window(&window), Err(MgError::InvalidState(_))));
    assert!(matches!(context.start_event_loop(&window), Err(MgError::InvalidState(_))));
    // Остановка уничтоженного окна ничего не делает
    context.stop_event_loop(&window).unwrap();
}

#[test]
fn test_destroy_unbinds_current_context() {
    let (server, context) = setup();
    let window = context.create_window("a", 0, 0, 100, 100).unwrap();
    assert_eq!(server.bound_contexts(), 1);
    assert_eq!(server.live_contexts(), 1);

    context.destroy_window(&window).unwrap();
    assert_eq!(server.bound_contexts(), 0);
    assert_eq!(server.live_contexts(), 0);
}

#[test]
fn test_creation_errors() {
    let (server, context) = setup();

    server.configure(|o| o.formats.iter_mut().for_each(|f| f.double_buffered = false));
    assert!(matches!(
        context.create_window("a", 0, 0, 100, 100),
        Err(MgError::NoMatchingFormat(_))
    ));

    server.configure(|o| o.rendering_supported = false);
    assert!(matches!(
        context.create_window("a", 0, 0, 100, 100),
        Err(MgError::UnsupportedPlatform(_))
    ));

    assert_eq!(server.open_connections(), 0);
    assert!(context.windows().is_empty());
}

#[test]
fn test_fullscreen_on_visible_window_goes_through_window_manager() {
    let (server, context) = setup();
    let window = context.create_window("a", 0, 0, 100, 100).unwrap();
    context.start_event_loop(&window).unwrap();

    window.show().unwrap();
    window.set_fullscreen(true).unwrap();
    assert_eq!(server.fullscreen_requests(window.id()), vec![true]);
    assert!(server.net_wm_state(window.id()).is_empty());
    assert!(server.is_fullscreen(window.id()));

    context.stop_event_loop(&window).unwrap();
}
