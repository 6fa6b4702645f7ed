use anyhow::Result;
use clap::Parser;
use mgwin::config::Config;
use mgwin::mappings::PropertyNames;
use mgwin::platform::{create_platform, HeadlessPlatform, HeadlessServer, Platform};
use mgwin::{Context, Key, Window};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "mgwin")]
#[command(about = "Окно X11 с фоновым циклом событий: печатает нажатые клавиши, закрывается по запросу WM")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "mgwin.toml")]
    config: String,

    /// Режим сухого запуска: эмулируемый сервер вместо X11
    #[arg(long)]
    headless: bool,

    /// Уровень логирования (по умолчанию из конфигурации)
    #[arg(long)]
    log_level: Option<String>,

    /// Свойство окна NAME=VALUE (x, y, w, h, title, visible, fullscreen)
    #[arg(long = "set", value_name = "NAME=VALUE")]
    set: Vec<String>,

    /// Показать режимы экрана и выйти
    #[arg(long)]
    list_modes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;
    let level = args.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    init_tracing(&level, &config.logging.format)?;

    info!("Запуск mgwin v{}", env!("CARGO_PKG_VERSION"));
    info!("Конфигурация загружена из: {}", args.config);

    let headless = args.headless || config.platform.backend == "headless";
    let server = headless.then(HeadlessServer::new);
    let platform: Arc<dyn Platform> = match &server {
        Some(server) => {
            warn!("Режим сухого запуска - X сервер не используется");
            Arc::new(HeadlessPlatform::new(server.clone()))
        }
        None => create_platform(&config.platform, false)?,
    };
    let context = Context::new(platform)?;

    if args.list_modes {
        let current = context.current_display_mode()?;
        for mode in context.display_modes()? {
            let marker = if mode == current { " *" } else { "" };
            println!("{}{}", mode, marker);
        }
        return Ok(());
    }

    let window = context.create_configured_window(&config.window)?;
    for assignment in &args.set {
        let (property, value) = PropertyNames::parse_assignment(assignment).map_err(anyhow::Error::msg)?;
        window.set(property, value)?;
    }

    let closed = Arc::new(Notify::new());
    register_handlers(&context, &window, config.window.quit_key(), closed.clone())?;

    context.start_event_loop(&window)?;
    window.show()?;
    info!("Окно {} показано: {}", window.id(), window.area()?);

    if let Some(server) = server {
        tokio::spawn(play_script(server, window.id()));
    }

    tokio::select! {
        _ = closed.notified() => {
            info!("Окно закрыто пользователем");
        }
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Получен сигнал завершения (Ctrl+C)"),
            Err(err) => error!("Ошибка при ожидании сигнала завершения: {}", err),
        }
    }

    info!("Завершение работы...");

    // stop ждёт рабочий поток и поток колбэков, поэтому не на потоке runtime.
    // Цикл останавливается до уничтожения окна
    let context = tokio::task::spawn_blocking(move || -> mgwin::Result<Context> {
        context.stop_event_loop(&window)?;
        context.destroy_window(&window)?;
        Ok(context)
    })
    .await??;

    let failures = context.errors().try_iter().count();
    if failures > 0 {
        warn!("Асинхронных ошибок за время работы: {}", failures);
    }

    info!("mgwin завершил работу");
    Ok(())
}

fn register_handlers(
    context: &Context,
    window: &Window,
    quit_key: Option<Key>,
    closed: Arc<Notify>,
) -> Result<()> {
    let handle = window.clone();
    let on_close = closed.clone();
    context.on_close(window, move || {
        info!("Запрос закрытия окна {}", handle.id());
        handle.hide()?;
        on_close.notify_one();
        Ok(())
    })?;

    context.on_key_press(window, move |key| {
        info!("Нажата клавиша: {}", key);
        if Some(key) == quit_key {
            info!("Клавиша выхода {}, закрываемся", key);
            closed.notify_one();
        }
        Ok(())
    })?;

    context.on_key_release(window, |key| {
        debug!("Отпущена клавиша: {}", key);
        Ok(())
    })?;

    Ok(())
}

/// Сценарий для headless режима: несколько нажатий и запрос закрытия
async fn play_script(server: HeadlessServer, window: mgwin::WindowId) {
    // a, A, z, Return
    for keysym in [0x61, 0x41, 0x7a, 0xff0d] {
        sleep(Duration::from_millis(50)).await;
        server.press_key(window, keysym);
        server.release_key(window, keysym);
    }
    sleep(Duration::from_millis(100)).await;
    if !server.request_close(window) {
        warn!("Не удалось отправить запрос закрытия окну {}", window);
    }
}

fn init_tracing(level: &str, format: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))?;

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        "pretty" => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
        _ => registry.with(tracing_subscriber::fmt::layer().compact()).init(),
    }

    Ok(())
}
