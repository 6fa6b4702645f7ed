use crate::events::Key;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// "x11" или "headless"
    pub backend: String,
    /// Имя дисплея X11; по умолчанию берётся из DISPLAY
    pub display: Option<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            backend: "x11".to_string(),
            display: None,
        }
    }
}

/// Параметры окна, которое открывает утилита
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowConfig {
    #[serde(alias = "title")]
    pub name: String,
    /// Без x/y окно центрируется на экране
    pub x: Option<i32>,
    pub y: Option<i32>,
    #[serde(alias = "w")]
    pub width: u32,
    #[serde(alias = "h")]
    pub height: u32,
    pub fullscreen: bool,
    /// Буква, нажатие которой закрывает утилиту
    pub quit_key: Option<String>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            name: "mgwin".to_string(),
            x: None,
            y: None,
            width: 640,
            height: 480,
            fullscreen: false,
            quit_key: None,
        }
    }
}

impl WindowConfig {
    pub fn quit_key(&self) -> Option<Key> {
        self.quit_key
            .as_deref()
            .and_then(Key::from_name)
            .filter(Key::is_supported)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        // Файл необязателен: отсутствующие поля берутся из serde(default)
        let figment = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("MGWIN_").split("__"));

        let config: Config = figment
            .extract()
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" => {}
            _ => anyhow::bail!("Неверный формат логирования: {}", self.logging.format),
        }

        match self.platform.backend.as_str() {
            "x11" | "headless" => {}
            _ => anyhow::bail!("Неверная платформа: {}", self.platform.backend),
        }

        if self.window.width == 0 || self.window.height == 0 {
            anyhow::bail!(
                "Размер окна должен быть больше 0, получено {}x{}",
                self.window.width,
                self.window.height
            );
        }

        if self.window.width > u16::MAX as u32 || self.window.height > u16::MAX as u32 {
            anyhow::bail!("Размер окна не может превышать {}", u16::MAX);
        }

        if let Some(name) = &self.window.quit_key {
            if self.window.quit_key().is_none() {
                anyhow::bail!("Клавиша выхода должна быть буквой a-z, получено '{}'", name);
            }
        }

        Ok(())
    }
}
