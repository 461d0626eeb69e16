//! TOML-based configuration for the `x52-mfd` command-line tool.
//!
//! The file is read from `--config <path>` when given, otherwise from the
//! platform-appropriate location:
//! - Windows:  `%APPDATA%\X52Mfd\config.toml`
//! - Linux:    `$XDG_CONFIG_HOME/x52mfd/config.toml` or `~/.config/x52mfd/config.toml`
//! - macOS:    `~/Library/Application Support/X52Mfd/config.toml`
//!
//! A missing file is not an error: the built-in defaults reproduce the classic
//! two-page demo with a "Loop: N" ticker on page 1, line 2.
//!
//! ```toml
//! [app]
//! name = "x52-mfd"
//! log_level = "info"
//!
//! [driver]
//! library = "DirectOutput.dll"
//! simulate = false
//!
//! [[pages]]
//! name = "page1"
//! active = true
//! lines = ["p1 l0", "p1 l1"]
//!
//! [ticker]
//! page = "page1"
//! line = 2
//! interval_ms = 250
//! ```
//!
//! # Serde default values
//!
//! Every section and field carries a `#[serde(default ...)]` attribute, so a
//! partial file only overrides what it names.  Note that a `[[pages]]` list,
//! when present, replaces the default pages entirely.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default = "default_pages")]
    pub pages: Vec<PageConfig>,
    #[serde(default)]
    pub ticker: TickerConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppSection {
    /// Application name handed to the driver on initialization.
    #[serde(default = "default_app_name")]
    pub name: String,
    /// `tracing` log level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Vendor driver settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverConfig {
    /// Path or file name of the DirectOutput library.
    #[serde(default = "default_library")]
    pub library: String,
    /// Use the in-memory simulated device instead of the vendor library.
    /// Always on for non-Windows builds.
    #[serde(default)]
    pub simulate: bool,
}

/// A page created at startup, with its initial lines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageConfig {
    pub name: String,
    #[serde(default)]
    pub active: bool,
    /// At most three lines; row `i` receives `lines[i]`.
    #[serde(default)]
    pub lines: Vec<String>,
}

/// The periodic "Loop: N" writer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ticker_page")]
    pub page: String,
    #[serde(default = "default_ticker_line")]
    pub line: usize,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_app_name() -> String {
    "x52-mfd".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_library() -> String {
    "DirectOutput.dll".to_string()
}
fn default_true() -> bool {
    true
}
fn default_ticker_page() -> String {
    "page1".to_string()
}
fn default_ticker_line() -> usize {
    2
}
fn default_interval_ms() -> u64 {
    250
}
fn default_pages() -> Vec<PageConfig> {
    vec![
        PageConfig {
            name: "page1".to_string(),
            active: true,
            lines: vec!["p1 l0".to_string(), "p1 l1".to_string()],
        },
        PageConfig {
            name: "page2".to_string(),
            active: false,
            lines: vec![
                "page 2, line 0".to_string(),
                "page 2, line 1".to_string(),
                "page 2, line 2".to_string(),
            ],
        },
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            driver: DriverConfig::default(),
            pages: default_pages(),
            ticker: TickerConfig::default(),
        }
    }
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            library: default_library(),
            simulate: false,
        }
    }
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            page: default_ticker_page(),
            line: default_ticker_line(),
            interval_ms: default_interval_ms(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from `path`, or from [`config_file_path`] when `None`.
///
/// Returns `AppConfig::default()` if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config directory including the application subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("X52Mfd"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("x52mfd"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("X52Mfd"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("x52mfd_test_{}", uuid::Uuid::new_v4()))
    }

    // ── AppConfig defaults ────────────────────────────────────────────────────

    #[test]
    fn test_app_config_default_reproduces_demo_pages() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        let names: Vec<&str> = cfg.pages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["page1", "page2"]);
        assert!(cfg.pages[0].active);
        assert!(!cfg.pages[1].active);
        assert_eq!(cfg.pages[1].lines.len(), 3);
    }

    #[test]
    fn test_ticker_default_writes_line_two_of_page_one_every_250ms() {
        let ticker = TickerConfig::default();
        assert!(ticker.enabled);
        assert_eq!(ticker.page, "page1");
        assert_eq!(ticker.line, 2);
        assert_eq!(ticker.interval_ms, 250);
    }

    #[test]
    fn test_driver_default_uses_vendor_library() {
        let driver = DriverConfig::default();
        assert_eq!(driver.library, "DirectOutput.dll");
        assert!(!driver.simulate);
    }

    #[test]
    fn test_app_section_default_log_level_is_info() {
        let app = AppSection::default();
        assert_eq!(app.name, "x52-mfd");
        assert_eq!(app.log_level, "info");
    }

    // ── TOML parsing ──────────────────────────────────────────────────────────

    #[test]
    fn test_app_config_serializes_and_deserializes_round_trip() {
        // Arrange
        let mut cfg = AppConfig::default();
        cfg.driver.simulate = true;
        cfg.ticker.interval_ms = 1000;

        // Act
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: AppConfig = toml::from_str(&toml_str).expect("deserialize");

        // Assert
        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_deserialize_partial_ticker_overrides_defaults() {
        // Arrange
        let toml_str = r#"
[ticker]
interval_ms = 1000
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.ticker.interval_ms, 1000);
        // Unspecified fields keep their defaults
        assert_eq!(cfg.ticker.line, 2);
        assert_eq!(cfg.pages.len(), 2);
    }

    #[test]
    fn test_pages_list_replaces_default_pages() {
        // Arrange
        let toml_str = r#"
[[pages]]
name = "nav"
active = true
lines = ["HDG 270"]

[[pages]]
name = "com"
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize pages");

        // Assert
        assert_eq!(cfg.pages.len(), 2);
        assert_eq!(cfg.pages[0].lines, vec!["HDG 270".to_string()]);
        assert!(!cfg.pages[1].active);
        assert!(cfg.pages[1].lines.is_empty());
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_parse_error() {
        let result: Result<AppConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    // ── load_config / save_config ─────────────────────────────────────────────

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        // Arrange
        let path = temp_dir().join("config.toml");

        // Act
        let cfg = load_config(Some(&path)).expect("missing file is not an error");

        // Assert
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_load_config_reports_parse_error() {
        // Arrange
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("config.toml");
        std::fs::write(&path, "[ticker\ninterval_ms = ").expect("write");

        // Act
        let result = load_config(Some(&path));

        // Assert
        assert!(matches!(result, Err(ConfigError::Parse(_))));

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_and_load_config_round_trip_via_temp_dir() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join("nested").join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.app.log_level = "debug".to_string();
        cfg.ticker.page = "page2".to_string();

        // Act
        save_config(&cfg, &path).expect("save");
        let loaded = load_config(Some(&path)).expect("load");

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    // ── config_dir path formation ─────────────────────────────────────────────

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(
                path.ends_with("config.toml"),
                "config file must be named config.toml, got {path:?}"
            );
        }
        // NoPlatformConfigDir is acceptable in a stripped CI environment.
    }
}
